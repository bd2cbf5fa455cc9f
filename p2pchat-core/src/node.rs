//! Chat node: the operations a host drives, on top of [`ProtocolEngine`].
//!
//! The host feeds in operator commands and transport events and drains [`Action`]s.
//! Nothing here blocks or touches a socket.

use tracing::{error, info};

use crate::action::Action;
use crate::address::{self, AddressError};
use crate::channel::ChannelId;
use crate::engine::{EngineError, ProtocolEngine};
use crate::identity::{Fingerprint, LocalIdentity};
use crate::protocol::{Frame, RequestId, RpcError};
use crate::registry::{Peer, PeerId, RegistryError};
use crate::target::{Target, TargetError};
use crate::wire::{self, FrameDecodeError, FrameEncodeError};

pub struct ChatNode {
    engine: ProtocolEngine,
}

impl ChatNode {
    pub fn new(local: LocalIdentity) -> Self {
        info!(identity = %local, "chat node ready");
        Self {
            engine: ProtocolEngine::new(local),
        }
    }

    pub fn local(&self) -> &LocalIdentity {
        self.engine.local()
    }

    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.engine.registry().iter()
    }

    pub fn peer(&self, id: PeerId) -> &Peer {
        self.engine.registry().get(id)
    }

    /// Track the peer at `address` and give it a fresh channel.
    ///
    /// Without `do_connect` the peer is recorded as `handle#fingerprint`. With it, a Connect
    /// handshake goes out announcing `handle#fingerprint`, and the peer's identity is filled
    /// in from the reply.
    pub fn track_peer(
        &mut self,
        handle: &str,
        fingerprint: u16,
        address: &str,
        do_connect: bool,
    ) -> Result<PeerId, NodeError> {
        let endpoint = address::parse(address)?;
        let fingerprint = Fingerprint::new(fingerprint).ok_or(NodeError::ZeroFingerprint)?;
        if do_connect {
            let peer = self.engine.track(endpoint, None)?;
            self.engine.connect(peer, fingerprint, handle)?;
            Ok(peer)
        } else {
            Ok(self.engine.track(endpoint, Some((fingerprint, handle)))?)
        }
    }

    /// Handshake with `address` as ourselves.
    pub fn connect_peer(&mut self, address: &str) -> Result<PeerId, NodeError> {
        let local = self.engine.local();
        let (handle, fingerprint) = (local.handle.clone(), local.fingerprint.get());
        self.track_peer(&handle, fingerprint, address, true)
    }

    /// Send `text` to `target` (`handle#fingerprint`, handle matched as a prefix).
    /// `on_ack` runs once if the recipient acknowledges.
    pub fn send_message<F>(
        &mut self,
        target: &str,
        text: &str,
        on_ack: F,
    ) -> Result<RequestId, NodeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let target = Target::parse(target)?;
        match self.engine.send_message(&target, text, Box::new(on_ack)) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let EngineError::Registry(RegistryError::NotFound(_)) = e {
                    error!(
                        fingerprint = %target.fingerprint,
                        "Unable to find peer to send message, maybe they've never connected?"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Adopt `handle` locally and tell every tracked peer.
    pub fn change_local_handle(&mut self, handle: &str) -> Result<Vec<RequestId>, NodeError> {
        if handle.is_empty() {
            return Err(NodeError::EmptyHandle);
        }
        info!("Changing handle from {} to {handle}", self.engine.local().handle);
        self.engine.set_local_handle(handle);
        Ok(self.engine.broadcast_handle_change())
    }

    pub fn lookup_handle(&self, fingerprint: u16) -> Option<&str> {
        Fingerprint::new(fingerprint).and_then(|fp| self.engine.registry().lookup_handle(fp))
    }

    /// Serve one inbound request frame; returns the encoded reply frame to write back.
    pub fn on_inbound_frame(&mut self, bytes: &[u8]) -> Result<Vec<u8>, NodeError> {
        let (frame, _) = wire::decode_frame(bytes)?;
        match frame {
            Frame::Request { id, request } => {
                let reply = self.engine.serve(&request);
                Ok(wire::encode_frame(&Frame::Reply { id, reply })?)
            }
            Frame::Reply { id, .. } => Err(NodeError::UnexpectedFrame(id)),
        }
    }

    /// A reply frame arrived on `channel`. An undecodable frame fails the whole channel.
    pub fn on_reply_frame(&mut self, channel: ChannelId, bytes: &[u8]) -> Result<(), NodeError> {
        match wire::decode_frame(bytes) {
            Ok((Frame::Reply { id, reply }, _)) => {
                self.engine.complete(channel, id, Ok(reply));
                Ok(())
            }
            Ok((Frame::Request { id, .. }, _)) => Err(NodeError::UnexpectedFrame(id)),
            Err(e) => {
                self.engine.channel_failed(channel, RpcError::BadPayload);
                Err(e.into())
            }
        }
    }

    /// The host could not connect on, or lost, `channel`.
    pub fn on_channel_failed(&mut self, channel: ChannelId, error: RpcError) {
        self.engine.channel_failed(channel, error);
    }

    pub fn drain_actions(&mut self) -> Vec<Action> {
        self.engine.take_actions()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("fingerprint must be between 1 and 65535")]
    ZeroFingerprint,
    #[error("handle must not be empty")]
    EmptyHandle,
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error("unexpected frame for request {0}")]
    UnexpectedFrame(RequestId),
}

impl From<EngineError> for NodeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Registry(e) => NodeError::Registry(e),
            EngineError::Encode(e) => NodeError::Encode(e),
        }
    }
}
