//! Protocol engine: Connect, Message and HandleChange as request/reply contracts.
//!
//! Outbound requests are recorded in a table keyed by [`RequestId`] together with the
//! channel they went out on. The host reports each completion (reply or failure) exactly
//! once; the entry is removed at that point, so a request completes at most once.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::action::{Action, Notification};
use crate::address::Endpoint;
use crate::channel::{ChannelId, ConnectionLifecycle};
use crate::identity::{Fingerprint, LocalIdentity};
use crate::protocol::{
    ConnectReply, ConnectRequest, DecodeError, Frame, HandleChangeRequest, MessageRequest, Reply,
    Request, RequestId, RpcError, RpcKind,
};
use crate::registry::{PeerId, PeerRegistry, RegistryError};
use crate::target::Target;
use crate::wire::{self, FrameEncodeError};

/// Invoked once when a sent message is acknowledged by the recipient.
pub type AckCallback = Box<dyn FnOnce() + Send>;

enum Pending {
    Connect { peer: PeerId },
    Message { on_ack: AckCallback },
    HandleChange { peer: PeerId },
}

impl Pending {
    fn kind(&self) -> RpcKind {
        match self {
            Pending::Connect { .. } => RpcKind::Connect,
            Pending::Message { .. } => RpcKind::Message,
            Pending::HandleChange { .. } => RpcKind::HandleChange,
        }
    }
}

struct InFlight {
    channel: ChannelId,
    pending: Pending,
}

pub struct ProtocolEngine {
    local: LocalIdentity,
    registry: PeerRegistry,
    channels: ConnectionLifecycle,
    in_flight: HashMap<RequestId, InFlight>,
    next_request: u64,
    actions: Vec<Action>,
}

impl ProtocolEngine {
    pub fn new(local: LocalIdentity) -> Self {
        Self {
            local,
            registry: PeerRegistry::new(),
            channels: ConnectionLifecycle::new(),
            in_flight: HashMap::new(),
            next_request: 0,
            actions: Vec::new(),
        }
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn set_local_handle(&mut self, handle: &str) {
        self.local.handle = handle.to_string();
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Requests sent and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    /// Find or create the record for `endpoint`, record `identity` if given, and give
    /// the peer a fresh channel. Requests pending on a replaced channel fail with `Closed`.
    pub fn track(
        &mut self,
        endpoint: Endpoint,
        identity: Option<(Fingerprint, &str)>,
    ) -> Result<PeerId, RegistryError> {
        let peer = self.registry.find_or_create(endpoint)?;
        if let Some((fingerprint, handle)) = identity {
            self.registry.set_identity(peer, fingerprint, handle);
        }
        let reopened = self
            .channels
            .ensure_channel(self.registry.get_mut(peer), &mut self.actions);
        if let Some(old) = reopened.replaced {
            self.fail_channel_requests(old, RpcError::Closed);
        }
        Ok(peer)
    }

    /// Handshake with `peer`, announcing `fingerprint`/`handle` and our reachable address.
    /// The reply's identity is recorded on `peer`.
    pub fn connect(
        &mut self,
        peer: PeerId,
        fingerprint: Fingerprint,
        handle: &str,
    ) -> Result<RequestId, EngineError> {
        let request = ConnectRequest::new(fingerprint, handle, &self.local.address);
        self.issue(peer, Request::Connect(request), Pending::Connect { peer })
    }

    /// Send chat text to the peer matching `target`. `on_ack` runs once the recipient replies;
    /// it is dropped if the RPC fails.
    pub fn send_message(
        &mut self,
        target: &Target,
        text: &str,
        on_ack: AckCallback,
    ) -> Result<RequestId, EngineError> {
        let peer = self
            .registry
            .find_by_fingerprint(target.fingerprint, target.handle_prefix())?;
        let request = MessageRequest::new(text, self.local.fingerprint);
        self.issue(peer, Request::Message(request), Pending::Message { on_ack })
    }

    /// Tell every tracked peer our current handle. One request per peer; a failure for one
    /// peer is logged and the rest still go out.
    pub fn broadcast_handle_change(&mut self) -> Vec<RequestId> {
        let request = HandleChangeRequest::new(&self.local.handle, self.local.fingerprint);
        let peers: Vec<PeerId> = self.registry.all().collect();
        let mut issued = Vec::with_capacity(peers.len());
        for peer in peers {
            let sent = self.issue(
                peer,
                Request::HandleChange(request.clone()),
                Pending::HandleChange { peer },
            );
            match sent {
                Ok(id) => issued.push(id),
                Err(e) => warn!(
                    address = %self.registry.get(peer).address,
                    error = %e,
                    "unable to notify peer of handle change"
                ),
            }
        }
        issued
    }

    fn issue(
        &mut self,
        peer: PeerId,
        request: Request,
        pending: Pending,
    ) -> Result<RequestId, EngineError> {
        let id = RequestId(self.next_request + 1);
        let kind = request.kind();
        let frame = wire::encode_frame(&Frame::Request { id, request })?;
        self.next_request += 1;
        let channel = self
            .channels
            .channel_for(self.registry.get_mut(peer), &mut self.actions);
        self.actions.push(Action::SendFrame { channel, frame });
        self.in_flight.insert(id, InFlight { channel, pending });
        debug!(request = %id, rpc = %kind, %channel, address = %self.registry.get(peer).address, "request sent");
        Ok(id)
    }

    /// Answer an inbound request. Always returns a reply of the request's kind; a handler
    /// that cannot finish leaves it empty.
    pub fn serve(&mut self, request: &Request) -> Reply {
        let kind = request.kind();
        let result = match request {
            Request::Connect(req) => self.serve_connect(req).map(Reply::Connect),
            Request::Message(req) => self.serve_message(req).map(|()| Reply::Message),
            Request::HandleChange(req) => {
                self.serve_handle_change(req).map(|()| Reply::HandleChange)
            }
        };
        result.unwrap_or_else(|e| {
            warn!(rpc = %kind, error = %e, "inbound request aborted");
            Reply::empty(kind)
        })
    }

    fn serve_connect(&mut self, req: &ConnectRequest) -> Result<ConnectReply, ServeError> {
        let (fingerprint, handle, address) = req.decode()?;
        // Keyed by the address the caller says it is reachable at, not the socket it came from.
        self.track(address, Some((fingerprint, handle)))?;
        info!("New connection, remote peer {handle}#{fingerprint} from {address}");
        self.notify(Notification::PeerConnected {
            fingerprint,
            handle: handle.to_string(),
            address,
        });
        Ok(ConnectReply::new(self.local.fingerprint, &self.local.handle))
    }

    fn serve_message(&mut self, req: &MessageRequest) -> Result<(), ServeError> {
        let (text, fingerprint) = req.decode()?;
        let handle = self.registry.lookup_handle(fingerprint).map(str::to_string);
        if handle.is_none() {
            debug!(%fingerprint, "message from unknown sender");
        }
        self.notify(Notification::MessageReceived {
            fingerprint,
            handle,
            text: text.to_string(),
        });
        Ok(())
    }

    fn serve_handle_change(&mut self, req: &HandleChangeRequest) -> Result<(), ServeError> {
        let (handle, fingerprint) = req.decode()?;
        let old = self.registry.lookup_handle(fingerprint).map(str::to_string);
        self.registry.set_handle_by_fingerprint(fingerprint, handle)?;
        info!(
            "Peer with fingerprint {fingerprint} changing handle from {} to {handle}",
            old.as_deref().unwrap_or("(unknown)")
        );
        self.notify(Notification::HandleChanged {
            fingerprint,
            old,
            new: handle.to_string(),
        });
        Ok(())
    }

    /// Complete request `id` with the outcome reported on `channel`. Unknown ids and replies
    /// on a channel other than the one the request used are ignored.
    pub fn complete(&mut self, channel: ChannelId, id: RequestId, result: Result<Reply, RpcError>) {
        match self.in_flight.get(&id) {
            None => {
                warn!(request = %id, %channel, "reply for unknown request");
                return;
            }
            Some(entry) if entry.channel != channel => {
                warn!(request = %id, %channel, expected = %entry.channel, "reply on wrong channel");
                return;
            }
            Some(_) => {}
        }
        if let Some(entry) = self.in_flight.remove(&id) {
            self.finish(id, entry.pending, result);
        }
    }

    /// The host lost `channel`. Everything pending on it fails; the owning peer gets a new
    /// channel the next time a request is sent to it.
    pub fn channel_failed(&mut self, channel: ChannelId, error: RpcError) {
        if let Some(peer) = self.registry.find_by_channel(channel) {
            self.channels
                .close(self.registry.get_mut(peer), &mut self.actions);
        }
        self.fail_channel_requests(channel, error);
    }

    fn fail_channel_requests(&mut self, channel: ChannelId, error: RpcError) {
        let mut ids: Vec<RequestId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.channel == channel)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        for id in ids {
            if let Some(entry) = self.in_flight.remove(&id) {
                self.fail(id, entry.pending, error.clone());
            }
        }
    }

    fn finish(&mut self, id: RequestId, pending: Pending, result: Result<Reply, RpcError>) {
        match (pending, result) {
            (Pending::Connect { peer }, Ok(Reply::Connect(reply))) => match reply.decode() {
                Ok((fingerprint, handle)) => {
                    self.registry.set_identity(peer, fingerprint, handle);
                    let address = self.registry.get(peer).address;
                    info!("Connected to peer {handle}#{fingerprint}");
                    self.notify(Notification::PeerIdentified {
                        fingerprint,
                        handle: handle.to_string(),
                        address,
                    });
                }
                Err(e) => warn!(
                    request = %id,
                    address = %self.registry.get(peer).address,
                    error = %e,
                    "unusable handshake reply"
                ),
            },
            (Pending::Message { on_ack }, Ok(Reply::Message)) => {
                debug!(request = %id, "calling message ack callback");
                on_ack();
            }
            (Pending::HandleChange { .. }, Ok(Reply::HandleChange)) => {
                debug!(request = %id, "handle change acknowledged");
            }
            (pending, Ok(reply)) => {
                warn!(request = %id, expected = %pending.kind(), got = %reply.kind(), "reply of wrong kind");
                self.fail(id, pending, RpcError::BadPayload);
            }
            (pending, Err(error)) => self.fail(id, pending, error),
        }
    }

    fn fail(&self, id: RequestId, pending: Pending, error: RpcError) {
        match pending {
            Pending::Connect { peer } => warn!(
                request = %id,
                address = %self.registry.get(peer).address,
                %error,
                "Failed to connect"
            ),
            Pending::Message { .. } => {
                warn!(request = %id, %error, "Failed to send message")
            }
            Pending::HandleChange { peer } => warn!(
                request = %id,
                address = %self.registry.get(peer).address,
                %error,
                "Failed to notify peer of handle change"
            ),
        }
    }

    fn notify(&mut self, notification: Notification) {
        self.actions.push(Action::Notify(notification));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}

#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
