//! Connection lifecycle: at most one outbound RPC channel per peer.
//!
//! Opening a channel only registers it with the host (an [`Action::OpenChannel`]);
//! connecting and request completion happen asynchronously on the host side.

use std::fmt;

use tracing::debug;

use crate::action::Action;
use crate::registry::Peer;

/// Host-side connection handle. Never reused, so traffic from a closed channel is recognisably stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Result of [`ConnectionLifecycle::ensure_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reopened {
    pub channel: ChannelId,
    /// Channel torn down to make room, if the peer had one.
    pub replaced: Option<ChannelId>,
}

#[derive(Debug, Default)]
pub struct ConnectionLifecycle {
    next_channel: u64,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh channel to `peer.address`. Any existing channel is closed first, so the
    /// caller always gets a known-good channel (e.g. before a handshake).
    pub fn ensure_channel(&mut self, peer: &mut Peer, out: &mut Vec<Action>) -> Reopened {
        let replaced = self.close(peer, out);
        let channel = self.open(peer, out);
        Reopened { channel, replaced }
    }

    /// The peer's live channel, opening one if it has none.
    pub fn channel_for(&mut self, peer: &mut Peer, out: &mut Vec<Action>) -> ChannelId {
        match peer.channel {
            Some(channel) => channel,
            None => self.open(peer, out),
        }
    }

    /// Release the peer's channel. No-op without one.
    pub fn close(&mut self, peer: &mut Peer, out: &mut Vec<Action>) -> Option<ChannelId> {
        let channel = peer.channel.take()?;
        debug!(%channel, address = %peer.address, "closing channel");
        out.push(Action::CloseChannel { channel });
        Some(channel)
    }

    fn open(&mut self, peer: &mut Peer, out: &mut Vec<Action>) -> ChannelId {
        self.next_channel += 1;
        let channel = ChannelId(self.next_channel);
        debug!(%channel, address = %peer.address, "opening channel");
        peer.channel = Some(channel);
        out.push(Action::OpenChannel {
            channel,
            endpoint: peer.address,
        });
        channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PeerRegistry;

    fn peer() -> (PeerRegistry, crate::registry::PeerId) {
        let mut reg = PeerRegistry::new();
        let id = reg
            .find_or_create("127.0.0.1:4000".parse().unwrap())
            .unwrap();
        (reg, id)
    }

    #[test]
    fn ensure_always_recreates() {
        let (mut reg, id) = peer();
        let mut lc = ConnectionLifecycle::new();
        let mut out = Vec::new();

        let first = lc.ensure_channel(reg.get_mut(id), &mut out);
        assert_eq!(first.replaced, None);
        let second = lc.ensure_channel(reg.get_mut(id), &mut out);
        assert_eq!(second.replaced, Some(first.channel));
        assert_ne!(first.channel, second.channel);
        assert_eq!(reg.get(id).channel, Some(second.channel));

        let endpoint = reg.get(id).address;
        assert_eq!(
            out,
            vec![
                Action::OpenChannel {
                    channel: first.channel,
                    endpoint
                },
                Action::CloseChannel {
                    channel: first.channel
                },
                Action::OpenChannel {
                    channel: second.channel,
                    endpoint
                },
            ]
        );
    }

    #[test]
    fn channel_for_reuses_live_channel() {
        let (mut reg, id) = peer();
        let mut lc = ConnectionLifecycle::new();
        let mut out = Vec::new();
        let a = lc.channel_for(reg.get_mut(id), &mut out);
        let b = lc.channel_for(reg.get_mut(id), &mut out);
        assert_eq!(a, b);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn close_without_channel_is_noop() {
        let (mut reg, id) = peer();
        let mut lc = ConnectionLifecycle::new();
        let mut out = Vec::new();
        assert_eq!(lc.close(reg.get_mut(id), &mut out), None);
        assert!(out.is_empty());
    }
}
