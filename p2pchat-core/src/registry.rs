//! Peer registry: one record per endpoint, addressed by stable [`PeerId`]s.

use std::collections::TryReserveError;

use tracing::debug;

use crate::address::Endpoint;
use crate::channel::ChannelId;
use crate::identity::Fingerprint;

/// Index of a peer record. Records are never removed or reordered, so a `PeerId`
/// stays attached to the same peer for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(usize);

impl PeerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: Endpoint,
    /// `None` until the peer's identity is known (inbound Connect or handshake reply).
    pub fingerprint: Option<Fingerprint>,
    pub handle: String,
    pub channel: Option<ChannelId>,
}

impl Peer {
    fn new(address: Endpoint) -> Self {
        Self {
            address,
            fingerprint: None,
            handle: String::new(),
            channel: None,
        }
    }

    pub fn is_identified(&self) -> bool {
        self.fingerprint.is_some()
    }
}

/// Append-only arena of peer records in insertion order.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Existing record for `endpoint`, or a new empty one appended at the end.
    pub fn find_or_create(&mut self, endpoint: Endpoint) -> Result<PeerId, RegistryError> {
        if let Some(i) = self.peers.iter().position(|p| p.address == endpoint) {
            let peer = &self.peers[i];
            debug!(address = %endpoint, handle = %peer.handle, "found existing peer");
            return Ok(PeerId(i));
        }
        self.peers.try_reserve(1)?;
        self.peers.push(Peer::new(endpoint));
        debug!(address = %endpoint, "tracking new peer");
        Ok(PeerId(self.peers.len() - 1))
    }

    /// First peer with `fingerprint` whose handle starts with `handle_prefix` (if given).
    pub fn find_by_fingerprint(
        &self,
        fingerprint: Fingerprint,
        handle_prefix: Option<&str>,
    ) -> Result<PeerId, RegistryError> {
        self.peers
            .iter()
            .position(|p| {
                p.fingerprint == Some(fingerprint)
                    && handle_prefix.map_or(true, |prefix| p.handle.starts_with(prefix))
            })
            .map(PeerId)
            .ok_or(RegistryError::NotFound(fingerprint))
    }

    pub fn set_identity(&mut self, id: PeerId, fingerprint: Fingerprint, handle: &str) {
        let peer = &mut self.peers[id.0];
        peer.fingerprint = Some(fingerprint);
        peer.handle = handle.to_string();
    }

    /// Rename the peer holding `fingerprint`.
    pub fn set_handle_by_fingerprint(
        &mut self,
        fingerprint: Fingerprint,
        handle: &str,
    ) -> Result<PeerId, RegistryError> {
        let id = self.find_by_fingerprint(fingerprint, None)?;
        self.peers[id.0].handle = handle.to_string();
        Ok(id)
    }

    pub fn lookup_handle(&self, fingerprint: Fingerprint) -> Option<&str> {
        self.find_by_fingerprint(fingerprint, None)
            .ok()
            .map(|id| self.peers[id.0].handle.as_str())
    }

    pub fn find_by_channel(&self, channel: ChannelId) -> Option<PeerId> {
        self.peers
            .iter()
            .position(|p| p.channel == Some(channel))
            .map(PeerId)
    }

    /// Every tracked peer, insertion order.
    pub fn all(&self) -> impl Iterator<Item = PeerId> + '_ {
        (0..self.peers.len()).map(PeerId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.peers.iter().enumerate().map(|(i, p)| (PeerId(i), p))
    }

    /// Panics if `id` did not come from this registry.
    pub fn get(&self, id: PeerId) -> &Peer {
        &self.peers[id.0]
    }

    pub fn get_mut(&mut self, id: PeerId) -> &mut Peer {
        &mut self.peers[id.0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no peer with fingerprint {0}")]
    NotFound(Fingerprint),
    #[error("could not allocate space for new peer")]
    Allocation(#[from] TryReserveError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(v: u16) -> Fingerprint {
        Fingerprint::new(v).unwrap()
    }

    fn ep(port: u16) -> Endpoint {
        Endpoint::new([127, 0, 0, 1].into(), port)
    }

    #[test]
    fn same_address_reuses_record() {
        let mut reg = PeerRegistry::new();
        let a = reg.find_or_create(ep(4000)).unwrap();
        reg.set_identity(a, fp(1), "alice");
        let b = reg.find_or_create(ep(4000)).unwrap();
        reg.set_identity(b, fp(2), "alice2");
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(a).fingerprint, Some(fp(2)));
        assert_eq!(reg.get(a).handle, "alice2");
    }

    #[test]
    fn new_record_is_unidentified() {
        let mut reg = PeerRegistry::new();
        let id = reg.find_or_create(ep(4000)).unwrap();
        let peer = reg.get(id);
        assert!(!peer.is_identified());
        assert!(peer.handle.is_empty());
        assert!(peer.channel.is_none());
    }

    #[test]
    fn ids_survive_growth() {
        let mut reg = PeerRegistry::new();
        let first = reg.find_or_create(ep(1)).unwrap();
        reg.set_identity(first, fp(11), "first");
        for port in 2..500 {
            reg.find_or_create(ep(port)).unwrap();
        }
        assert_eq!(reg.get(first).address, ep(1));
        assert_eq!(reg.get(first).handle, "first");
        assert_eq!(reg.all().count(), 499);
        assert_eq!(reg.all().next(), Some(first));
    }

    #[test]
    fn find_by_fingerprint_and_prefix() {
        let mut reg = PeerRegistry::new();
        let alice = reg.find_or_create(ep(1)).unwrap();
        reg.set_identity(alice, fp(42), "alice");
        let bob = reg.find_or_create(ep(2)).unwrap();
        reg.set_identity(bob, fp(43), "bob");

        assert_eq!(reg.find_by_fingerprint(fp(42), None), Ok(alice));
        assert_eq!(reg.find_by_fingerprint(fp(42), Some("al")), Ok(alice));
        assert_eq!(reg.find_by_fingerprint(fp(42), Some("alice")), Ok(alice));
        assert_eq!(
            reg.find_by_fingerprint(fp(42), Some("bob")),
            Err(RegistryError::NotFound(fp(42)))
        );
        assert_eq!(
            reg.find_by_fingerprint(fp(44), None),
            Err(RegistryError::NotFound(fp(44)))
        );
    }

    #[test]
    fn unidentified_peers_never_match() {
        let mut reg = PeerRegistry::new();
        reg.find_or_create(ep(1)).unwrap();
        assert!(reg.find_by_fingerprint(fp(1), None).is_err());
        assert_eq!(reg.lookup_handle(fp(1)), None);
    }

    #[test]
    fn rename_by_fingerprint() {
        let mut reg = PeerRegistry::new();
        let id = reg.find_or_create(ep(1)).unwrap();
        reg.set_identity(id, fp(5), "old");
        assert_eq!(reg.set_handle_by_fingerprint(fp(5), "new"), Ok(id));
        assert_eq!(reg.lookup_handle(fp(5)), Some("new"));
        assert_eq!(
            reg.set_handle_by_fingerprint(fp(6), "x"),
            Err(RegistryError::NotFound(fp(6)))
        );
    }
}
