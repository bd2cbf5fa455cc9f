//! Node identity: fingerprint and handle.

use std::fmt;
use std::num::NonZeroU16;

use rand::Rng;

use crate::address::Endpoint;

/// Small self-declared peer identifier. Zero is reserved and cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(NonZeroU16);

impl Fingerprint {
    /// `None` for 0.
    pub fn new(value: u16) -> Option<Self> {
        NonZeroU16::new(value).map(Fingerprint)
    }

    /// Random non-zero fingerprint for nodes started without one.
    pub fn random() -> Self {
        let value = rand::thread_rng().gen_range(1..=u16::MAX);
        Fingerprint::new(value).unwrap_or(Fingerprint(NonZeroU16::MIN))
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// This node as announced to peers: fingerprint, handle and the endpoint peers should dial back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub fingerprint: Fingerprint,
    pub handle: String,
    pub address: Endpoint,
}

impl LocalIdentity {
    pub fn new(fingerprint: Fingerprint, handle: impl Into<String>, address: Endpoint) -> Self {
        Self {
            fingerprint,
            handle: handle.into(),
            address,
        }
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.handle, self.fingerprint, self.address)
    }
}
