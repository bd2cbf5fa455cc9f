//! What the core asks the host to do.

use crate::address::Endpoint;
use crate::channel::ChannelId;
use crate::identity::Fingerprint;

/// Action for host to perform, in the order drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start connecting to `endpoint`; frames for `channel` go there.
    OpenChannel { channel: ChannelId, endpoint: Endpoint },
    /// Drop the connection behind `channel`. Replies arriving later are ignored.
    CloseChannel { channel: ChannelId },
    /// Write an encoded request frame on `channel`.
    SendFrame { channel: ChannelId, frame: Vec<u8> },
    Notify(Notification),
}

/// Application-level events for the prompt/UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    MessageReceived {
        fingerprint: Fingerprint,
        /// Sender's handle, if the sender is known.
        handle: Option<String>,
        text: String,
    },
    /// A remote node handshook with us.
    PeerConnected {
        fingerprint: Fingerprint,
        handle: String,
        address: Endpoint,
    },
    /// Our handshake with a peer completed.
    PeerIdentified {
        fingerprint: Fingerprint,
        handle: String,
        address: Endpoint,
    },
    HandleChanged {
        fingerprint: Fingerprint,
        old: Option<String>,
        new: String,
    },
}
