//! p2pchat core: peer registry and RPC protocol engine.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod action;
pub mod address;
pub mod channel;
pub mod engine;
pub mod identity;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod target;
pub mod wire;

pub use action::{Action, Notification};
pub use address::{AddressError, Endpoint};
pub use channel::ChannelId;
pub use identity::{Fingerprint, LocalIdentity};
pub use node::{ChatNode, NodeError};
pub use protocol::{Frame, RequestId, RpcError};
pub use registry::{Peer, PeerId, RegistryError};
pub use target::{parse_message_line, Target, TargetError};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
