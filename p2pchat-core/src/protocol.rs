//! p2pchat wire protocol: RPC requests, replies and the frame envelope.
//!
//! Request and reply fields are optional on the wire so a handler can tell which
//! field is missing and still answer with an empty reply.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{self, Endpoint};
use crate::identity::Fingerprint;

/// Correlates a reply with the request that caused it. Unique per sending node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything sent over a connection. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Request { id: RequestId, request: Request },
    Reply { id: RequestId, reply: Reply },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Handshake: announce who we are and where to reach us.
    Connect(ConnectRequest),
    /// Chat text from the sender identified by `fingerprint`.
    Message(MessageRequest),
    /// The sender now goes by a new handle.
    HandleChange(HandleChangeRequest),
}

impl Request {
    pub fn kind(&self) -> RpcKind {
        match self {
            Request::Connect(_) => RpcKind::Connect,
            Request::Message(_) => RpcKind::Message,
            Request::HandleChange(_) => RpcKind::HandleChange,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Connect(ConnectReply),
    Message,
    HandleChange,
}

impl Reply {
    /// The reply a handler sends when it gives up early.
    pub fn empty(kind: RpcKind) -> Self {
        match kind {
            RpcKind::Connect => Reply::Connect(ConnectReply::default()),
            RpcKind::Message => Reply::Message,
            RpcKind::HandleChange => Reply::HandleChange,
        }
    }

    pub fn kind(&self) -> RpcKind {
        match self {
            Reply::Connect(_) => RpcKind::Connect,
            Reply::Message => RpcKind::Message,
            Reply::HandleChange => RpcKind::HandleChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcKind {
    Connect,
    Message,
    HandleChange,
}

impl fmt::Display for RpcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RpcKind::Connect => "Connect",
            RpcKind::Message => "Message",
            RpcKind::HandleChange => "HandleChange",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub fingerprint: Option<u16>,
    pub handle: Option<String>,
    pub address: Option<String>,
}

impl ConnectRequest {
    pub fn new(fingerprint: Fingerprint, handle: &str, endpoint: &Endpoint) -> Self {
        Self {
            fingerprint: Some(fingerprint.get()),
            handle: Some(handle.to_string()),
            address: Some(address::format(endpoint)),
        }
    }

    pub fn decode(&self) -> Result<(Fingerprint, &str, Endpoint), DecodeError> {
        let fingerprint = fingerprint_field(self.fingerprint)?;
        let handle = required(self.handle.as_deref(), "handle")?;
        let text = required(self.address.as_deref(), "address")?;
        let address =
            address::parse(text).map_err(|_| DecodeError::BadAddress(text.to_string()))?;
        Ok((fingerprint, handle, address))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReply {
    pub fingerprint: Option<u16>,
    pub handle: Option<String>,
}

impl ConnectReply {
    pub fn new(fingerprint: Fingerprint, handle: &str) -> Self {
        Self {
            fingerprint: Some(fingerprint.get()),
            handle: Some(handle.to_string()),
        }
    }

    pub fn decode(&self) -> Result<(Fingerprint, &str), DecodeError> {
        let handle = required(self.handle.as_deref(), "handle")?;
        let fingerprint = fingerprint_field(self.fingerprint)?;
        Ok((fingerprint, handle))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: Option<String>,
    pub fingerprint: Option<u16>,
}

impl MessageRequest {
    pub fn new(message: &str, fingerprint: Fingerprint) -> Self {
        Self {
            message: Some(message.to_string()),
            fingerprint: Some(fingerprint.get()),
        }
    }

    pub fn decode(&self) -> Result<(&str, Fingerprint), DecodeError> {
        let message = required(self.message.as_deref(), "message")?;
        let fingerprint = fingerprint_field(self.fingerprint)?;
        Ok((message, fingerprint))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleChangeRequest {
    pub handle: Option<String>,
    pub fingerprint: Option<u16>,
}

impl HandleChangeRequest {
    pub fn new(handle: &str, fingerprint: Fingerprint) -> Self {
        Self {
            handle: Some(handle.to_string()),
            fingerprint: Some(fingerprint.get()),
        }
    }

    pub fn decode(&self) -> Result<(&str, Fingerprint), DecodeError> {
        let handle = required(self.handle.as_deref(), "handle")?;
        let fingerprint = fingerprint_field(self.fingerprint)?;
        Ok((handle, fingerprint))
    }
}

fn required<T>(field: Option<T>, name: &'static str) -> Result<T, DecodeError> {
    field.ok_or(DecodeError::MissingField(name))
}

fn fingerprint_field(field: Option<u16>) -> Result<Fingerprint, DecodeError> {
    Fingerprint::new(required(field, "fingerprint")?).ok_or(DecodeError::ZeroFingerprint)
}

/// A required RPC field is missing or unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("fingerprint 0 is reserved")]
    ZeroFingerprint,
    #[error("bad address {0:?}")]
    BadAddress(String),
}

/// Failure status of an RPC already in flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("channel closed")]
    Closed,
    #[error("malformed reply")]
    BadPayload,
}
