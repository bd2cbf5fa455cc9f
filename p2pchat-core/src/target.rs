//! Message targets: `handle#fingerprint`, and operator lines `handle#fingerprint <text>`.

use crate::identity::Fingerprint;

/// Who a message is for. The handle is matched as a prefix; empty matches any handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub handle_prefix: String,
    pub fingerprint: Fingerprint,
}

impl Target {
    /// Parse `handle#fingerprint`. Everything before the first `#` is the handle prefix.
    pub fn parse(text: &str) -> Result<Self, TargetError> {
        let (handle, fingerprint) = text
            .split_once('#')
            .ok_or_else(|| TargetError::MissingFingerprint(text.to_string()))?;
        let fingerprint = fingerprint
            .parse::<u16>()
            .ok()
            .and_then(Fingerprint::new)
            .ok_or_else(|| TargetError::BadFingerprint(fingerprint.to_string()))?;
        Ok(Self {
            handle_prefix: handle.to_string(),
            fingerprint,
        })
    }

    /// Prefix to match against, `None` when any handle will do.
    pub fn handle_prefix(&self) -> Option<&str> {
        if self.handle_prefix.is_empty() {
            None
        } else {
            Some(&self.handle_prefix)
        }
    }
}

/// Split an operator line into target token and message body at the first space.
/// `None` when there is no body.
pub fn split_message_line(line: &str) -> Option<(&str, &str)> {
    let (target, text) = line.split_once(' ')?;
    if target.is_empty() || text.is_empty() {
        return None;
    }
    Some((target, text))
}

/// Parse a whole `handle#fingerprint <text>` line.
pub fn parse_message_line(line: &str) -> Result<(Target, &str), TargetError> {
    let (target, text) = split_message_line(line).ok_or(TargetError::MissingMessage)?;
    Ok((Target::parse(target)?, text))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("expected handle#fingerprint, got {0:?}")]
    MissingFingerprint(String),
    #[error("fingerprint must be a number between 1 and 65535, got {0:?}")]
    BadFingerprint(String),
    #[error("no message text")]
    MissingMessage,
}
