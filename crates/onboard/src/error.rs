//! The onboarding error taxonomy and the fatal envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of protocol error codes, numbered as they appear in
/// fatal envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A local fault unrelated to the peer's behavior.
    InternalError,
    /// A message arrived out of order or with wrong contents.
    ProtocolError,
    /// A message could not be parsed or deserialized.
    InvalidMsg,
    /// A symmetric decryption failed.
    InvalidEncryptedMsg,
    /// The session setup did not verify against the onboarding secret.
    InvalidSecretOrMsgSignature,
    /// The device message did not verify against the device key.
    InvalidDeviceKeyOrMsgSignature,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// The numeric code used in fatal envelopes.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::InternalError => 0,
            ErrorCode::ProtocolError => 1,
            ErrorCode::InvalidMsg => 2,
            ErrorCode::InvalidEncryptedMsg => 3,
            ErrorCode::InvalidSecretOrMsgSignature => 4,
            ErrorCode::InvalidDeviceKeyOrMsgSignature => 5,
            ErrorCode::Unknown => 6,
        }
    }

    /// Maps a numeric code back; anything unassigned becomes `Unknown`.
    pub fn from_code(code: u32) -> ErrorCode {
        match code {
            0 => ErrorCode::InternalError,
            1 => ErrorCode::ProtocolError,
            2 => ErrorCode::InvalidMsg,
            3 => ErrorCode::InvalidEncryptedMsg,
            4 => ErrorCode::InvalidSecretOrMsgSignature,
            5 => ErrorCode::InvalidDeviceKeyOrMsgSignature,
            _ => ErrorCode::Unknown,
        }
    }
}

/// An onboarding failure: either a locally detected error or a fatal
/// envelope received from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OnboardError {
    /// A locally detected error; may be serialized as a fatal envelope
    /// for the peer.
    #[error("{msg}")]
    Op {
        /// The taxonomy code.
        code: ErrorCode,
        /// A human-facing description.
        msg: String,
    },
    /// A fatal envelope received from the peer.
    #[error("fatal error from peer: {msg}")]
    Fatal {
        /// The peer's taxonomy code.
        code: ErrorCode,
        /// The peer's description.
        msg: String,
    },
}

impl OnboardError {
    /// The taxonomy code of the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            OnboardError::Op { code, .. } | OnboardError::Fatal { code, .. } => *code,
        }
    }

    /// Whether this is a fatal envelope received from the peer.
    pub fn is_fatal_from_peer(&self) -> bool {
        matches!(self, OnboardError::Fatal { .. })
    }
}

fn op(code: ErrorCode, msg: impl Into<String>) -> OnboardError {
    OnboardError::Op {
        code,
        msg: msg.into(),
    }
}

pub(crate) fn internal(msg: impl Into<String>) -> OnboardError {
    op(ErrorCode::InternalError, msg)
}

pub(crate) fn protocol(msg: impl Into<String>) -> OnboardError {
    op(ErrorCode::ProtocolError, msg)
}

pub(crate) fn invalid_msg(msg: impl Into<String>) -> OnboardError {
    op(ErrorCode::InvalidMsg, msg)
}

pub(crate) fn invalid_encrypted_msg(msg: impl Into<String>) -> OnboardError {
    op(ErrorCode::InvalidEncryptedMsg, msg)
}

pub(crate) fn invalid_secret_or_msg_signature(msg: impl Into<String>) -> OnboardError {
    op(ErrorCode::InvalidSecretOrMsgSignature, msg)
}

pub(crate) fn invalid_device_key_or_msg_signature(msg: impl Into<String>) -> OnboardError {
    op(ErrorCode::InvalidDeviceKeyOrMsgSignature, msg)
}

#[derive(Serialize, Deserialize)]
struct FatalMsg {
    m: String,
    code: u32,
    msg: String,
}

/// Serializes a local error as a `fatal` envelope for the peer.
///
/// A [`OnboardError::Fatal`] received from the peer is refused, so a
/// fatal can never bounce back and forth.
pub fn fatal(err: &OnboardError) -> Result<Vec<u8>, OnboardError> {
    match err {
        OnboardError::Op { code, msg } => serde_json::to_vec(&FatalMsg {
            m: "fatal".to_string(),
            code: code.code(),
            msg: msg.clone(),
        })
        .map_err(|e| internal(format!("can't serialize fatal: {e}"))),
        OnboardError::Fatal { .. } => Err(err.clone()),
    }
}

/// Attempts to read `b` as a fatal envelope.
pub(crate) fn parse_fatal(b: &[u8]) -> Option<OnboardError> {
    let msg: FatalMsg = serde_json::from_slice(b).ok()?;
    if msg.m != "fatal" {
        return None;
    }
    Some(OnboardError::Fatal {
        code: ErrorCode::from_code(msg.code),
        msg: msg.msg,
    })
}

/// When an envelope fails to parse, the bytes may instead be a fatal
/// envelope from the peer; surface that, or fall back to the given
/// parse error.
pub(crate) fn parse_fatal_or(b: &[u8], fallback: OnboardError) -> OnboardError {
    parse_fatal(b).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in [
            ErrorCode::InternalError,
            ErrorCode::ProtocolError,
            ErrorCode::InvalidMsg,
            ErrorCode::InvalidEncryptedMsg,
            ErrorCode::InvalidSecretOrMsgSignature,
            ErrorCode::InvalidDeviceKeyOrMsgSignature,
            ErrorCode::Unknown,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), code);
        }
        assert_eq!(ErrorCode::from_code(99), ErrorCode::Unknown);
    }

    #[test]
    fn fatal_round_trip() {
        let err = protocol("bad nonce");
        let bytes = fatal(&err).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["m"], "fatal");
        assert_eq!(v["code"], 1);
        assert_eq!(v["msg"], "bad nonce");

        let parsed = parse_fatal(&bytes).unwrap();
        assert_eq!(
            parsed,
            OnboardError::Fatal {
                code: ErrorCode::ProtocolError,
                msg: "bad nonce".to_string(),
            }
        );
    }

    #[test]
    fn received_fatal_is_not_reserialized() {
        let received = OnboardError::Fatal {
            code: ErrorCode::InvalidDeviceKeyOrMsgSignature,
            msg: "can't verify device signature".to_string(),
        };
        assert_eq!(fatal(&received).unwrap_err(), received);
    }

    #[test]
    fn non_fatal_bytes_do_not_parse() {
        assert!(parse_fatal(b"{\"m\":\"hello\",\"n1\":\"xx\"}").is_none());
        assert!(parse_fatal(b"not json").is_none());
    }
}
