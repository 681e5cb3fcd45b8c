//! Failure taxonomy shared by both ends of a transfer.
//!
//! Every fallible operation in the client engine, the codec and the per-connection
//! server handler returns a [`TransferError`]. The variants are coarse on purpose:
//! callers mostly care whether the link broke, whether the peer misbehaved, or whether
//! the request itself was refused.
use std::io;

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Connect, accept or any other IO failure (socket or local file).
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// The peer closed the stream in the middle of a message.
    #[error("stream ended before a complete message was read")]
    TruncatedStream,

    /// Unexpected message type, malformed payload or mismatched file name.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Request refused: missing file, existing file, invalid field. The text is what
    /// travels in an `ERROR` message.
    #[error("{0}")]
    Application(String),
}

impl TransferError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }

    pub fn application(reason: impl Into<String>) -> Self {
        Self::Application(reason.into())
    }

    /// Whether the failure should be reported to the peer as an `ERROR` message.
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::Application(_))
    }
}

impl From<DecodeError> for TransferError {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::UnexpectedEnd { .. } => Self::TruncatedStream,
            DecodeError::Io { inner, .. } if inner.kind() == io::ErrorKind::UnexpectedEof => {
                Self::TruncatedStream
            }
            DecodeError::Io { inner, .. } => Self::Connection(inner),
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<EncodeError> for TransferError {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::Io { inner, .. } => Self::Connection(inner),
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_while_decoding_is_truncation() {
        let err = DecodeError::Io {
            inner: io::Error::from(io::ErrorKind::UnexpectedEof),
            additional: 4,
        };

        assert!(matches!(err.into(), TransferError::TruncatedStream));
    }

    #[test]
    fn other_io_failures_stay_connection_errors() {
        let err = DecodeError::Io {
            inner: io::Error::from(io::ErrorKind::ConnectionReset),
            additional: 1,
        };

        assert!(matches!(err.into(), TransferError::Connection(_)));
    }

    #[test]
    fn application_error_displays_bare_reason() {
        let err = TransferError::application("file not found: a.txt");
        assert_eq!(err.to_string(), "file not found: a.txt");
        assert!(err.is_reportable());
        assert!(!TransferError::TruncatedStream.is_reportable());
    }
}
