//! Error types for the batch client.
//!
//! # Design
//! Failures come in two scopes. Batch-wide failures (`Transport`,
//! `Cancelled`, `BoundaryCollision`, `MalformedMultipart`,
//! `NonBatchResponse`) compromise the single physical exchange and are
//! delivered to every callback of the batch. Entry-local failures
//! (`MalformedPart`, `MissingSubresponse`) reach only the callback of the
//! entry concerned. `BatchError` is `Clone` so one batch-wide failure can be
//! handed to every callback.

use thiserror::Error;

/// Why the transport could not complete the outer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    /// The exchange was aborted on request.
    Cancelled,
    Other,
}

/// Failure reported by a transport for the outer request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} transport error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "exchange cancelled")
    }
}

/// Why a single part or envelope could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(String);

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Errors raised by batch construction and delivered to subrequest callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The batch request was already completed; it accepts no further use.
    #[error("batch request already completed")]
    AlreadyCompleted,

    /// The subrequest cannot be written as an HTTP message; it was not added.
    #[error("invalid subrequest: {0}")]
    InvalidSubrequest(String),

    /// The outer exchange failed; no subresponse is available.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The outer exchange was cancelled before a response was dispatched.
    #[error("batch cancelled")]
    Cancelled,

    /// No boundary token free of collisions was found; nothing was sent.
    #[error("boundary collided with part content after {attempts} attempts")]
    BoundaryCollision { attempts: u32 },

    /// The outer response could not be split into parts.
    #[error("malformed multipart body: {0}")]
    MalformedMultipart(String),

    /// The response part for entry `index` could not be decoded.
    #[error("malformed response part {index}: {reason}")]
    MalformedPart { index: usize, reason: String },

    /// The batch response ended before a part for entry `index`.
    #[error("no subresponse for entry {index}")]
    MissingSubresponse { index: usize },

    /// The outer response status is not one accepted for a batch response.
    #[error("received non-batch response: HTTP {status}")]
    NonBatchResponse { status: u16 },
}

impl BatchError {
    /// Whether this failure concerns the whole exchange rather than one entry.
    pub fn is_batch_wide(&self) -> bool {
        !matches!(
            self,
            BatchError::MalformedPart { .. } | BatchError::MissingSubresponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_converts_into_batch_error() {
        let err: BatchError = TransportError::timeout("read timed out").into();
        assert_eq!(
            err,
            BatchError::Transport(TransportError {
                kind: TransportErrorKind::Timeout,
                message: "read timed out".to_string(),
            })
        );
        assert_eq!(err.to_string(), "Timeout transport error: read timed out");
    }

    #[test]
    fn scope_of_each_failure() {
        assert!(BatchError::Cancelled.is_batch_wide());
        assert!(BatchError::MalformedMultipart("empty".into()).is_batch_wide());
        assert!(!BatchError::MissingSubresponse { index: 3 }.is_batch_wide());
        assert!(!BatchError::MalformedPart {
            index: 0,
            reason: "bad status line".into()
        }
        .is_batch_wide());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            BatchError::NonBatchResponse { status: 500 }.to_string(),
            "received non-batch response: HTTP 500"
        );
        assert_eq!(
            BatchError::BoundaryCollision { attempts: 8 }.to_string(),
            "boundary collided with part content after 8 attempts"
        );
    }
}
