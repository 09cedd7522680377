//! Error types for the roof core.
//!
//! Two families live here:
//!
//! - **`TransportError`**: a request/response exchange with the remote
//!   controller failed (I/O, timeout, malformed reply). Produced by
//!   [`Connection`](crate::capabilities::Connection) implementations.
//! - **`Rejection`**: a start-motion request was refused before any command
//!   was sent. Rejections never change controller state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Io,
    Timeout,
    Malformed,
    Disconnected,
    Unsupported,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportErrorKind::Io => "io",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Malformed => "malformed",
            TransportErrorKind::Disconnected => "disconnected",
            TransportErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// A failed exchange with the remote controller.
///
/// A command that returned this error must be treated as *not guaranteed
/// delivered*.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport {kind} error: {message}")]
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

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Io, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Malformed, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Disconnected, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unsupported, message)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string()),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected => Self::disconnected(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

// =============================================================================
// Start-Motion Rejections
// =============================================================================

/// Reason a start-motion request was refused.
///
/// Every variant is recoverable: the controller stays `Idle` and no
/// directional command has been sent.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// The end-of-travel switch for the requested direction is already engaged.
    #[error("roof is already at the requested limit")]
    AlreadyAtLimit,

    /// An external interlock (e.g. an unparked mount) forbids closing.
    #[error("closing is locked by an external interlock")]
    ExternalLock,

    /// The environmental safety collaborator reports unsafe conditions.
    #[error("conditions are unsafe to open")]
    UnsafeToOpen,

    /// The switches could not be read or the directional command was not delivered.
    #[error("transport error while starting motion")]
    TransportError,

    /// A motion request is already outstanding.
    #[error("a motion request is already in progress")]
    Busy,
}
