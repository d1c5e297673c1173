//! Runtime error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a single transport.
///
/// These never leave the runtime module; [`super::RuntimeClient`] maps them
/// onto [`RuntimeError`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The daemon could not be reached (socket missing, binary missing,
    /// connection refused).
    #[error("daemon unreachable: {0}")]
    Connect(String),

    /// The daemon answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The call exceeded its bound.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("no such unit: {0}")]
    NotFound(String),

    #[error("unit name already in use: {0}")]
    Conflict(String),

    /// The daemon refused the request for another reason.
    #[error("daemon rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl TransportError {
    /// The daemon gave an authoritative answer; trying another transport
    /// would not change it.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Conflict(_) | Self::Rejected { .. }
        )
    }
}

/// Errors surfaced to the orchestrator and reconciliation engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// No transport could reach the daemon.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("runtime unit not found: {0}")]
    UnitNotFound(String),

    #[error("runtime unit already exists: {0}")]
    AlreadyExists(String),

    /// A write exceeded its bound. The outcome is unknown and the call must
    /// not be retried automatically.
    #[error("{operation} on {unit} timed out; outcome unknown")]
    Timeout {
        operation: &'static str,
        unit: String,
    },

    #[error("runtime rejected {operation} on {unit}: {message}")]
    Rejected {
        operation: &'static str,
        unit: String,
        message: String,
    },
}

impl RuntimeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnitNotFound(_))
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "runtime_unavailable",
            Self::UnitNotFound(_) => "unit_not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Timeout { .. } => "operation_timeout",
            Self::Rejected { .. } => "runtime_rejected",
        }
    }
}
