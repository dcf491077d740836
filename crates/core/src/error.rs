//! Error taxonomy shared by every reconcile path.

use serde::{Deserialize, Serialize};

/// Coarse classification used to decide how an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Object absent; drives create logic.
    NotFound,
    /// Object exists with conflicting identity or a stale version.
    Conflict,
    /// Timeouts and connection failures; retried on the next pass.
    TransientNetwork,
    /// Needs a spec edit before it can succeed.
    Validation,
    /// Needs cluster-state repair before it can succeed.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("network: {0}")]
    Network(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("{context}: expected status 200 but got {status}")]
    Remote { status: u16, context: String },
    #[error("orchestrator: {0}")]
    Orchestrator(String),
    #[error("reconcile cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Network(_) | Error::Remote { .. } | Error::Orchestrator(_) | Error::Cancelled => {
                ErrorKind::TransientNetwork
            }
            Error::Validation(_) => ErrorKind::Validation,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Error::Fatal(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(format!("invalid json: {}", e))
    }
}
