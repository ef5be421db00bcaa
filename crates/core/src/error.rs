//! Core error types

use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by every conquest operation.
///
/// No variant implies a partial mutation: operations validate before they
/// mutate, and the only state written on a failing path is the burn journal
/// of the two-phase token flow.
#[derive(Debug, Error)]
pub enum ConquestError {
    /// Bad input, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// State changed underneath the caller; refetch and retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Wallet is not allowed to act on the resource
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Unknown territory, contest, stake or nation
    #[error("Not found: {0}")]
    NotFound(String),

    /// An alliance forbids the action
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// On-chain burn/transfer was not confirmed
    #[error("External failure: {0}")]
    ExternalFailure(String),

    /// Storage or bookkeeping fault
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, serializable error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    Authorization,
    NotFound,
    Forbidden,
    ExternalFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::ExternalFailure => "external_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ConquestError {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConquestError::Validation(_) => ErrorKind::Validation,
            ConquestError::Conflict(_) => ErrorKind::Conflict,
            ConquestError::Authorization(_) => ErrorKind::Authorization,
            ConquestError::NotFound(_) => ErrorKind::NotFound,
            ConquestError::Forbidden(_) => ErrorKind::Forbidden,
            ConquestError::ExternalFailure(_) => ErrorKind::ExternalFailure,
            ConquestError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may refetch and retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConquestError::Conflict(_))
    }
}

impl From<crate::event_log::EventLogError> for ConquestError {
    fn from(error: crate::event_log::EventLogError) -> Self {
        ConquestError::Internal(error.to_string())
    }
}

/// Result type for conquest operations
pub type Result<T> = std::result::Result<T, ConquestError>;
