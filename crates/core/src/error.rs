//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Every variant
/// means the attempted operation was rejected as a whole and no state changed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A domain invariant would have been violated (e.g. arithmetic overflow).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The record exists but is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller is not allowed to perform the operation.
    ///
    /// The message is surfaced verbatim.
    #[error("{0}")]
    Unauthorized(String),

    /// Withdrawal attempted with nothing to withdraw.
    #[error("Insufficient balance")]
    InsufficientBalance,
}

impl DomainError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}
