//! Errors shared by every billing crate.

use thiserror::Error;

/// Type-erased error that crosses crate seams (handlers, callbacks, services).
///
/// Callers that need the original cause downcast it (`err.downcast_ref::<T>()`).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Deterministic business failure. Retrying the same call gives the same
/// answer, so listeners treat it as permanent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Identifier that does not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The record changed or already exists.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
