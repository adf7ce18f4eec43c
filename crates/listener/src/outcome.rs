//! Action outcomes.

use thiserror::Error;

use billforge_core::BoxError;

/// How a subscriber action went.
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// Run the event again later.
    RetryableFailure(RetryError),
    /// Give up; the failure goes back to whoever delivered the event.
    PermanentFailure(BoxError),
}

impl Outcome {
    pub fn retry(cause: impl Into<BoxError>) -> Self {
        Self::RetryableFailure(RetryError::new(cause))
    }

    pub fn permanent(cause: impl Into<BoxError>) -> Self {
        Self::PermanentFailure(cause.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// The single retry signal; wraps whatever made the action fail.
#[derive(Debug, Error)]
#[error("retryable failure: {cause}")]
pub struct RetryError {
    #[source]
    cause: BoxError,
}

impl RetryError {
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn into_cause(self) -> BoxError {
        self.cause
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use billforge_core::DomainError;

    #[test]
    fn retry_error_exposes_its_cause() {
        let err = RetryError::new(DomainError::Conflict("stale".into()));

        assert!(err.cause().downcast_ref::<DomainError>().is_some());
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("conflict: stale".to_string())
        );
        assert_eq!(err.to_string(), "retryable failure: conflict: stale");
    }

    #[test]
    fn constructors_pick_the_variant() {
        assert!(Outcome::Success.is_success());
        assert!(matches!(Outcome::retry("busy"), Outcome::RetryableFailure(_)));
        assert!(matches!(Outcome::permanent("bad"), Outcome::PermanentFailure(_)));
    }
}
