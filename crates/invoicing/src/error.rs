use thiserror::Error;

use billforge_core::BoxError;
use billforge_events::BusError;
use billforge_platform::LockFailedError;

/// Failures of an invoice run for one account.
///
/// Everything except `Unexpected` is transient from the listener's point of
/// view: the run can simply be attempted again later.
#[derive(Debug, Error)]
pub enum InvoiceDispatchError {
    #[error("invoice api error: {0}")]
    InvoiceApi(String),
    #[error(transparent)]
    LockFailed(#[from] LockFailedError),
    #[error("account api error: {0}")]
    Account(String),
    #[error("subscription api error: {0}")]
    Subscription(String),
    #[error("catalog api error: {0}")]
    Catalog(String),
    #[error("event bus error: {0}")]
    EventBus(#[from] BusError),
    #[error(transparent)]
    Unexpected(BoxError),
}

impl InvoiceDispatchError {
    pub fn unexpected(cause: impl Into<BoxError>) -> Self {
        Self::Unexpected(cause.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, InvoiceDispatchError::Unexpected(_))
    }
}
