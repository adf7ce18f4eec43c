//! The bus-facing half of a retrying listener.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use billforge_core::BoxError;
use billforge_events::BusEvent;

use crate::handler::SubscriberQueueHandler;
use crate::outcome::Outcome;
use crate::service::{RetryableService, RetryableServiceError};

#[derive(Debug, Error)]
pub enum SubscriberError {
    /// The action failed for good; its error, untouched.
    #[error(transparent)]
    Permanent(BoxError),
    /// The action asked for a retry but the retry could not be stored, so
    /// the event must not count as consumed.
    #[error("failed to park event for retry: {source}")]
    Schedule {
        #[source]
        source: RetryableServiceError,
        cause: BoxError,
    },
}

impl SubscriberError {
    /// The error to hand back to the bus. A permanent failure is returned
    /// as the action produced it.
    pub fn into_bus_error(self) -> BoxError {
        match self {
            SubscriberError::Permanent(err) => err,
            other => Box::new(other),
        }
    }
}

/// Runs bound actions for bus events and parks retryable failures.
#[derive(Debug, Clone)]
pub struct RetryableSubscriber {
    service: Arc<RetryableService>,
    handler: Arc<SubscriberQueueHandler>,
}

impl RetryableSubscriber {
    pub fn new(service: Arc<RetryableService>, handler: Arc<SubscriberQueueHandler>) -> Self {
        Self { service, handler }
    }

    /// `Ok` means the bus may consider the event consumed: it either
    /// succeeded or now has a retry entry.
    pub fn handle_event(&self, event: &BusEvent) -> Result<(), SubscriberError> {
        match self.handler.dispatch(event) {
            Outcome::Success => Ok(()),
            Outcome::RetryableFailure(err) => {
                warn!(
                    service = %self.service.service_name(),
                    kind = %event.kind(),
                    object_id = %event.object_id(),
                    error = %err,
                    "event handling failed, scheduling retry"
                );
                match self.service.schedule_retry(event, &err) {
                    Ok(_) => Ok(()),
                    Err(source) => Err(SubscriberError::Schedule {
                        source,
                        cause: err.into_cause(),
                    }),
                }
            }
            Outcome::PermanentFailure(err) => Err(SubscriberError::Permanent(err)),
        }
    }
}
