//! Retrying bus listeners.
//!
//! A [`RetryableSubscriber`] runs the actions bound in a
//! [`SubscriberQueueHandler`] for each bus event. A retryable failure parks
//! the event in a notification queue owned by a [`RetryableService`], which
//! later replays it through the same handler (never through the bus).
//!
//! Actions report how they went with an [`Outcome`] instead of an error type
//! the retry layer would have to know about.

pub mod handler;
pub mod outcome;
pub mod payload;
pub mod service;
pub mod subscriber;

pub use handler::SubscriberQueueHandler;
pub use outcome::{Outcome, RetryError};
pub use payload::RetryNotification;
pub use service::{RetryableService, RetryableServiceError};
pub use subscriber::{RetryableSubscriber, SubscriberError};
