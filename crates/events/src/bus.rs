//! Event publishing/subscription contracts.
//!
//! - **At-least-once delivery**: a handler may see the same event more than once
//! - **No ordering guarantees** across event kinds or accounts
//! - **Redelivery on failure**: a handler returning `Err` makes the bus deliver
//!   that event to that handler again, according to the bus's own policy
//!
//! Handlers must therefore be idempotent.

use std::sync::Arc;

use thiserror::Error;

use billforge_core::BoxError;

use crate::event::BusEvent;

/// A bus subscriber.
///
/// `handle` runs on a bus delivery thread and may be called concurrently for
/// different events.
pub trait EventHandler: Send + Sync {
    /// Stable name; used for registration and in logs.
    fn name(&self) -> &str;

    /// Returning `Err` means "not consumed": the bus will redeliver.
    fn handle(&self, event: &BusEvent) -> Result<(), BoxError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("handler already registered: {0}")]
    AlreadyRegistered(String),
    #[error("handler not registered: {0}")]
    NotRegistered(String),
    #[error("bus is stopped")]
    Stopped,
}

/// Domain-agnostic persistent bus.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: BusEvent) -> Result<(), BusError>;

    fn register(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError>;

    fn unregister(&self, name: &str) -> Result<(), BusError>;
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, event: BusEvent) -> Result<(), BusError> {
        (**self).publish(event)
    }

    fn register(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
        (**self).register(handler)
    }

    fn unregister(&self, name: &str) -> Result<(), BusError> {
        (**self).unregister(name)
    }
}
