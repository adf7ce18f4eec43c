//! Durable notification queue: "run this callback at time T for this payload".
//!
//! ## Design
//!
//! - Entries live in a [`NotificationStore`]; queues are only registrations
//!   of a callback over a slice of the store, so entries outlive their queue
//! - Every store mutation (insert, claim, reschedule, delete) is atomic per entry
//! - Delivery is at-least-once: an entry is deleted only after its callback
//!   returns `Ok`, and abandoned claims are reaped back to available
//! - Failed callbacks are rescheduled by the queue's [`RetryPolicy`] until it
//!   gives up, then dropped and logged at error level
//!
//! ## Components
//!
//! - `NotificationEntry`: payload, due time, attempt count, routing keys
//! - `NotificationStore`: persistence (in-memory implementation provided)
//! - `NotificationQueueService`: queue registry plus dispatcher threads
//! - `NotificationQueue`: handle to one registered queue

pub mod retry;
pub mod service;
pub mod store;
pub mod types;

pub use retry::{BackoffStrategy, RetryPolicy};
pub use service::{
    DispatcherStats, NotificationError, NotificationQueue, NotificationQueueConfig,
    NotificationQueueError, NotificationQueueHandler, NotificationQueueService,
};
pub use store::{InMemoryNotificationStore, NotificationStore, StoreError};
pub use types::{NotificationEntry, NotificationId, NotificationRouting, NotificationState, QueueName};
