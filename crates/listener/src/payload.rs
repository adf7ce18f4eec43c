//! Durable payload of a retry entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use billforge_events::BusEvent;

/// An event parked for replay, plus why it was parked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryNotification {
    pub event: BusEvent,
    pub first_failure_at: DateTime<Utc>,
    /// Display form of the failure that caused the first retry
    pub cause: String,
}
