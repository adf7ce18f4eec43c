//! Core notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use billforge_core::UserToken;

/// Unique notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified queue name: the owning service plus the queue within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName {
    pub service: String,
    pub queue: String,
}

impl QueueName {
    pub fn new(service: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            queue: queue.into(),
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.queue)
    }
}

/// Tenant/account routing keys and correlation token of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRouting {
    pub tenant_record_id: u64,
    pub account_record_id: u64,
    pub user_token: Option<UserToken>,
}

/// Claim state of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NotificationState {
    /// Waiting for its effective time, or due and unclaimed
    Available,
    /// Claimed by a dispatcher; its callback is running
    Processing {
        owner: String,
        claimed_at: DateTime<Utc>,
    },
}

/// A scheduled callback invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: NotificationId,
    pub queue: QueueName,
    /// JSON payload handed to the callback
    pub payload: serde_json::Value,
    /// Not dispatched before this time
    pub effective_at: DateTime<Utc>,
    /// Failed executions so far
    pub attempt: u32,
    pub routing: NotificationRouting,
    pub state: NotificationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationEntry {
    pub fn new(
        queue: QueueName,
        payload: serde_json::Value,
        effective_at: DateTime<Utc>,
        attempt: u32,
        routing: NotificationRouting,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            queue,
            payload,
            effective_at,
            attempt,
            routing,
            state: NotificationState::Available,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, NotificationState::Available)
    }

    /// Available and at or past its effective time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_available() && self.effective_at <= now
    }
}
