//! Notification storage implementations.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::types::{NotificationEntry, NotificationId, NotificationState, QueueName};

/// Notification store abstraction.
///
/// Each method is atomic with respect to the entry it touches; two
/// dispatchers can never both claim the same entry.
pub trait NotificationStore: Send + Sync {
    /// Insert a new entry.
    fn insert(&self, entry: NotificationEntry) -> Result<NotificationId, StoreError>;

    /// Get an entry by ID.
    fn get(&self, id: NotificationId) -> Result<Option<NotificationEntry>, StoreError>;

    /// Claim the earliest due, available entry of one of `queues`.
    /// Returns None if nothing is due.
    fn claim_next_due(
        &self,
        queues: &[QueueName],
        now: DateTime<Utc>,
        owner: &str,
    ) -> Result<Option<NotificationEntry>, StoreError>;

    /// Delete a claimed entry whose processing is finished.
    fn complete(&self, id: NotificationId) -> Result<(), StoreError>;

    /// Return a claimed entry to available with a new due time and attempt count.
    fn reschedule(
        &self,
        id: NotificationId,
        effective_at: DateTime<Utc>,
        attempt: u32,
    ) -> Result<(), StoreError>;

    /// Return a claimed entry to available unchanged.
    fn release(&self, id: NotificationId) -> Result<(), StoreError>;

    /// Return every claim taken before `claimed_before` to available.
    fn reap_expired_claims(&self, claimed_before: DateTime<Utc>) -> Result<usize, StoreError>;

    /// All entries (any state) of a queue, earliest due first.
    fn pending_for_queue(&self, queue: &QueueName) -> Result<Vec<NotificationEntry>, StoreError>;
}

/// Notification store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("notification not found: {0}")]
    NotFound(NotificationId),
    #[error("notification already exists: {0}")]
    AlreadyExists(NotificationId),
    #[error("notification is not claimed: {0}")]
    NotClaimed(NotificationId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory notification store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    entries: RwLock<HashMap<NotificationId, NotificationEntry>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<NotificationId, NotificationEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<NotificationId, NotificationEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn claimed(
    entries: &mut HashMap<NotificationId, NotificationEntry>,
    id: NotificationId,
) -> Result<&mut NotificationEntry, StoreError> {
    let entry = entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    if entry.is_available() {
        return Err(StoreError::NotClaimed(id));
    }
    Ok(entry)
}

impl NotificationStore for InMemoryNotificationStore {
    fn insert(&self, entry: NotificationEntry) -> Result<NotificationId, StoreError> {
        let mut entries = self.write();
        if entries.contains_key(&entry.id) {
            return Err(StoreError::AlreadyExists(entry.id));
        }
        let id = entry.id;
        entries.insert(id, entry);
        Ok(id)
    }

    fn get(&self, id: NotificationId) -> Result<Option<NotificationEntry>, StoreError> {
        Ok(self.read().get(&id).cloned())
    }

    fn claim_next_due(
        &self,
        queues: &[QueueName],
        now: DateTime<Utc>,
        owner: &str,
    ) -> Result<Option<NotificationEntry>, StoreError> {
        let mut entries = self.write();

        // Earliest effective time first, creation time breaks ties
        let next = entries
            .values()
            .filter(|e| e.is_due(now) && queues.contains(&e.queue))
            .min_by_key(|e| (e.effective_at, e.created_at))
            .map(|e| e.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let entry = entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.state = NotificationState::Processing {
            owner: owner.to_string(),
            claimed_at: now,
        };
        entry.updated_at = now;
        Ok(Some(entry.clone()))
    }

    fn complete(&self, id: NotificationId) -> Result<(), StoreError> {
        let mut entries = self.write();
        claimed(&mut entries, id)?;
        entries.remove(&id);
        Ok(())
    }

    fn reschedule(
        &self,
        id: NotificationId,
        effective_at: DateTime<Utc>,
        attempt: u32,
    ) -> Result<(), StoreError> {
        let mut entries = self.write();
        let entry = claimed(&mut entries, id)?;
        entry.state = NotificationState::Available;
        entry.effective_at = effective_at;
        entry.attempt = attempt;
        entry.updated_at = Utc::now();
        Ok(())
    }

    fn release(&self, id: NotificationId) -> Result<(), StoreError> {
        let mut entries = self.write();
        let entry = claimed(&mut entries, id)?;
        entry.state = NotificationState::Available;
        entry.updated_at = Utc::now();
        Ok(())
    }

    fn reap_expired_claims(&self, claimed_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.write();
        let mut reaped = 0;
        for entry in entries.values_mut() {
            if let NotificationState::Processing { claimed_at, .. } = entry.state
                && claimed_at < claimed_before
            {
                entry.state = NotificationState::Available;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    fn pending_for_queue(&self, queue: &QueueName) -> Result<Vec<NotificationEntry>, StoreError> {
        let mut result: Vec<_> = self
            .read()
            .values()
            .filter(|e| &e.queue == queue)
            .cloned()
            .collect();
        result.sort_by_key(|e| (e.effective_at, e.created_at));
        Ok(result)
    }
}
