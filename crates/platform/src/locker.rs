//! Global (cross-thread) named locks.
//!
//! Account-level operations serialize on a lock keyed by `(service, key)`.
//! Failing to acquire within the retry budget is an ordinary error the caller
//! can treat as transient.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, env_duration_ms, env_or};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to acquire lock {key} after {attempts} attempts")]
pub struct LockFailedError {
    pub key: String,
    pub attempts: u32,
}

/// Named lock provider.
pub trait GlobalLocker: Send + Sync {
    /// Try to take the lock, waiting between up to `retries` additional attempts.
    fn lock_with_retries(
        &self,
        service: &str,
        key: &str,
        retries: u32,
    ) -> Result<GlobalLock, LockFailedError>;

    fn is_free(&self, service: &str, key: &str) -> bool;
}

/// Held lock; released on drop.
pub struct GlobalLock {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl GlobalLock {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl core::fmt::Debug for GlobalLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlobalLock").field("key", &self.key).finish()
    }
}

impl Drop for GlobalLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Retry budget for lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerConfig {
    pub retries: u32,
    pub wait_per_retry: Duration,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            wait_per_retry: Duration::from_millis(100),
        }
    }
}

impl LockerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            retries: env_or("BILLFORGE_LOCK_RETRIES", default.retries)?,
            wait_per_retry: env_duration_ms("BILLFORGE_LOCK_WAIT_MS", default.wait_per_retry)?,
        })
    }
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// In-process locker backed by a mutex-guarded key set.
#[derive(Debug, Clone)]
pub struct MemoryGlobalLocker {
    table: Arc<LockTable>,
    wait_per_retry: Duration,
}

impl Default for MemoryGlobalLocker {
    fn default() -> Self {
        Self::new(LockerConfig::default().wait_per_retry)
    }
}

impl MemoryGlobalLocker {
    pub fn new(wait_per_retry: Duration) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            wait_per_retry,
        }
    }

    fn lock_key(service: &str, key: &str) -> String {
        format!("{service}:{key}")
    }

    /// Guard for a key just inserted into the held set.
    fn guard(&self, lock_key: String) -> GlobalLock {
        let table = self.table.clone();
        let release_key = lock_key.clone();
        GlobalLock {
            key: lock_key,
            release: Some(Box::new(move || {
                let mut held = table.held.lock().unwrap_or_else(PoisonError::into_inner);
                held.remove(&release_key);
                table.released.notify_all();
            })),
        }
    }
}

impl GlobalLocker for MemoryGlobalLocker {
    fn lock_with_retries(
        &self,
        service: &str,
        key: &str,
        retries: u32,
    ) -> Result<GlobalLock, LockFailedError> {
        let lock_key = Self::lock_key(service, key);
        let mut held = self.table.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.insert(lock_key.clone()) {
            return Ok(self.guard(lock_key));
        }

        // Any release wakes every waiter; a retry is used up only when its wait expires
        for attempt in 1..=retries {
            debug!(lock = %lock_key, attempt, "lock busy, waiting");
            let deadline = Instant::now() + self.wait_per_retry;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                held = self
                    .table
                    .released
                    .wait_timeout(held, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
                if held.insert(lock_key.clone()) {
                    return Ok(self.guard(lock_key));
                }
            }
        }

        Err(LockFailedError {
            key: lock_key,
            attempts: retries + 1,
        })
    }

    fn is_free(&self, service: &str, key: &str) -> bool {
        let held = self.table.held.lock().unwrap_or_else(PoisonError::into_inner);
        !held.contains(&Self::lock_key(service, key))
    }
}
