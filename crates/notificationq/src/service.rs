//! Notification queue service: queue registry plus dispatcher threads.
//!
//! Dispatch of one entry:
//! 1. claim the earliest due entry of a started queue (Available → Processing)
//! 2. enter the queue's gate; a queue stopped in the meantime gets the claim back
//! 3. run the callback, then settle: delete, reschedule or drop
//!
//! `stop_queue` closes the gate and waits for callbacks already inside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use billforge_core::{BoxError, Clock, Service};
use billforge_platform::{ConfigError, env_duration_ms, env_or};

use crate::retry::RetryPolicy;
use crate::store::{NotificationStore, StoreError};
use crate::types::{NotificationEntry, NotificationId, NotificationRouting, QueueName};

/// Callback of a notification queue, invoked once per due entry.
pub trait NotificationQueueHandler: Send + Sync {
    fn handle_ready_notification(&self, entry: &NotificationEntry) -> Result<(), NotificationError>;
}

impl<F> NotificationQueueHandler for F
where
    F: Fn(&NotificationEntry) -> Result<(), NotificationError> + Send + Sync,
{
    fn handle_ready_notification(&self, entry: &NotificationEntry) -> Result<(), NotificationError> {
        self(entry)
    }
}

/// Failure reported by a callback.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Try again later, as the queue's retry policy allows.
    #[error("retryable notification failure: {0}")]
    Retry(#[source] BoxError),
    /// Never retry; the entry is dropped.
    #[error("permanent notification failure: {0}")]
    Permanent(#[source] BoxError),
}

impl NotificationError {
    pub fn retry(cause: impl Into<BoxError>) -> Self {
        Self::Retry(cause.into())
    }

    pub fn permanent(cause: impl Into<BoxError>) -> Self {
        Self::Permanent(cause.into())
    }
}

#[derive(Debug, Error)]
pub enum NotificationQueueError {
    #[error("notification queue already exists: {0}")]
    AlreadyExists(QueueName),
    #[error("no such notification queue: {0}")]
    NoSuchQueue(QueueName),
    #[error("failed to serialize notification payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dispatcher pool sizing and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQueueConfig {
    pub name: String,
    pub worker_threads: usize,
    /// How long an idle dispatcher sleeps before polling the store again
    pub poll_interval: Duration,
    /// A claim older than this belongs to a dead dispatcher and is reaped
    pub claim_timeout: Duration,
}

impl Default for NotificationQueueConfig {
    fn default() -> Self {
        Self {
            name: "notification-queue-service".to_string(),
            worker_threads: 2,
            poll_interval: Duration::from_millis(100),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

impl NotificationQueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            worker_threads: env_or("BILLFORGE_NOTIFICATIONQ_THREADS", default.worker_threads)?,
            poll_interval: env_duration_ms("BILLFORGE_NOTIFICATIONQ_POLL_MS", default.poll_interval)?,
            claim_timeout: env_duration_ms(
                "BILLFORGE_NOTIFICATIONQ_CLAIM_TIMEOUT_MS",
                default.claim_timeout,
            )?,
            ..default
        })
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub processed: u64,
    pub succeeded: u64,
    pub rescheduled: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Gate {
    started: bool,
    in_flight: usize,
}

struct QueueRegistration {
    name: QueueName,
    policy: RetryPolicy,
    handler: Arc<dyn NotificationQueueHandler>,
    gate: Mutex<Gate>,
    drained: Condvar,
}

impl QueueRegistration {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_started(&self) -> bool {
        self.gate().started
    }

    fn open(&self) -> bool {
        let mut gate = self.gate();
        !std::mem::replace(&mut gate.started, true)
    }

    /// Close the gate, then wait until no callback of this queue is running.
    fn close_and_drain(&self) -> bool {
        let mut gate = self.gate();
        let was_started = std::mem::replace(&mut gate.started, false);
        while gate.in_flight > 0 {
            gate = self
                .drained
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        was_started
    }

    fn try_enter(&self) -> Option<InFlight<'_>> {
        let mut gate = self.gate();
        if !gate.started {
            return None;
        }
        gate.in_flight += 1;
        Some(InFlight(self))
    }
}

/// A callback running inside a queue's gate; leaves it on drop, even on panic.
struct InFlight<'a>(&'a QueueRegistration);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gate = self.0.gate();
        gate.in_flight -= 1;
        if gate.in_flight == 0 {
            self.0.drained.notify_all();
        }
    }
}

enum Dispatch {
    Idle,
    Released,
    Ran,
}

struct Shared {
    config: NotificationQueueConfig,
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    queues: RwLock<HashMap<QueueName, Arc<QueueRegistration>>>,
    stats: Mutex<DispatcherStats>,
    shutdown: AtomicBool,
    idle: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn registration(&self, name: &QueueName) -> Option<Arc<QueueRegistration>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn started_queues(&self) -> Vec<QueueName> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.is_started())
            .map(|r| r.name.clone())
            .collect()
    }

    fn stats(&self) -> MutexGuard<'_, DispatcherStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_workers(&self) {
        let _idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }

    fn dispatch_next(&self, owner: &str) -> Result<Dispatch, NotificationQueueError> {
        let queues = self.started_queues();
        if queues.is_empty() {
            return Ok(Dispatch::Idle);
        }
        let Some(entry) = self.store.claim_next_due(&queues, self.clock.now(), owner)? else {
            return Ok(Dispatch::Idle);
        };

        let registration = self.registration(&entry.queue);
        let guard = registration.as_deref().and_then(QueueRegistration::try_enter);
        let (Some(registration), Some(_in_flight)) = (registration.as_deref(), guard) else {
            // Stopped or deleted between listing and claiming
            self.store.release(entry.id)?;
            return Ok(Dispatch::Released);
        };

        debug!(
            queue = %entry.queue,
            notification_id = %entry.id,
            attempt = entry.attempt,
            owner,
            "dispatching notification"
        );
        let result = registration.handler.handle_ready_notification(&entry);
        self.settle(registration, &entry, result)?;
        Ok(Dispatch::Ran)
    }

    fn settle(
        &self,
        registration: &QueueRegistration,
        entry: &NotificationEntry,
        result: Result<(), NotificationError>,
    ) -> Result<(), StoreError> {
        self.stats().processed += 1;

        match result {
            Ok(()) => {
                self.store.complete(entry.id)?;
                self.stats().succeeded += 1;
                debug!(queue = %entry.queue, notification_id = %entry.id, "notification completed");
            }
            Err(NotificationError::Retry(cause)) if registration.policy.should_retry(entry.attempt) => {
                let attempt = entry.attempt + 1;
                let delay = registration.policy.delay_for_attempt(attempt);
                let effective_at = after(self.clock.now(), delay)
                    .max(after(entry.effective_at, Duration::from_millis(1)));
                self.store.reschedule(entry.id, effective_at, attempt)?;
                self.stats().rescheduled += 1;
                warn!(
                    queue = %entry.queue,
                    notification_id = %entry.id,
                    attempt,
                    effective_at = %effective_at,
                    error = %cause,
                    "notification failed, rescheduled"
                );
            }
            Err(NotificationError::Retry(cause)) => {
                self.store.complete(entry.id)?;
                self.stats().dropped += 1;
                error!(
                    queue = %entry.queue,
                    notification_id = %entry.id,
                    attempts = entry.attempt + 1,
                    payload = %entry.payload,
                    error = %cause,
                    "notification retries exhausted, dropping"
                );
            }
            Err(NotificationError::Permanent(cause)) => {
                self.store.complete(entry.id)?;
                self.stats().dropped += 1;
                error!(
                    queue = %entry.queue,
                    notification_id = %entry.id,
                    attempts = entry.attempt + 1,
                    payload = %entry.payload,
                    error = %cause,
                    "notification failed permanently, dropping"
                );
            }
        }
        Ok(())
    }

    fn reap_expired_claims(&self) -> Result<usize, StoreError> {
        let timeout = chrono::Duration::from_std(self.config.claim_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = self.clock.now().checked_sub_signed(timeout) else {
            return Ok(0);
        };
        let reaped = self.store.reap_expired_claims(cutoff)?;
        if reaped > 0 {
            warn!(service = %self.config.name, reaped, "returned abandoned notification claims");
        }
        Ok(reaped)
    }
}

fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handle to one registered queue.
#[derive(Clone)]
pub struct NotificationQueue {
    shared: Arc<Shared>,
    registration: Arc<QueueRegistration>,
}

impl core::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("name", &self.registration.name)
            .field("started", &self.registration.is_started())
            .finish()
    }
}

impl NotificationQueue {
    pub fn name(&self) -> &QueueName {
        &self.registration.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.registration.policy
    }

    /// Schedule `payload` for dispatch at or after `effective_at`.
    pub fn record_future_notification<T: Serialize>(
        &self,
        effective_at: DateTime<Utc>,
        payload: &T,
        routing: NotificationRouting,
    ) -> Result<NotificationId, NotificationQueueError> {
        self.record_failed_notification(effective_at, payload, routing, 0)
    }

    /// Like `record_future_notification`, for work that already failed
    /// `failed_attempts` times elsewhere. The retry budget counts them.
    pub fn record_failed_notification<T: Serialize>(
        &self,
        effective_at: DateTime<Utc>,
        payload: &T,
        routing: NotificationRouting,
        failed_attempts: u32,
    ) -> Result<NotificationId, NotificationQueueError> {
        self.ensure_registered()?;
        let payload = serde_json::to_value(payload)?;
        let entry = NotificationEntry::new(
            self.registration.name.clone(),
            payload,
            effective_at,
            failed_attempts,
            routing,
            self.shared.clock.now(),
        );
        let id = self.shared.store.insert(entry)?;
        debug!(
            queue = %self.registration.name,
            notification_id = %id,
            effective_at = %effective_at,
            attempt = failed_attempts,
            "notification recorded"
        );
        self.shared.notify_workers();
        Ok(id)
    }

    pub fn start_queue(&self) -> Result<(), NotificationQueueError> {
        self.ensure_registered()?;
        if self.registration.open() {
            info!(queue = %self.registration.name, "notification queue started");
            self.shared.notify_workers();
        }
        Ok(())
    }

    /// Stop dispatching. Returns once callbacks already running for this
    /// queue have finished; no callback starts after the call.
    ///
    /// Must not be called from this queue's own callback.
    pub fn stop_queue(&self) -> Result<(), NotificationQueueError> {
        self.ensure_registered()?;
        if self.registration.close_and_drain() {
            info!(queue = %self.registration.name, "notification queue stopped");
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.registration.is_started()
    }

    /// Entries of this queue not yet completed, earliest first.
    pub fn future_notifications(&self) -> Result<Vec<NotificationEntry>, NotificationQueueError> {
        Ok(self.shared.store.pending_for_queue(&self.registration.name)?)
    }

    fn ensure_registered(&self) -> Result<(), NotificationQueueError> {
        match self.shared.registration(&self.registration.name) {
            Some(current) if Arc::ptr_eq(&current, &self.registration) => Ok(()),
            _ => Err(NotificationQueueError::NoSuchQueue(
                self.registration.name.clone(),
            )),
        }
    }
}

/// Queue registry and dispatcher pool over one notification store.
pub struct NotificationQueueService {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl core::fmt::Debug for NotificationQueueService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationQueueService")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl NotificationQueueService {
    pub fn new(
        config: NotificationQueueConfig,
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                clock,
                queues: RwLock::new(HashMap::new()),
                stats: Mutex::new(DispatcherStats::default()),
                shutdown: AtomicBool::new(false),
                idle: Mutex::new(()),
                wake: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register a queue. It dispatches nothing until `start_queue`.
    pub fn create_notification_queue(
        &self,
        service: &str,
        queue: &str,
        policy: RetryPolicy,
        handler: Arc<dyn NotificationQueueHandler>,
    ) -> Result<NotificationQueue, NotificationQueueError> {
        let name = QueueName::new(service, queue);
        let mut queues = self
            .shared
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(&name) {
            return Err(NotificationQueueError::AlreadyExists(name));
        }

        let registration = Arc::new(QueueRegistration {
            name: name.clone(),
            policy,
            handler,
            gate: Mutex::new(Gate::default()),
            drained: Condvar::new(),
        });
        queues.insert(name.clone(), registration.clone());
        info!(service = %self.shared.config.name, queue = %name, "notification queue created");

        Ok(NotificationQueue {
            shared: self.shared.clone(),
            registration,
        })
    }

    /// Unregister a queue, draining its running callbacks first. Its
    /// pending entries stay in the store.
    pub fn delete_notification_queue(
        &self,
        service: &str,
        queue: &str,
    ) -> Result<(), NotificationQueueError> {
        let name = QueueName::new(service, queue);
        let removed = self
            .shared
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
        let Some(registration) = removed else {
            return Err(NotificationQueueError::NoSuchQueue(name));
        };

        registration.close_and_drain();
        info!(service = %self.shared.config.name, queue = %name, "notification queue deleted");
        Ok(())
    }

    pub fn notification_queue(
        &self,
        service: &str,
        queue: &str,
    ) -> Result<NotificationQueue, NotificationQueueError> {
        let name = QueueName::new(service, queue);
        let registration = self
            .shared
            .registration(&name)
            .ok_or(NotificationQueueError::NoSuchQueue(name))?;
        Ok(NotificationQueue {
            shared: self.shared.clone(),
            registration,
        })
    }

    /// Dispatch every due entry of the started queues on the calling thread.
    /// Returns the number of callbacks run.
    pub fn run_due_notifications(&self) -> Result<usize, NotificationQueueError> {
        let mut ran = 0;
        loop {
            match self.shared.dispatch_next("caller")? {
                Dispatch::Ran => ran += 1,
                Dispatch::Released => {}
                Dispatch::Idle => return Ok(ran),
            }
        }
    }

    /// Return claims older than `claim_timeout` to available.
    pub fn reap_expired_claims(&self) -> Result<usize, NotificationQueueError> {
        Ok(self.shared.reap_expired_claims()?)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats().clone()
    }

    pub fn is_running(&self) -> bool {
        !self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl Service for NotificationQueueService {
    fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn start(&self) -> Result<(), BoxError> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() {
            return Ok(());
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);

        for i in 0..self.shared.config.worker_threads.max(1) {
            let shared = self.shared.clone();
            let name = format!("{}-{}", shared.config.name, i);
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(shared, name))?;
            workers.push(join);
        }
        info!(service = %self.shared.config.name, threads = workers.len(), "notification dispatchers started");
        Ok(())
    }

    /// Graceful: dispatchers finish their current callback, due entries stay stored.
    fn stop(&self) -> Result<(), BoxError> {
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if workers.is_empty() {
            return Ok(());
        }

        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.notify_workers();
        for join in workers {
            let _ = join.join();
        }
        info!(service = %self.shared.config.name, "notification dispatchers stopped");
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>, owner: String) {
    debug!(dispatcher = %owner, "notification dispatcher running");
    while !shared.shutdown.load(Ordering::SeqCst) {
        match shared.dispatch_next(&owner) {
            Ok(Dispatch::Ran | Dispatch::Released) => continue,
            Ok(Dispatch::Idle) => {
                if let Err(err) = shared.reap_expired_claims() {
                    warn!(dispatcher = %owner, error = %err, "failed to reap notification claims");
                }
            }
            Err(err) => {
                error!(dispatcher = %owner, error = %err, "notification dispatch failed");
            }
        }

        let idle = shared.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let _ = shared
            .wake
            .wait_timeout(idle, shared.config.poll_interval)
            .unwrap_or_else(PoisonError::into_inner);
    }
    debug!(dispatcher = %owner, "notification dispatcher exiting");
}
