//! In-memory persistent bus.
//!
//! - Fan-out at publish time: one delivery per registered handler
//! - A failed delivery is redelivered to the same handler after
//!   `redelivery_delay`, up to `max_delivery_attempts`, then dead-lettered
//! - A pool of delivery threads, or `deliver_pending` on the calling thread

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use billforge_core::{BoxError, Service};
use billforge_platform::{ConfigError, env_duration_ms, env_or};

use crate::bus::{BusError, EventBus, EventHandler};
use crate::event::BusEvent;

/// Delivery policy and thread pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub name: String,
    pub worker_threads: usize,
    /// Total deliveries attempted per (event, handler) before dead-lettering.
    pub max_delivery_attempts: u32,
    pub redelivery_delay: Duration,
    /// Upper bound on how long an idle worker sleeps before re-checking.
    pub poll_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "persistent-bus".to_string(),
            worker_threads: 2,
            max_delivery_attempts: 3,
            redelivery_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            worker_threads: env_or("BILLFORGE_BUS_THREADS", default.worker_threads)?,
            max_delivery_attempts: env_or(
                "BILLFORGE_BUS_MAX_DELIVERY_ATTEMPTS",
                default.max_delivery_attempts,
            )?,
            redelivery_delay: env_duration_ms(
                "BILLFORGE_BUS_REDELIVERY_DELAY_MS",
                default.redelivery_delay,
            )?,
            ..default
        })
    }
}

/// A delivery the bus gave up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub handler: String,
    pub event: BusEvent,
    pub attempts: u32,
    pub error: String,
}

struct Delivery {
    handler: Arc<dyn EventHandler>,
    event: BusEvent,
    attempt: u32,
    not_before: Instant,
}

#[derive(Default)]
struct BusState {
    handlers: Vec<Arc<dyn EventHandler>>,
    pending: VecDeque<Delivery>,
    dead_letters: Vec<DeadLetter>,
}

impl BusState {
    fn take_ready(&mut self, now: Instant) -> Option<Delivery> {
        let idx = self.pending.iter().position(|d| d.not_before <= now)?;
        let delivery = self.pending.remove(idx)?;
        Some(delivery)
    }
}

struct Shared {
    config: BusConfig,
    state: Mutex<BusState>,
    changed: Condvar,
    shutdown: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, mut delivery: Delivery) {
        let result = delivery.handler.handle(&delivery.event);

        let mut state = self.lock();
        delivery.attempt += 1;

        match result {
            Ok(()) => {
                debug!(
                    bus = %self.config.name,
                    handler = delivery.handler.name(),
                    kind = %delivery.event.kind(),
                    "event delivered"
                );
            }
            Err(err) if delivery.attempt < self.config.max_delivery_attempts => {
                warn!(
                    bus = %self.config.name,
                    handler = delivery.handler.name(),
                    kind = %delivery.event.kind(),
                    attempt = delivery.attempt,
                    error = %err,
                    "event delivery failed, scheduling redelivery"
                );
                delivery.not_before = Instant::now() + self.config.redelivery_delay;
                state.pending.push_back(delivery);
            }
            Err(err) => {
                error!(
                    bus = %self.config.name,
                    handler = delivery.handler.name(),
                    kind = %delivery.event.kind(),
                    attempts = delivery.attempt,
                    error = %err,
                    "event delivery failed permanently, dead-lettering"
                );
                state.dead_letters.push(DeadLetter {
                    handler: delivery.handler.name().to_string(),
                    event: delivery.event,
                    attempts: delivery.attempt,
                    error: err.to_string(),
                });
            }
        }

        self.changed.notify_all();
    }
}

/// In-memory bus for tests/dev and single-process deployments.
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl core::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl InMemoryEventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BusState::default()),
                changed: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Deliver every ready delivery on the calling thread, including
    /// redeliveries that become ready while draining. Returns the number of
    /// delivery attempts made.
    pub fn deliver_pending(&self) -> usize {
        let mut attempts = 0;
        loop {
            let next = self.shared.lock().take_ready(Instant::now());
            match next {
                Some(delivery) => {
                    self.shared.deliver(delivery);
                    attempts += 1;
                }
                None => return attempts,
            }
        }
    }

    /// Deliveries waiting (including scheduled redeliveries).
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.lock().dead_letters.clone()
    }

    pub fn is_running(&self) -> bool {
        !self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    /// Rejected with `Stopped` once `stop()` was called, until the next `start()`.
    fn publish(&self, event: BusEvent) -> Result<(), BusError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(BusError::Stopped);
        }
        let mut state = self.shared.lock();
        let now = Instant::now();
        let handlers = state.handlers.clone();
        if handlers.is_empty() {
            debug!(bus = %self.shared.config.name, kind = %event.kind(), "no handlers registered, event dropped");
        }
        for handler in handlers {
            state.pending.push_back(Delivery {
                handler,
                event: event.clone(),
                attempt: 0,
                not_before: now,
            });
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn register(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
        let mut state = self.shared.lock();
        if state.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(BusError::AlreadyRegistered(handler.name().to_string()));
        }
        info!(bus = %self.shared.config.name, handler = handler.name(), "handler registered");
        state.handlers.push(handler);
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<(), BusError> {
        let mut state = self.shared.lock();
        let before = state.handlers.len();
        state.handlers.retain(|h| h.name() != name);
        if state.handlers.len() == before {
            return Err(BusError::NotRegistered(name.to_string()));
        }
        Ok(())
    }
}

impl Service for InMemoryEventBus {
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
                .name(name)
                .spawn(move || worker_loop(shared))?;
            workers.push(join);
        }
        info!(bus = %self.shared.config.name, threads = workers.len(), "bus started");
        Ok(())
    }

    /// Graceful: workers finish their in-flight delivery, pending ones stay
    /// queued. New publishes are refused.
    fn stop(&self) -> Result<(), BoxError> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if workers.is_empty() {
            return Ok(());
        }

        self.shared.changed.notify_all();
        for join in workers {
            let _ = join.join();
        }
        info!(bus = %self.shared.config.name, "bus stopped");
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let delivery = {
            let mut state = shared.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(delivery) = state.take_ready(Instant::now()) {
                    break delivery;
                }
                state = shared
                    .changed
                    .wait_timeout(state, shared.config.poll_interval)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        };
        shared.deliver(delivery);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use uuid::Uuid;

    use billforge_core::{ControlTagType, ObjectType, UserToken};

    use super::*;
    use crate::event::{ControlTagDeletionEvent, EventMetadata};

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl Counting {
        fn new(name: &'static str, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            })
        }
    }

    impl EventHandler for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn handle(&self, _event: &BusEvent) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err("transient".into());
            }
            Ok(())
        }
    }

    fn event() -> BusEvent {
        ControlTagDeletionEvent {
            tag_id: Uuid::now_v7(),
            object_id: Uuid::now_v7(),
            object_type: ObjectType::Account,
            tag_definition: ControlTagType::AutoInvoicingOff.definition(),
            metadata: EventMetadata::new(1, 1, Some(UserToken::new()), Utc::now()),
        }
        .into()
    }

    fn bus(max_delivery_attempts: u32) -> InMemoryEventBus {
        InMemoryEventBus::new(BusConfig {
            max_delivery_attempts,
            redelivery_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            ..BusConfig::default()
        })
    }

    #[test]
    fn fans_out_to_every_handler() {
        let bus = bus(3);
        let a = Counting::new("a", 0);
        let b = Counting::new("b", 0);
        bus.register(a.clone()).unwrap();
        bus.register(b.clone()).unwrap();

        bus.publish(event()).unwrap();
        assert_eq!(bus.deliver_pending(), 2);

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_delivery_is_redelivered_to_that_handler_only() {
        let bus = bus(3);
        let flaky = Counting::new("flaky", 1);
        let steady = Counting::new("steady", 0);
        bus.register(flaky.clone()).unwrap();
        bus.register(steady.clone()).unwrap();

        bus.publish(event()).unwrap();
        bus.deliver_pending();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(steady.calls.load(Ordering::SeqCst), 1);
        assert!(bus.dead_letters().is_empty());
    }

    #[test]
    fn exhausted_delivery_is_dead_lettered() {
        let bus = bus(2);
        let broken = Counting::new("broken", usize::MAX);
        bus.register(broken.clone()).unwrap();

        bus.publish(event()).unwrap();
        bus.deliver_pending();

        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].handler, "broken");
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let bus = bus(1);
        bus.register(Counting::new("a", 0)).unwrap();
        assert_eq!(
            bus.register(Counting::new("a", 0)),
            Err(BusError::AlreadyRegistered("a".to_string()))
        );
        bus.unregister("a").unwrap();
        assert!(bus.unregister("a").is_err());
    }

    #[test]
    fn worker_threads_deliver_and_stop_gracefully() {
        let bus = bus(3);
        let handler = Counting::new("worker", 0);
        bus.register(handler.clone()).unwrap();

        bus.start().unwrap();
        assert!(bus.is_running());
        for _ in 0..10 {
            bus.publish(event()).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.calls.load(Ordering::SeqCst) < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        bus.stop().unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 10);
        assert!(!bus.is_running());
        bus.stop().unwrap();
    }

    #[test]
    fn stopped_bus_refuses_publishes_until_restarted() {
        let bus = bus(1);
        let handler = Counting::new("late", 0);
        bus.register(handler.clone()).unwrap();

        bus.start().unwrap();
        bus.stop().unwrap();
        assert_eq!(bus.publish(event()), Err(BusError::Stopped));
        assert_eq!(bus.pending_count(), 0);

        bus.start().unwrap();
        bus.publish(event()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.calls.load(Ordering::SeqCst) < 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        bus.stop().unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
