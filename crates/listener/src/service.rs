//! Retry queue lifecycle of one listener service.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use billforge_core::{Clock, LifecycleError, LifecycleState, Transition};
use billforge_events::BusEvent;
use billforge_notificationq::{
    NotificationEntry, NotificationError, NotificationId, NotificationQueue,
    NotificationQueueError, NotificationQueueHandler, NotificationQueueService,
    NotificationRouting, RetryPolicy,
};

use crate::handler::SubscriberQueueHandler;
use crate::outcome::{Outcome, RetryError};
use crate::payload::RetryNotification;

#[derive(Debug, Error)]
pub enum RetryableServiceError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("retry queue of {0} is not initialized")]
    NotInitialized(String),
    #[error(transparent)]
    Queue(#[from] NotificationQueueError),
}

struct Inner {
    state: LifecycleState,
    queue: Option<NotificationQueue>,
}

/// Owns the retry queue of one listener and moves it through
/// `initialize → start → stop`.
///
/// The state only moves forward; asking for a state already reached (or
/// passed) is a no-op.
pub struct RetryableService {
    notification_queue_service: Arc<NotificationQueueService>,
    service_name: String,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl core::fmt::Debug for RetryableService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryableService")
            .field("service_name", &self.service_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RetryableService {
    pub fn new(
        notification_queue_service: Arc<NotificationQueueService>,
        service_name: impl Into<String>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            notification_queue_service,
            service_name: service_name.into(),
            policy,
            clock,
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                queue: None,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> LifecycleState {
        self.inner().state
    }

    /// Register the retry queue `queue_name`; due entries are replayed
    /// through `handler`.
    pub fn initialize(
        &self,
        queue_name: &str,
        handler: Arc<SubscriberQueueHandler>,
    ) -> Result<(), RetryableServiceError> {
        let mut inner = self.inner();
        if inner.state.transition_to(LifecycleState::Initialized)? == Transition::AlreadyThere {
            return Ok(());
        }

        let callback = Arc::new(RetryNotificationHandler {
            service_name: self.service_name.clone(),
            handler,
        });
        let queue = self.notification_queue_service.create_notification_queue(
            &self.service_name,
            queue_name,
            self.policy.clone(),
            callback,
        )?;
        info!(service = %self.service_name, queue = %queue.name(), "retry queue initialized");

        inner.queue = Some(queue);
        inner.state = LifecycleState::Initialized;
        Ok(())
    }

    pub fn start(&self) -> Result<(), RetryableServiceError> {
        let mut inner = self.inner();
        if inner.state.transition_to(LifecycleState::Started)? == Transition::AlreadyThere {
            return Ok(());
        }

        let queue = inner
            .queue
            .as_ref()
            .ok_or_else(|| RetryableServiceError::NotInitialized(self.service_name.clone()))?;
        queue.start_queue()?;
        inner.state = LifecycleState::Started;
        Ok(())
    }

    /// Stop replaying and unregister the queue, after callbacks already
    /// running have finished. Pending retries stay stored. A queue that is
    /// already gone is not an error.
    pub fn stop(&self) -> Result<(), RetryableServiceError> {
        let queue = {
            let mut inner = self.inner();
            if inner.state.transition_to(LifecycleState::Stopped)? == Transition::AlreadyThere {
                return Ok(());
            }
            inner.state = LifecycleState::Stopped;
            inner.queue.take()
        };

        let Some(queue) = queue else {
            debug!(service = %self.service_name, "stopped before initialization");
            return Ok(());
        };
        match queue.stop_queue() {
            Ok(()) | Err(NotificationQueueError::NoSuchQueue(_)) => {}
            Err(err) => return Err(err.into()),
        }
        match self
            .notification_queue_service
            .delete_notification_queue(&queue.name().service, &queue.name().queue)
        {
            Ok(()) => {}
            Err(NotificationQueueError::NoSuchQueue(name)) => {
                warn!(service = %self.service_name, queue = %name, "retry queue already deleted");
            }
            Err(err) => return Err(err.into()),
        }
        info!(service = %self.service_name, queue = %queue.name(), "retry queue stopped");
        Ok(())
    }

    /// Park `event` for a later replay: attempt 1, due after the policy's
    /// first delay and strictly after now.
    pub fn schedule_retry(
        &self,
        event: &BusEvent,
        cause: &RetryError,
    ) -> Result<NotificationId, RetryableServiceError> {
        let queue = self
            .inner()
            .queue
            .clone()
            .ok_or_else(|| RetryableServiceError::NotInitialized(self.service_name.clone()))?;

        let now = self.clock.now();
        let effective_at = after(now, self.policy.delay_for_attempt(1))
            .max(after(now, Duration::from_millis(1)));
        let metadata = event.metadata();
        let routing = NotificationRouting {
            tenant_record_id: metadata.tenant_record_id,
            account_record_id: metadata.account_record_id,
            user_token: metadata.user_token,
        };
        let payload = RetryNotification {
            event: event.clone(),
            first_failure_at: now,
            cause: cause.to_string(),
        };

        let id = queue.record_failed_notification(effective_at, &payload, routing, 1)?;
        info!(
            service = %self.service_name,
            queue = %queue.name(),
            notification_id = %id,
            kind = %event.kind(),
            effective_at = %effective_at,
            error = %cause,
            "event parked for retry"
        );
        Ok(id)
    }

    /// Pending retries of this service's queue.
    pub fn pending_retries(&self) -> Result<Vec<NotificationEntry>, RetryableServiceError> {
        let queue = self
            .inner()
            .queue
            .clone()
            .ok_or_else(|| RetryableServiceError::NotInitialized(self.service_name.clone()))?;
        Ok(queue.future_notifications()?)
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Replays parked events through the subscriber's handler.
struct RetryNotificationHandler {
    service_name: String,
    handler: Arc<SubscriberQueueHandler>,
}

impl NotificationQueueHandler for RetryNotificationHandler {
    fn handle_ready_notification(&self, entry: &NotificationEntry) -> Result<(), NotificationError> {
        let notification =
            RetryNotification::deserialize(&entry.payload).map_err(NotificationError::permanent)?;
        debug!(
            service = %self.service_name,
            notification_id = %entry.id,
            kind = %notification.event.kind(),
            attempt = entry.attempt,
            "replaying parked event"
        );

        match self.handler.dispatch(&notification.event) {
            Outcome::Success => {
                info!(
                    service = %self.service_name,
                    notification_id = %entry.id,
                    kind = %notification.event.kind(),
                    attempt = entry.attempt,
                    "parked event replayed"
                );
                Ok(())
            }
            Outcome::RetryableFailure(err) => Err(NotificationError::Retry(err.into_cause())),
            Outcome::PermanentFailure(err) => Err(NotificationError::Permanent(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use uuid::Uuid;

    use billforge_core::{ControlTagType, ManualClock, ObjectType, UserToken};
    use billforge_events::{ControlTagDeletionEvent, EventMetadata};
    use billforge_notificationq::{InMemoryNotificationStore, NotificationQueueConfig};

    use super::*;

    const SERVICE: &str = "test-listener-service";
    const QUEUE: &str = "test-listener";

    fn event() -> BusEvent {
        ControlTagDeletionEvent {
            tag_id: Uuid::now_v7(),
            object_id: Uuid::now_v7(),
            object_type: ObjectType::Account,
            tag_definition: ControlTagType::AutoInvoicingOff.definition(),
            metadata: EventMetadata::new(3, 9, Some(UserToken::new()), Utc::now()),
        }
        .into()
    }

    fn setup() -> (Arc<ManualClock>, Arc<NotificationQueueService>, RetryableService) {
        let clock = Arc::new(ManualClock::starting_now());
        let queues = Arc::new(NotificationQueueService::new(
            NotificationQueueConfig::default(),
            Arc::new(InMemoryNotificationStore::new()),
            clock.clone(),
        ));
        let service = RetryableService::new(
            queues.clone(),
            SERVICE,
            RetryPolicy::exponential(3, Duration::from_secs(60), Duration::from_secs(600)),
            clock.clone(),
        );
        (clock, queues, service)
    }

    fn counting_handler(calls: Arc<AtomicUsize>, outcome: fn() -> Outcome) -> Arc<SubscriberQueueHandler> {
        let mut handler = SubscriberQueueHandler::new();
        handler.subscribe(move |_: &ControlTagDeletionEvent| {
            calls.fetch_add(1, Ordering::SeqCst);
            outcome()
        });
        Arc::new(handler)
    }

    #[test]
    fn lifecycle_calls_are_idempotent() {
        let (_clock, queues, service) = setup();
        let handler = counting_handler(Arc::new(AtomicUsize::new(0)), || Outcome::Success);

        service.initialize(QUEUE, handler.clone()).unwrap();
        service.initialize(QUEUE, handler).unwrap();
        assert_eq!(service.state(), LifecycleState::Initialized);

        service.start().unwrap();
        service.start().unwrap();
        assert!(queues.notification_queue(SERVICE, QUEUE).unwrap().is_started());

        service.stop().unwrap();
        service.stop().unwrap();
        assert_eq!(service.state(), LifecycleState::Stopped);
        assert!(queues.notification_queue(SERVICE, QUEUE).is_err());
    }

    #[test]
    fn start_before_initialize_is_rejected() {
        let (_clock, _queues, service) = setup();
        assert!(matches!(
            service.start(),
            Err(RetryableServiceError::Lifecycle(_))
        ));
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let (_clock, _queues, service) = setup();
        service.stop().unwrap();
        assert_eq!(service.state(), LifecycleState::Stopped);

        // Nothing moves backwards
        let handler = counting_handler(Arc::new(AtomicUsize::new(0)), || Outcome::Success);
        service.initialize(QUEUE, handler).unwrap();
        assert_eq!(service.state(), LifecycleState::Stopped);
    }

    #[test]
    fn stop_tolerates_a_queue_deleted_elsewhere() {
        let (_clock, queues, service) = setup();
        let handler = counting_handler(Arc::new(AtomicUsize::new(0)), || Outcome::Success);
        service.initialize(QUEUE, handler).unwrap();
        service.start().unwrap();

        queues.delete_notification_queue(SERVICE, QUEUE).unwrap();
        service.stop().unwrap();
    }

    #[test]
    fn scheduled_retry_has_attempt_one_in_the_future() {
        let (clock, _queues, service) = setup();
        let handler = counting_handler(Arc::new(AtomicUsize::new(0)), || Outcome::Success);
        service.initialize(QUEUE, handler).unwrap();

        let event = event();
        service
            .schedule_retry(&event, &RetryError::new("locked"))
            .unwrap();

        let pending = service.pending_retries().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 1);
        assert_eq!(pending[0].effective_at, clock.now() + chrono::Duration::seconds(60));
        assert_eq!(pending[0].routing.tenant_record_id, 3);
        assert_eq!(pending[0].routing.account_record_id, 9);

        let payload = RetryNotification::deserialize(&pending[0].payload).unwrap();
        assert_eq!(payload.event, event);
        assert_eq!(payload.cause, "retryable failure: locked");
    }

    #[test]
    fn schedule_before_initialize_is_an_error() {
        let (_clock, _queues, service) = setup();
        assert!(matches!(
            service.schedule_retry(&event(), &RetryError::new("locked")),
            Err(RetryableServiceError::NotInitialized(_))
        ));
    }

    #[test]
    fn due_retry_replays_through_the_handler() {
        let (clock, queues, service) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        service
            .initialize(QUEUE, counting_handler(calls.clone(), || Outcome::Success))
            .unwrap();
        service.start().unwrap();
        service
            .schedule_retry(&event(), &RetryError::new("locked"))
            .unwrap();

        assert_eq!(queues.run_due_notifications().unwrap(), 0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(queues.run_due_notifications().unwrap(), 1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(service.pending_retries().unwrap().is_empty());
    }

    #[test]
    fn replay_failing_again_is_rescheduled_then_dropped() {
        let (clock, queues, service) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        service
            .initialize(QUEUE, counting_handler(calls.clone(), || Outcome::retry("still locked")))
            .unwrap();
        service.start().unwrap();
        service
            .schedule_retry(&event(), &RetryError::new("locked"))
            .unwrap();

        clock.advance(Duration::from_secs(60));
        let previous = service.pending_retries().unwrap()[0].effective_at;
        queues.run_due_notifications().unwrap();

        let pending = service.pending_retries().unwrap();
        assert_eq!(pending[0].attempt, 2);
        assert!(pending[0].effective_at > previous);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(600));
            queues.run_due_notifications().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(service.pending_retries().unwrap().is_empty());
        assert_eq!(queues.stats().dropped, 1);
    }

    #[test]
    fn undecodable_payload_is_dropped() {
        let (clock, queues, service) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        service
            .initialize(QUEUE, counting_handler(calls.clone(), || Outcome::Success))
            .unwrap();
        service.start().unwrap();

        queues
            .notification_queue(SERVICE, QUEUE)
            .unwrap()
            .record_future_notification(clock.now(), &"not an event", NotificationRouting::default())
            .unwrap();
        queues.run_due_notifications().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queues.stats().dropped, 1);
    }
}
