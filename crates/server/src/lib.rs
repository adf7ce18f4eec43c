//! Process assembly: configuration, wiring and lifecycle registration.

use std::sync::Arc;

use tracing::info;

use billforge_core::{
    AccountId, Clock, InternalCallContext, InternalCallContextFactory, LifecycleState, SystemClock,
};
use billforge_events::{BusConfig, EventBus, InMemoryEventBus};
use billforge_invoicing::{
    AccountInvoiceRecomputer, InvoiceDispatchError, InvoiceTagHandler, LockingInvoiceDispatcher,
};
use billforge_notificationq::{
    InMemoryNotificationStore, NotificationQueueConfig, NotificationQueueService, RetryPolicy,
};
use billforge_platform::{ConfigError, Lifecycle, LockerConfig, MemoryGlobalLocker};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub notification_queue: NotificationQueueConfig,
    pub retry_policy: RetryPolicy,
    pub bus: BusConfig,
    pub locker: LockerConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            notification_queue: NotificationQueueConfig::from_env()?,
            retry_policy: RetryPolicy::from_env()?,
            bus: BusConfig::from_env()?,
            locker: LockerConfig::from_env()?,
        })
    }
}

/// Hands the account to the invoice engine. The engine runs out of process,
/// so all this does is record the request.
#[derive(Debug, Default)]
pub struct LoggingRecomputer;

impl AccountInvoiceRecomputer for LoggingRecomputer {
    fn recompute_account(
        &self,
        account_id: AccountId,
        context: &InternalCallContext,
    ) -> Result<(), InvoiceDispatchError> {
        info!(
            account_id = %account_id,
            tenant_record_id = context.tenant_record_id,
            account_record_id = context.account_record_id,
            "invoice recomputation requested"
        );
        Ok(())
    }
}

/// Everything the process owns.
pub struct Server {
    pub clock: Arc<dyn Clock>,
    pub bus: Arc<InMemoryEventBus>,
    pub notification_store: Arc<InMemoryNotificationStore>,
    pub notification_queue_service: Arc<NotificationQueueService>,
    pub invoice_tag_handler: Arc<InvoiceTagHandler>,
    pub lifecycle: Lifecycle,
}

impl core::fmt::Debug for Server {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn invoice_tag_handler_state(&self) -> LifecycleState {
        self.invoice_tag_handler.state()
    }
}

/// Build and wire every component. Nothing is started.
pub fn assemble(config: &ServerConfig) -> anyhow::Result<Server> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(InMemoryEventBus::new(config.bus.clone()));
    let notification_store = Arc::new(InMemoryNotificationStore::new());
    let notification_queue_service = Arc::new(NotificationQueueService::new(
        config.notification_queue.clone(),
        notification_store.clone(),
        clock.clone(),
    ));

    let locker = MemoryGlobalLocker::new(config.locker.wait_per_retry);
    let dispatcher = Arc::new(LockingInvoiceDispatcher::new(
        locker,
        LoggingRecomputer,
        &config.locker,
    ));
    let invoice_tag_handler = Arc::new(InvoiceTagHandler::new(
        clock.clone(),
        dispatcher,
        notification_queue_service.clone(),
        config.retry_policy.clone(),
        InternalCallContextFactory::new(clock.clone()),
    ));
    bus.register(invoice_tag_handler.clone())?;

    // The bus starts once the retry queue exists and stops before the handler
    let mut lifecycle = Lifecycle::new();
    lifecycle.register(notification_queue_service.clone());
    lifecycle.register(invoice_tag_handler.clone());
    lifecycle.register(bus.clone());

    info!(
        bus_threads = config.bus.worker_threads,
        dispatcher_threads = config.notification_queue.worker_threads,
        max_attempts = config.retry_policy.max_attempts,
        "server assembled"
    );
    Ok(Server {
        clock,
        bus,
        notification_store,
        notification_queue_service,
        invoice_tag_handler,
        lifecycle,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use billforge_core::{ControlTagType, ObjectType};
    use billforge_events::{BusError, ControlTagDeletionEvent, EventMetadata};
    use billforge_platform::LifecyclePhase;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            notification_queue: NotificationQueueConfig {
                worker_threads: 1,
                poll_interval: Duration::from_millis(5),
                ..NotificationQueueConfig::default()
            },
            bus: BusConfig {
                worker_threads: 1,
                poll_interval: Duration::from_millis(5),
                ..BusConfig::default()
            },
            ..ServerConfig::default()
        }
    }

    #[test]
    fn assembled_server_runs_through_its_lifecycle() {
        let server = assemble(&config()).unwrap();
        assert_eq!(server.invoice_tag_handler_state(), LifecycleState::Uninitialized);

        server.lifecycle.initialize_all().unwrap();
        server.lifecycle.start_all().unwrap();
        assert_eq!(server.lifecycle.phase(), LifecyclePhase::Started);
        assert_eq!(server.invoice_tag_handler_state(), LifecycleState::Started);
        assert!(server.bus.is_running());
        assert!(server.notification_queue_service.is_running());

        assert!(server.lifecycle.stop_all().is_empty());
        assert_eq!(server.invoice_tag_handler_state(), LifecycleState::Stopped);
        assert!(!server.bus.is_running());
        assert!(!server.notification_queue_service.is_running());
    }

    #[test]
    fn bus_starts_last_and_stops_first() {
        let server = assemble(&config()).unwrap();
        assert_eq!(
            server.lifecycle.service_names(),
            vec![
                "notification-queue-service",
                "invoice-tag-handler-service",
                "persistent-bus",
            ]
        );

        server.lifecycle.initialize_all().unwrap();
        server.lifecycle.start_all().unwrap();
        assert!(server.lifecycle.stop_all().is_empty());

        // Nothing can reach the stopped handler through the bus
        let event = ControlTagDeletionEvent {
            tag_id: Uuid::now_v7(),
            object_id: Uuid::now_v7(),
            object_type: ObjectType::Account,
            tag_definition: ControlTagType::AutoInvoicingOff.definition(),
            metadata: EventMetadata::new(1, 2, None, Utc::now()),
        };
        assert_eq!(server.bus.publish(event.into()), Err(BusError::Stopped));
        assert!(server.bus.dead_letters().is_empty());
        assert!(server.notification_store.is_empty());
    }

    #[test]
    fn handler_is_registered_on_the_bus_once() {
        let server = assemble(&config()).unwrap();

        let duplicate = server.bus.register(server.invoice_tag_handler.clone());
        assert!(duplicate.is_err());
        assert!(server.notification_store.is_empty());
    }
}
