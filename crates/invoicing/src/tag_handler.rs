//! Recompute an account's invoices once its `AUTO_INVOICING_OFF` tag is removed.

use std::sync::Arc;

use tracing::debug;

use billforge_core::{
    AccountId, BoxError, CallOrigin, Clock, ControlTagType, InternalCallContextFactory,
    LifecycleState, ObjectType, Service, UserType,
};
use billforge_events::{BusEvent, ControlTagDeletionEvent, EventHandler};
use billforge_listener::{
    Outcome, RetryableService, RetryableSubscriber, SubscriberError, SubscriberQueueHandler,
};
use billforge_notificationq::{NotificationQueueService, RetryPolicy};

use crate::dispatcher::InvoiceDispatcher;
use crate::error::InvoiceDispatchError;

pub const INVOICE_TAG_HANDLER_SERVICE_NAME: &str = "invoice-tag-handler-service";
pub const INVOICE_TAG_HANDLER_QUEUE: &str = "invoice-tag-handler";

const CONTEXT_USER_NAME: &str = "InvoiceTagHandler";

/// Bus listener and lifecycle service for control tag removal.
///
/// Failures of the invoice run that may clear up on their own are parked in
/// the `invoice-tag-handler` retry queue and replayed later.
pub struct InvoiceTagHandler {
    retryable_service: Arc<RetryableService>,
    subscriber: RetryableSubscriber,
    handler: Arc<SubscriberQueueHandler>,
}

impl core::fmt::Debug for InvoiceTagHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InvoiceTagHandler")
            .field("retryable_service", &self.retryable_service)
            .finish_non_exhaustive()
    }
}

impl InvoiceTagHandler {
    pub fn new(
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn InvoiceDispatcher>,
        notification_queue_service: Arc<NotificationQueueService>,
        retry_policy: RetryPolicy,
        context_factory: InternalCallContextFactory,
    ) -> Self {
        let mut handler = SubscriberQueueHandler::new();
        handler.subscribe(move |event: &ControlTagDeletionEvent| {
            on_control_tag_deletion(dispatcher.as_ref(), &context_factory, event)
        });
        let handler = Arc::new(handler);

        let retryable_service = Arc::new(RetryableService::new(
            notification_queue_service,
            INVOICE_TAG_HANDLER_SERVICE_NAME,
            retry_policy,
            clock,
        ));
        let subscriber = RetryableSubscriber::new(retryable_service.clone(), handler.clone());

        Self {
            retryable_service,
            subscriber,
            handler,
        }
    }

    /// Handle one control tag deletion coming off the bus.
    pub fn process_auto_invoicing_off_removal(&self, event: &BusEvent) -> Result<(), SubscriberError> {
        self.subscriber.handle_event(event)
    }

    pub fn retryable_service(&self) -> &RetryableService {
        &self.retryable_service
    }

    pub fn state(&self) -> LifecycleState {
        self.retryable_service.state()
    }
}

fn on_control_tag_deletion(
    dispatcher: &dyn InvoiceDispatcher,
    context_factory: &InternalCallContextFactory,
    event: &ControlTagDeletionEvent,
) -> Outcome {
    if !event.tag_definition.is(ControlTagType::AutoInvoicingOff)
        || event.object_type != ObjectType::Account
    {
        return Outcome::Success;
    }

    let account_id = AccountId::from_uuid(event.object_id);
    let context = context_factory.create_internal_call_context(
        event.metadata.tenant_record_id,
        event.metadata.account_record_id,
        CONTEXT_USER_NAME,
        CallOrigin::Internal,
        UserType::System,
        event.metadata.user_token,
    );
    debug!(account_id = %account_id, "AUTO_INVOICING_OFF removed, recomputing invoices");

    match dispatcher.process_account(account_id, &context) {
        Ok(()) => Outcome::Success,
        Err(err) if err.is_retryable() => Outcome::retry(err),
        Err(InvoiceDispatchError::Unexpected(cause)) => Outcome::PermanentFailure(cause),
        Err(err) => Outcome::permanent(err),
    }
}

impl Service for InvoiceTagHandler {
    fn name(&self) -> &str {
        INVOICE_TAG_HANDLER_SERVICE_NAME
    }

    fn initialize(&self) -> Result<(), BoxError> {
        Ok(self
            .retryable_service
            .initialize(INVOICE_TAG_HANDLER_QUEUE, self.handler.clone())?)
    }

    fn start(&self) -> Result<(), BoxError> {
        Ok(self.retryable_service.start()?)
    }

    fn stop(&self) -> Result<(), BoxError> {
        Ok(self.retryable_service.stop()?)
    }
}

impl EventHandler for InvoiceTagHandler {
    fn name(&self) -> &str {
        INVOICE_TAG_HANDLER_SERVICE_NAME
    }

    fn handle(&self, event: &BusEvent) -> Result<(), BoxError> {
        self.process_auto_invoicing_off_removal(event)
            .map_err(SubscriberError::into_bus_error)
    }
}
