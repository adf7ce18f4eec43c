//! Event kind → action bindings.

use std::collections::HashMap;

use tracing::debug;

use billforge_events::{BusEvent, BusEventKind, TypedEvent};

use crate::outcome::Outcome;

type Action = Box<dyn Fn(&BusEvent) -> Outcome + Send + Sync>;

/// Routes an event to the actions bound to its kind.
///
/// Bind everything before sharing the handler: `subscribe` takes `&mut self`,
/// `dispatch` takes `&self` and may run concurrently for distinct events.
#[derive(Default)]
pub struct SubscriberQueueHandler {
    actions: HashMap<BusEventKind, Vec<Action>>,
}

impl core::fmt::Debug for SubscriberQueueHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut bindings: Vec<_> = self
            .actions
            .iter()
            .map(|(kind, actions)| (kind.as_str(), actions.len()))
            .collect();
        bindings.sort_unstable();
        f.debug_struct("SubscriberQueueHandler")
            .field("bindings", &bindings)
            .finish()
    }
}

impl SubscriberQueueHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `action` to events of type `E`. Bindings of one kind run in the
    /// order they were added.
    pub fn subscribe<E, F>(&mut self, action: F)
    where
        E: TypedEvent,
        F: Fn(&E) -> Outcome + Send + Sync + 'static,
    {
        let erased: Action = Box::new(move |event: &BusEvent| match E::from_bus(event) {
            Some(typed) => action(typed),
            None => Outcome::Success,
        });
        self.actions.entry(E::KIND).or_default().push(erased);
    }

    /// Run the actions bound to `event`'s kind on the calling thread.
    ///
    /// The first action that does not succeed ends the run and its outcome is
    /// returned. An event nobody subscribed to is a success.
    pub fn dispatch(&self, event: &BusEvent) -> Outcome {
        let Some(actions) = self.actions.get(&event.kind()) else {
            debug!(kind = %event.kind(), "no action bound, ignoring event");
            return Outcome::Success;
        };

        for action in actions {
            match action(event) {
                Outcome::Success => {}
                failure => return failure,
            }
        }
        Outcome::Success
    }

    pub fn is_subscribed(&self, kind: BusEventKind) -> bool {
        self.actions.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use uuid::Uuid;

    use billforge_core::{ControlTagType, ObjectType, TagDefinition, UserToken};
    use billforge_events::{ControlTagDeletionEvent, EventMetadata, UserTagCreationEvent};

    use super::*;

    fn deletion() -> BusEvent {
        ControlTagDeletionEvent {
            tag_id: Uuid::now_v7(),
            object_id: Uuid::now_v7(),
            object_type: ObjectType::Account,
            tag_definition: ControlTagType::AutoInvoicingOff.definition(),
            metadata: EventMetadata::new(1, 2, Some(UserToken::new()), Utc::now()),
        }
        .into()
    }

    fn user_tag() -> BusEvent {
        UserTagCreationEvent {
            tag_id: Uuid::now_v7(),
            object_id: Uuid::now_v7(),
            object_type: ObjectType::Account,
            tag_definition: TagDefinition::user_defined(
                Uuid::now_v7(),
                "vip",
                "Important customer",
                vec![ObjectType::Account],
            ),
            metadata: EventMetadata::new(1, 2, None, Utc::now()),
        }
        .into()
    }

    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
        outcome: fn() -> Outcome,
    ) -> impl Fn(&ControlTagDeletionEvent) -> Outcome + Send + Sync + 'static {
        let log = log.clone();
        move |_: &ControlTagDeletionEvent| {
            log.lock().unwrap().push(label);
            outcome()
        }
    }

    #[test]
    fn actions_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handler = SubscriberQueueHandler::new();
        handler.subscribe::<ControlTagDeletionEvent, _>(recording(&log, "first", || Outcome::Success));
        handler.subscribe::<ControlTagDeletionEvent, _>(recording(&log, "second", || Outcome::Success));

        assert!(handler.dispatch(&deletion()).is_success());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn first_failure_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handler = SubscriberQueueHandler::new();
        handler.subscribe::<ControlTagDeletionEvent, _>(recording(&log, "first", || Outcome::retry("locked")));
        handler.subscribe::<ControlTagDeletionEvent, _>(recording(&log, "second", || Outcome::Success));

        assert!(matches!(
            handler.dispatch(&deletion()),
            Outcome::RetryableFailure(_)
        ));
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn unbound_kinds_are_ignored() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handler = SubscriberQueueHandler::new();
        handler.subscribe::<ControlTagDeletionEvent, _>(recording(&log, "deletion", || Outcome::permanent("boom")));

        assert!(handler.dispatch(&user_tag()).is_success());
        assert!(log.lock().unwrap().is_empty());
        assert!(handler.is_subscribed(BusEventKind::ControlTagDeletion));
        assert!(!handler.is_subscribed(BusEventKind::UserTagCreation));
    }
}
