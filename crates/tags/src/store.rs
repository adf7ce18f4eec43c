//! In-memory tag store.
//!
//! Owned by a single harness: mutation takes `&mut self`, so there is no
//! locking. Tags live in an arena of slots; an object-id index points into it.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use billforge_core::{InternalCallContext, ObjectType, TagDefinition};
use billforge_events::{
    BusError, BusEvent, ControlTagCreationEvent, ControlTagDeletionEvent, EventBus, EventMetadata,
    UserTagCreationEvent, UserTagDeletionEvent,
};

use crate::tag::Tag;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag {definition} already set on {object_type} {object_id}")]
    AlreadyExists {
        object_id: Uuid,
        object_type: ObjectType,
        definition: String,
    },
    #[error("tag {definition} does not apply to {object_type}")]
    NotApplicable {
        definition: String,
        object_type: ObjectType,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
}

pub struct InMemoryTagStore {
    bus: Arc<dyn EventBus>,
    slots: Vec<Option<Tag>>,
    free: Vec<usize>,
    by_object: HashMap<Uuid, Vec<usize>>,
}

impl core::fmt::Debug for InMemoryTagStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryTagStore")
            .field("tags", &self.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryTagStore {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            slots: Vec::new(),
            free: Vec::new(),
            by_object: HashMap::new(),
        }
    }

    /// Attach `tag` to its object. With `send_event`, publishes the control
    /// or user tag creation event.
    pub fn create(
        &mut self,
        tag: Tag,
        send_event: bool,
        context: &InternalCallContext,
    ) -> Result<(), TagError> {
        let applicable = &tag.definition.applicable_object_types;
        if !applicable.is_empty() && !applicable.contains(&tag.object_type) {
            return Err(TagError::NotApplicable {
                definition: tag.definition.name.clone(),
                object_type: tag.object_type,
            });
        }
        if self.find(tag.object_id, tag.object_type, &tag.definition).is_some() {
            return Err(TagError::AlreadyExists {
                object_id: tag.object_id,
                object_type: tag.object_type,
                definition: tag.definition.name.clone(),
            });
        }

        let event = send_event.then(|| creation_event(&tag, context));
        debug!(tag = %tag.definition.name, object_id = %tag.object_id, "tag created");
        self.insert(tag);

        if let Some(event) = event {
            self.bus.publish(event)?;
        }
        Ok(())
    }

    /// Remove `definition` from the object. Returns whether a tag was removed;
    /// nothing is published when there was none.
    pub fn delete_tag(
        &mut self,
        object_id: Uuid,
        object_type: ObjectType,
        definition: &TagDefinition,
        send_event: bool,
        context: &InternalCallContext,
    ) -> Result<bool, TagError> {
        let Some(slot) = self.find(object_id, object_type, definition) else {
            return Ok(false);
        };
        let Some(tag) = self.remove(object_id, slot) else {
            return Ok(false);
        };
        debug!(tag = %tag.definition.name, object_id = %object_id, "tag deleted");

        if send_event {
            self.bus.publish(deletion_event(&tag, context))?;
        }
        Ok(true)
    }

    pub fn tags_for_object(&self, object_id: Uuid, object_type: ObjectType) -> Vec<&Tag> {
        self.by_object
            .get(&object_id)
            .into_iter()
            .flatten()
            .filter_map(|&slot| self.slots[slot].as_ref())
            .filter(|tag| tag.object_type == object_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_object.clear();
    }

    fn find(&self, object_id: Uuid, object_type: ObjectType, definition: &TagDefinition) -> Option<usize> {
        self.by_object.get(&object_id)?.iter().copied().find(|&slot| {
            self.slots[slot]
                .as_ref()
                .is_some_and(|t| t.object_type == object_type && t.definition.id == definition.id)
        })
    }

    fn insert(&mut self, tag: Tag) {
        let object_id = tag.object_id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(tag);
                slot
            }
            None => {
                self.slots.push(Some(tag));
                self.slots.len() - 1
            }
        };
        self.by_object.entry(object_id).or_default().push(slot);
    }

    fn remove(&mut self, object_id: Uuid, slot: usize) -> Option<Tag> {
        let tag = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        if let Some(slots) = self.by_object.get_mut(&object_id) {
            slots.retain(|&s| s != slot);
            if slots.is_empty() {
                self.by_object.remove(&object_id);
            }
        }
        Some(tag)
    }
}

fn metadata(context: &InternalCallContext) -> EventMetadata {
    EventMetadata::new(
        context.tenant_record_id,
        context.account_record_id,
        context.user_token,
        context.created_at,
    )
}

fn creation_event(tag: &Tag, context: &InternalCallContext) -> BusEvent {
    if tag.is_control_tag() {
        ControlTagCreationEvent {
            tag_id: tag.id,
            object_id: tag.object_id,
            object_type: tag.object_type,
            tag_definition: tag.definition.clone(),
            metadata: metadata(context),
        }
        .into()
    } else {
        UserTagCreationEvent {
            tag_id: tag.id,
            object_id: tag.object_id,
            object_type: tag.object_type,
            tag_definition: tag.definition.clone(),
            metadata: metadata(context),
        }
        .into()
    }
}

fn deletion_event(tag: &Tag, context: &InternalCallContext) -> BusEvent {
    if tag.is_control_tag() {
        ControlTagDeletionEvent {
            tag_id: tag.id,
            object_id: tag.object_id,
            object_type: tag.object_type,
            tag_definition: tag.definition.clone(),
            metadata: metadata(context),
        }
        .into()
    } else {
        UserTagDeletionEvent {
            tag_id: tag.id,
            object_id: tag.object_id,
            object_type: tag.object_type,
            tag_definition: tag.definition.clone(),
            metadata: metadata(context),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use billforge_core::{CallOrigin, ControlTagType, UserToken, UserType};
    use billforge_events::{BusEventKind, EventHandler};

    use super::*;

    /// Bus that records what was published.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<BusEvent>>,
    }

    impl RecordingBus {
        fn kinds(&self) -> Vec<BusEventKind> {
            self.published.lock().unwrap().iter().map(BusEvent::kind).collect()
        }
    }

    impl EventBus for RecordingBus {
        fn publish(&self, event: BusEvent) -> Result<(), BusError> {
            self.published.lock().unwrap().push(event);
            Ok(())
        }

        fn register(&self, _handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
            Ok(())
        }

        fn unregister(&self, _name: &str) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn context() -> InternalCallContext {
        InternalCallContext {
            tenant_record_id: 1,
            account_record_id: 42,
            user_token: Some(UserToken::new()),
            created_by: "test".into(),
            call_origin: CallOrigin::Test,
            user_type: UserType::Test,
            created_at: Utc::now(),
        }
    }

    fn auto_invoicing_off(object_id: Uuid) -> Tag {
        Tag::new(
            object_id,
            ObjectType::Account,
            ControlTagType::AutoInvoicingOff.definition(),
            Utc::now(),
        )
    }

    #[test]
    fn create_and_delete_publish_control_tag_events() {
        let bus = Arc::new(RecordingBus::default());
        let mut store = InMemoryTagStore::new(bus.clone());
        let account = Uuid::now_v7();
        let ctx = context();

        store.create(auto_invoicing_off(account), true, &ctx).unwrap();
        assert_eq!(store.tags_for_object(account, ObjectType::Account).len(), 1);

        let removed = store
            .delete_tag(
                account,
                ObjectType::Account,
                &ControlTagType::AutoInvoicingOff.definition(),
                true,
                &ctx,
            )
            .unwrap();

        assert!(removed);
        assert!(store.is_empty());
        assert_eq!(
            bus.kinds(),
            vec![BusEventKind::ControlTagCreation, BusEventKind::ControlTagDeletion]
        );

        let published = bus.published.lock().unwrap();
        assert_eq!(published[1].object_id(), account);
        assert_eq!(published[1].metadata().account_record_id, 42);
        assert_eq!(published[1].user_token(), ctx.user_token);
    }

    #[test]
    fn deleting_an_absent_tag_publishes_nothing() {
        let bus = Arc::new(RecordingBus::default());
        let mut store = InMemoryTagStore::new(bus.clone());

        let removed = store
            .delete_tag(
                Uuid::now_v7(),
                ObjectType::Account,
                &ControlTagType::AutoPayOff.definition(),
                true,
                &context(),
            )
            .unwrap();

        assert!(!removed);
        assert!(bus.kinds().is_empty());
    }

    #[test]
    fn duplicate_definition_on_one_object_is_rejected() {
        let mut store = InMemoryTagStore::new(Arc::new(RecordingBus::default()));
        let account = Uuid::now_v7();

        store.create(auto_invoicing_off(account), false, &context()).unwrap();
        assert!(matches!(
            store.create(auto_invoicing_off(account), false, &context()),
            Err(TagError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn control_tag_must_apply_to_object_type() {
        let mut store = InMemoryTagStore::new(Arc::new(RecordingBus::default()));
        let tag = Tag::new(
            Uuid::now_v7(),
            ObjectType::Bundle,
            ControlTagType::AutoInvoicingOff.definition(),
            Utc::now(),
        );

        assert!(matches!(
            store.create(tag, false, &context()),
            Err(TagError::NotApplicable { .. })
        ));
    }

    #[test]
    fn user_tags_publish_user_events_and_slots_are_reused() {
        let bus = Arc::new(RecordingBus::default());
        let mut store = InMemoryTagStore::new(bus.clone());
        let invoice = Uuid::now_v7();
        let vip = TagDefinition::user_defined(Uuid::now_v7(), "vip", "Important", Vec::new());

        store
            .create(Tag::new(invoice, ObjectType::Invoice, vip.clone(), Utc::now()), true, &context())
            .unwrap();
        store
            .delete_tag(invoice, ObjectType::Invoice, &vip, true, &context())
            .unwrap();
        store
            .create(Tag::new(invoice, ObjectType::Invoice, vip, Utc::now()), false, &context())
            .unwrap();

        assert_eq!(
            bus.kinds(),
            vec![BusEventKind::UserTagCreation, BusEventKind::UserTagDeletion]
        );
        assert_eq!(store.len(), 1);
        assert!(store.tags_for_object(invoice, ObjectType::Account).is_empty());

        store.clear();
        assert!(store.is_empty());
    }
}
