//! Bus events: a closed, tagged union of everything published on the bus.
//!
//! Events are immutable facts. The serde form (`event_type` tag) is also the
//! durable payload format used when an event is parked for retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use billforge_core::{AccountId, ObjectType, TagDefinition, UserToken};

/// Routing and correlation data common to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Tenant routing key.
    pub tenant_record_id: u64,
    /// Account routing key.
    pub account_record_id: u64,
    pub user_token: Option<UserToken>,
    pub created_at: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(
        tenant_record_id: u64,
        account_record_id: u64,
        user_token: Option<UserToken>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_record_id,
            account_record_id,
            user_token,
            created_at,
        }
    }
}

/// Discriminant of [`BusEvent`]; the key handlers subscribe on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusEventKind {
    ControlTagCreation,
    ControlTagDeletion,
    UserTagCreation,
    UserTagDeletion,
    PaymentStateChange,
}

impl BusEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusEventKind::ControlTagCreation => "CONTROL_TAG_CREATION",
            BusEventKind::ControlTagDeletion => "CONTROL_TAG_DELETION",
            BusEventKind::UserTagCreation => "USER_TAG_CREATION",
            BusEventKind::UserTagDeletion => "USER_TAG_DELETION",
            BusEventKind::PaymentStateChange => "PAYMENT_STATE_CHANGE",
        }
    }
}

impl core::fmt::Display for BusEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! tag_event {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            pub tag_id: Uuid,
            pub object_id: Uuid,
            pub object_type: ObjectType,
            pub tag_definition: TagDefinition,
            #[serde(flatten)]
            pub metadata: EventMetadata,
        }
    };
}

tag_event!(
    /// A control tag was attached to an object.
    ControlTagCreationEvent
);
tag_event!(
    /// A control tag was removed from an object.
    ControlTagDeletionEvent
);
tag_event!(UserTagCreationEvent);
tag_event!(UserTagDeletionEvent);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentTransactionStatus {
    Success,
    Unknown,
    Pending,
    PaymentFailure,
    PluginFailure,
    PaymentSystemOff,
}

/// A payment transaction changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStateChangeEvent {
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: AccountId,
    pub status: PaymentTransactionStatus,
    #[serde(flatten)]
    pub metadata: EventMetadata,
}

/// Every event the bus carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusEvent {
    ControlTagCreation(ControlTagCreationEvent),
    ControlTagDeletion(ControlTagDeletionEvent),
    UserTagCreation(UserTagCreationEvent),
    UserTagDeletion(UserTagDeletionEvent),
    PaymentStateChange(PaymentStateChangeEvent),
}

impl BusEvent {
    pub fn kind(&self) -> BusEventKind {
        match self {
            BusEvent::ControlTagCreation(_) => BusEventKind::ControlTagCreation,
            BusEvent::ControlTagDeletion(_) => BusEventKind::ControlTagDeletion,
            BusEvent::UserTagCreation(_) => BusEventKind::UserTagCreation,
            BusEvent::UserTagDeletion(_) => BusEventKind::UserTagDeletion,
            BusEvent::PaymentStateChange(_) => BusEventKind::PaymentStateChange,
        }
    }

    pub fn metadata(&self) -> &EventMetadata {
        match self {
            BusEvent::ControlTagCreation(e) => &e.metadata,
            BusEvent::ControlTagDeletion(e) => &e.metadata,
            BusEvent::UserTagCreation(e) => &e.metadata,
            BusEvent::UserTagDeletion(e) => &e.metadata,
            BusEvent::PaymentStateChange(e) => &e.metadata,
        }
    }

    pub fn object_id(&self) -> Uuid {
        match self {
            BusEvent::ControlTagCreation(e) => e.object_id,
            BusEvent::ControlTagDeletion(e) => e.object_id,
            BusEvent::UserTagCreation(e) => e.object_id,
            BusEvent::UserTagDeletion(e) => e.object_id,
            BusEvent::PaymentStateChange(e) => e.payment_id,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            BusEvent::ControlTagCreation(e) => e.object_type,
            BusEvent::ControlTagDeletion(e) => e.object_type,
            BusEvent::UserTagCreation(e) => e.object_type,
            BusEvent::UserTagDeletion(e) => e.object_type,
            BusEvent::PaymentStateChange(_) => ObjectType::Payment,
        }
    }

    pub fn user_token(&self) -> Option<UserToken> {
        self.metadata().user_token
    }
}

/// A concrete event struct that is one variant of [`BusEvent`].
pub trait TypedEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    const KIND: BusEventKind;

    /// Borrow the variant out of the union, if it is this type.
    fn from_bus(event: &BusEvent) -> Option<&Self>;

    fn into_bus(self) -> BusEvent;
}

macro_rules! impl_typed_event {
    ($t:ty, $variant:ident) => {
        impl TypedEvent for $t {
            const KIND: BusEventKind = BusEventKind::$variant;

            fn from_bus(event: &BusEvent) -> Option<&Self> {
                match event {
                    BusEvent::$variant(e) => Some(e),
                    _ => None,
                }
            }

            fn into_bus(self) -> BusEvent {
                BusEvent::$variant(self)
            }
        }

        impl From<$t> for BusEvent {
            fn from(value: $t) -> Self {
                value.into_bus()
            }
        }
    };
}

impl_typed_event!(ControlTagCreationEvent, ControlTagCreation);
impl_typed_event!(ControlTagDeletionEvent, ControlTagDeletion);
impl_typed_event!(UserTagCreationEvent, UserTagCreation);
impl_typed_event!(UserTagDeletionEvent, UserTagDeletion);
impl_typed_event!(PaymentStateChangeEvent, PaymentStateChange);
