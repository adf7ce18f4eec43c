//! Bus events and the persistent event bus.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, EventHandler};
pub use event::{
    BusEvent, BusEventKind, ControlTagCreationEvent, ControlTagDeletionEvent, EventMetadata,
    PaymentStateChangeEvent, PaymentTransactionStatus, TypedEvent, UserTagCreationEvent,
    UserTagDeletionEvent,
};
pub use in_memory_bus::{BusConfig, DeadLetter, InMemoryEventBus};
