//! `billforge-core`: shared vocabulary for the billing platform.
//!
//! Identifiers, object and tag vocabulary, the internal call context, the
//! clock abstraction and the service lifecycle contract. No IO lives here.

pub mod clock;
pub mod context;
pub mod error;
pub mod id;
pub mod object;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CallOrigin, InternalCallContext, InternalCallContextFactory, UserType};
pub use error::{BoxError, DomainError};
pub use id::{AccountId, TenantId, UserToken};
pub use object::{ControlTagType, ObjectType, TagDefinition};
pub use service::{LifecycleError, LifecycleState, Service, Transition};
