//! Tags attached to billing objects.
//!
//! Removing a control tag is what re-enables the behavior it suppressed, so
//! the store publishes a bus event for every creation and deletion it is
//! asked to announce.

pub mod store;
pub mod tag;

pub use store::{InMemoryTagStore, TagError};
pub use tag::Tag;
