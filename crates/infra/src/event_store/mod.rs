//! Append-only event store boundary.
//!
//! Bundle streams live here; nothing else in the workspace is event-sourced.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
