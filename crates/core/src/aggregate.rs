//! Aggregate traits for event-sourced domain records.

use crate::error::{DomainError, DomainResult};

/// Aggregate root: the consistency boundary that owns its child entities.
///
/// A bundle is an aggregate root; its lines live and die with it.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far (the stream revision).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation used when appending to a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check.
    Any,
    /// The stream must be at exactly this revision.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stream revision mismatch (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Decide/evolve contract.
///
/// - `handle(&self, cmd)` validates a command against current state and returns
///   the events it produces. It never mutates.
/// - `apply(&mut self, event)` folds one event into state and bumps the version.
///
/// Both are deterministic and free of IO; anything that talks to a warehouse
/// happens before the command is built.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
