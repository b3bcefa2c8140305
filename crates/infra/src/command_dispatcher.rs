//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append to store (optimistic concurrency check)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! This module contains no IO itself; it composes `EventStore` and
//! `EventBus`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockbundle_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use stockbundle_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale revision or duplicate create).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Cross-tenant or cross-aggregate stream mixing.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    /// The record's state forbids the command.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("not found")]
    NotFound,
    /// Historical payload did not match the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::PreconditionViolation(msg) => DispatchError::PreconditionViolation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine.
///
/// Events are persisted before publication: if the append fails nothing is
/// published. If publication fails after a successful append the error is
/// returned but the events stay stored.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rebuild an aggregate from its stream without handling anything.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline and return the
    /// committed events.
    ///
    /// Concurrency is optimistic: the stream revision seen at load time is
    /// the expected revision at append time. A concurrent writer makes this
    /// call fail with `DispatchError::Concurrency`; nothing is retried.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockbundle_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide
        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // A buggy backend must not leak another tenant's stream into this one.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockbundle_bundle::{
        BUNDLE_AGGREGATE_TYPE, Bundle, BundleCommand, BundleId, BundleState, CancelBundle,
        CreateBundle, NewBundleLine,
    };
    use stockbundle_core::{ProductId, UomId, WarehouseId};
    use stockbundle_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn create(tenant_id: TenantId, bundle_id: BundleId) -> BundleCommand {
        BundleCommand::CreateBundle(CreateBundle {
            tenant_id,
            bundle_id,
            reference: "BDL/00001".to_string(),
            warehouse_id: WarehouseId::new(),
            finished_product: ProductId::new(),
            finished_uom: UomId::new(),
            finished_quantity: dec!(1),
            lines: vec![NewBundleLine {
                product_id: ProductId::new(),
                uom_id: UomId::new(),
                quantity: dec!(2),
            }],
            occurred_at: Utc::now(),
        })
    }

    fn run(d: &Dispatcher, tenant_id: TenantId, bundle_id: BundleId, cmd: BundleCommand) -> Result<Vec<StoredEvent>, DispatchError> {
        d.dispatch(tenant_id, bundle_id.0, BUNDLE_AGGREGATE_TYPE, cmd, |_, id| {
            Bundle::empty(BundleId::new(id))
        })
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant_id = TenantId::new();
        let bundle_id = BundleId::new(AggregateId::new());

        let committed = run(&d, tenant_id, bundle_id, create(tenant_id, bundle_id)).unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].event_type, "stock.bundle.created");

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "stock.bundle.created");
        assert_eq!(published[0].sequence_number(), 1);
    }

    #[test]
    fn load_rehydrates_current_state() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let bundle_id = BundleId::new(AggregateId::new());
        run(&d, tenant_id, bundle_id, create(tenant_id, bundle_id)).unwrap();
        run(
            &d,
            tenant_id,
            bundle_id,
            BundleCommand::Cancel(CancelBundle {
                tenant_id,
                bundle_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let bundle = d
            .load(tenant_id, bundle_id.0, |_, id| Bundle::empty(BundleId::new(id)))
            .unwrap();
        assert_eq!(bundle.state(), BundleState::Cancelled);
        assert_eq!(stockbundle_core::AggregateRoot::version(&bundle), 2);
    }

    #[test]
    fn domain_errors_map_to_dispatch_errors() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let bundle_id = BundleId::new(AggregateId::new());

        let err = run(
            &d,
            tenant_id,
            bundle_id,
            BundleCommand::Cancel(CancelBundle {
                tenant_id,
                bundle_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));

        run(&d, tenant_id, bundle_id, create(tenant_id, bundle_id)).unwrap();
        let err = run(&d, tenant_id, bundle_id, create(tenant_id, bundle_id)).unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }
}
