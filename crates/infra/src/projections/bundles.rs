use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockbundle_bundle::{BUNDLE_AGGREGATE_TYPE, BundleEvent, BundleId, BundleLine, BundleState};
use stockbundle_core::{AggregateId, MovementId, ProductId, TenantId, UomId, WarehouseId};
use stockbundle_events::EventEnvelope;

use crate::read_model::TenantStore;

/// List row for one bundle. Lines are owned by the row and go with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReadModel {
    pub bundle_id: BundleId,
    pub reference: String,
    pub warehouse_id: WarehouseId,
    pub finished_product: ProductId,
    pub finished_uom: UomId,
    pub finished_quantity: Decimal,
    pub state: BundleState,
    pub lines: Vec<BundleLine>,
    pub outbound_movement: Option<MovementId>,
    pub inbound_movement: Option<MovementId>,
    pub unit_valuation: Option<Decimal>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum BundleProjectionError {
    #[error("failed to deserialize bundle event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for unknown bundle {0}")]
    UnknownBundle(BundleId),

    #[error("cursor lock poisoned")]
    Poisoned,
}

/// Bundle list projection.
///
/// Idempotent under at-least-once delivery: envelopes at or below the
/// stream cursor are skipped. Envelopes from other aggregate types are
/// ignored.
#[derive(Debug)]
pub struct BundleListProjection<S>
where
    S: TenantStore<BundleId, BundleReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> BundleListProjection<S>
where
    S: TenantStore<BundleId, BundleReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, bundle_id: &BundleId) -> Option<BundleReadModel> {
        self.store.get(tenant_id, bundle_id)
    }

    /// All bundles of a tenant, ordered by reference.
    pub fn list(&self, tenant_id: TenantId) -> Vec<BundleReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.reference.cmp(&b.reference));
        rows
    }

    pub fn list_by_state(&self, tenant_id: TenantId, state: BundleState) -> Vec<BundleReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|r| r.state == state)
            .collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), BundleProjectionError> {
        if envelope.aggregate_type() != BUNDLE_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| BundleProjectionError::Poisoned)?;
        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };
        let last = cursors.get(&key).copied().unwrap_or(0);

        if seq == 0 {
            return Err(BundleProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate delivery.
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(BundleProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: BundleEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| BundleProjectionError::Deserialize(e.to_string()))?;

        if event.tenant_id() != tenant_id {
            return Err(BundleProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if event.bundle_id().0 != aggregate_id {
            return Err(BundleProjectionError::TenantIsolation(
                "event bundle_id does not match envelope aggregate_id".to_string(),
            ));
        }

        self.apply_event(tenant_id, event)?;
        cursors.insert(key, seq);
        Ok(())
    }

    fn apply_event(&self, tenant_id: TenantId, event: BundleEvent) -> Result<(), BundleProjectionError> {
        let bundle_id = event.bundle_id();

        let (mut model, event) = match event {
            BundleEvent::BundleCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.bundle_id,
                    BundleReadModel {
                        bundle_id: e.bundle_id,
                        reference: e.reference,
                        warehouse_id: e.warehouse_id,
                        finished_product: e.finished_product,
                        finished_uom: e.finished_uom,
                        finished_quantity: e.finished_quantity,
                        state: BundleState::Draft,
                        lines: e.lines,
                        outbound_movement: None,
                        inbound_movement: None,
                        unit_valuation: None,
                    },
                );
                return Ok(());
            }
            BundleEvent::BundleDeleted(_) => {
                // Header and lines leave in one write.
                self.store.remove(tenant_id, &bundle_id);
                return Ok(());
            }
            other => {
                let model = self
                    .store
                    .get(tenant_id, &bundle_id)
                    .ok_or(BundleProjectionError::UnknownBundle(bundle_id))?;
                (model, other)
            }
        };

        match event {
            BundleEvent::FinishedProductSet(e) => {
                model.finished_product = e.product_id;
                model.finished_uom = e.uom_id;
            }
            BundleEvent::FinishedUomSet(e) => model.finished_uom = e.uom_id,
            BundleEvent::FinishedQuantitySet(e) => model.finished_quantity = e.quantity,
            BundleEvent::LineAdded(e) => model.lines.push(e.line),
            BundleEvent::LineProductSet(e) => {
                if let Some(line) = model.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.product_id = e.product_id;
                    line.uom_id = e.uom_id;
                }
            }
            BundleEvent::LineUomSet(e) => {
                if let Some(line) = model.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.uom_id = e.uom_id;
                }
            }
            BundleEvent::LineQuantitySet(e) => {
                if let Some(line) = model.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.quantity = e.quantity;
                }
            }
            BundleEvent::LineRemoved(e) => model.lines.retain(|l| l.line_no != e.line_no),
            BundleEvent::BundleCompleted(e) => {
                model.state = BundleState::Done;
                model.outbound_movement = Some(e.outbound_movement);
                model.inbound_movement = Some(e.inbound_movement);
                model.unit_valuation = Some(e.unit_valuation);
            }
            BundleEvent::BundleCancelled(_) => model.state = BundleState::Cancelled,
            BundleEvent::BundleResetToDraft(_) => model.state = BundleState::Draft,
            BundleEvent::BundleCreated(_) | BundleEvent::BundleDeleted(_) => {}
        }

        self.store.upsert(tenant_id, bundle_id, model);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), BundleProjectionError> {
        self.cursors
            .write()
            .map_err(|_| BundleProjectionError::Poisoned)?
            .clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
        tenants.sort();
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
        }

        // Deterministic replay order: tenant, aggregate, sequence.
        envs.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
