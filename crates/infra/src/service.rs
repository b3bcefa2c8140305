//! Caller-facing bundle operations.
//!
//! `BundleService` resolves everything that needs the warehouse engine
//! (references, default units, the assembly itself) and turns the result
//! into bundle commands for the dispatcher.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use stockbundle_bundle::{
    AddLine, BUNDLE_AGGREGATE_TYPE, Bundle, BundleCommand, BundleId, CancelBundle, CompleteBundle,
    CreateBundle, DeleteBundle, NewBundleLine, RemoveLine, ResetBundleToDraft, SetFinishedProduct,
    SetFinishedQuantity, SetFinishedUom, SetLineProduct, SetLineQuantity, SetLineUom,
};
use stockbundle_core::{AggregateId, DomainError, ProductId, TenantId, UomId, WarehouseId};
use stockbundle_events::{EventBus, EventEnvelope};
use stockbundle_warehouse::{WarehouseEngine, WarehouseError};

use crate::assembly::{AssemblyError, BundleAssembler};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::BundleConfig;
use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum BundleServiceError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl From<DomainError> for BundleServiceError {
    fn from(value: DomainError) -> Self {
        BundleServiceError::Dispatch(DispatchError::from(value))
    }
}

impl BundleServiceError {
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            BundleServiceError::Dispatch(DispatchError::PreconditionViolation(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BundleServiceError::Dispatch(DispatchError::NotFound))
    }
}

/// Component line as given by a caller. A missing unit falls back to the
/// product's base unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInput {
    pub product_id: ProductId,
    pub uom_id: Option<UomId>,
    pub quantity: Decimal,
}

/// Input for [`BundleService::create_bundle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBundle {
    /// `None` or the configured placeholder allocates from the sequence.
    pub reference: Option<String>,
    pub warehouse_id: WarehouseId,
    pub finished_product: ProductId,
    pub finished_uom: Option<UomId>,
    pub finished_quantity: Decimal,
    pub lines: Vec<LineInput>,
}

/// One audit entry, newest last.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub sequence_number: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

pub struct BundleService<E, S, B> {
    engine: E,
    dispatcher: CommandDispatcher<S, B>,
    config: BundleConfig,
}

impl<E, S, B> BundleService<E, S, B>
where
    E: WarehouseEngine,
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(engine: E, dispatcher: CommandDispatcher<S, B>, config: BundleConfig) -> Self {
        Self {
            engine,
            dispatcher,
            config,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Current state of a live bundle.
    pub fn get(&self, tenant_id: TenantId, bundle_id: BundleId) -> Result<Bundle, BundleServiceError> {
        let bundle = self.load(tenant_id, bundle_id)?;
        if !bundle.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(bundle)
    }

    pub fn create_bundle(
        &self,
        tenant_id: TenantId,
        input: NewBundle,
    ) -> Result<BundleId, BundleServiceError> {
        let reference = self.reference_for(input.reference.as_deref())?;
        let finished_uom = self.unit_for(input.finished_product, input.finished_uom)?;
        let lines = input
            .lines
            .into_iter()
            .map(|l| -> Result<NewBundleLine, BundleServiceError> {
                Ok(NewBundleLine {
                    product_id: l.product_id,
                    uom_id: self.unit_for(l.product_id, l.uom_id)?,
                    quantity: l.quantity,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bundle_id = BundleId::new(AggregateId::new());
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::CreateBundle(CreateBundle {
                tenant_id,
                bundle_id,
                reference: reference.clone(),
                warehouse_id: input.warehouse_id,
                finished_product: input.finished_product,
                finished_uom,
                finished_quantity: input.finished_quantity,
                lines,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%tenant_id, %bundle_id, %reference, "bundle created");
        Ok(bundle_id)
    }

    /// Delete several bundles. If any of them is done or missing, none is
    /// deleted. Repeated ids are deleted once.
    pub fn delete_bundles(
        &self,
        tenant_id: TenantId,
        bundle_ids: &[BundleId],
    ) -> Result<(), BundleServiceError> {
        let mut seen = HashSet::with_capacity(bundle_ids.len());
        let bundle_ids: Vec<BundleId> = bundle_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        for &bundle_id in &bundle_ids {
            self.load(tenant_id, bundle_id)?.ensure_deletable()?;
        }
        for &bundle_id in &bundle_ids {
            self.dispatch(
                tenant_id,
                bundle_id,
                BundleCommand::Delete(DeleteBundle {
                    tenant_id,
                    bundle_id,
                    occurred_at: Utc::now(),
                }),
            )?;
        }
        info!(%tenant_id, count = bundle_ids.len(), "bundles deleted");
        Ok(())
    }

    /// Change the finished product; its base unit becomes the finished unit.
    pub fn set_finished_product(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        product_id: ProductId,
    ) -> Result<(), BundleServiceError> {
        let uom_id = self.engine.product(product_id)?.uom_id;
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::SetFinishedProduct(SetFinishedProduct {
                tenant_id,
                bundle_id,
                product_id,
                uom_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_finished_uom(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        uom_id: UomId,
    ) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::SetFinishedUom(SetFinishedUom {
                tenant_id,
                bundle_id,
                uom_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_finished_quantity(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        quantity: Decimal,
    ) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::SetFinishedQuantity(SetFinishedQuantity {
                tenant_id,
                bundle_id,
                quantity,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Append a component line and return its line number.
    pub fn add_line(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        line: LineInput,
    ) -> Result<u32, BundleServiceError> {
        let uom_id = self.unit_for(line.product_id, line.uom_id)?;
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::AddLine(AddLine {
                tenant_id,
                bundle_id,
                line: NewBundleLine {
                    product_id: line.product_id,
                    uom_id,
                    quantity: line.quantity,
                },
                occurred_at: Utc::now(),
            }),
        )?;

        let bundle = self.get(tenant_id, bundle_id)?;
        bundle
            .lines()
            .last()
            .map(|l| l.line_no)
            .ok_or_else(|| DomainError::invariant("added line is missing").into())
    }

    /// Change a line's product; its base unit becomes the line unit.
    pub fn set_line_product(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        line_no: u32,
        product_id: ProductId,
    ) -> Result<(), BundleServiceError> {
        let uom_id = self.engine.product(product_id)?.uom_id;
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::SetLineProduct(SetLineProduct {
                tenant_id,
                bundle_id,
                line_no,
                product_id,
                uom_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_line_uom(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        line_no: u32,
        uom_id: UomId,
    ) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::SetLineUom(SetLineUom {
                tenant_id,
                bundle_id,
                line_no,
                uom_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_line_quantity(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        line_no: u32,
        quantity: Decimal,
    ) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::SetLineQuantity(SetLineQuantity {
                tenant_id,
                bundle_id,
                line_no,
                quantity,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn remove_line(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        line_no: u32,
    ) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::RemoveLine(RemoveLine {
                tenant_id,
                bundle_id,
                line_no,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Assemble a draft bundle.
    ///
    /// All engine writes happen inside one unit of work. The bundle only
    /// becomes done once both movements are done; on any failure before the
    /// completion is stored the engine is rolled back and the bundle stays
    /// draft. Once stored, the engine is committed even if publishing the
    /// event fails, and the publish error is returned afterwards.
    #[instrument(skip(self), fields(reference = tracing::field::Empty))]
    pub fn complete(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
    ) -> Result<Bundle, BundleServiceError> {
        let bundle = self.get(tenant_id, bundle_id)?;
        bundle.ensure_completable()?;
        tracing::Span::current().record("reference", bundle.reference());

        let savepoint = self.engine.begin()?;
        let outcome = match BundleAssembler::new(&self.engine, self.config.transit_policy).assemble(&bundle) {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.abandon(savepoint, err.into())),
        };

        let recorded = self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::Complete(CompleteBundle {
                tenant_id,
                bundle_id,
                outbound_movement: outcome.outbound_movement,
                inbound_movement: outcome.inbound_movement,
                unit_valuation: outcome.valuation.unit_cost(),
                occurred_at: Utc::now(),
            }),
        );
        let delivery = match recorded {
            Ok(()) => Ok(()),
            Err(BundleServiceError::Dispatch(DispatchError::Publish(reason))) => Err(reason),
            Err(err) => return Err(self.abandon(savepoint, err)),
        };

        if let Err(commit_err) = self.engine.commit(savepoint) {
            error!(
                error = %commit_err,
                outbound = %outcome.outbound_movement,
                inbound = %outcome.inbound_movement,
                "bundle recorded as done but the engine commit failed"
            );
            return Err(commit_err.into());
        }
        info!(
            outbound = %outcome.outbound_movement,
            inbound = %outcome.inbound_movement,
            unit_cost = %outcome.valuation.unit_cost(),
            "bundle completed"
        );

        if let Err(reason) = delivery {
            warn!(%reason, "bundle completed but its events were not delivered");
            return Err(DispatchError::Publish(reason).into());
        }
        self.get(tenant_id, bundle_id)
    }

    /// Set the bundle to cancel. Generated movements are left as they are.
    pub fn cancel(&self, tenant_id: TenantId, bundle_id: BundleId) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::Cancel(CancelBundle {
                tenant_id,
                bundle_id,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%tenant_id, %bundle_id, "bundle cancelled");
        Ok(())
    }

    /// Set the bundle back to draft. Generated movements are left as they are.
    pub fn reset_to_draft(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
    ) -> Result<(), BundleServiceError> {
        self.dispatch(
            tenant_id,
            bundle_id,
            BundleCommand::ResetToDraft(ResetBundleToDraft {
                tenant_id,
                bundle_id,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%tenant_id, %bundle_id, "bundle reset to draft");
        Ok(())
    }

    /// Copy a bundle into a new draft with a fresh reference.
    pub fn duplicate(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
    ) -> Result<BundleId, BundleServiceError> {
        let source = self.get(tenant_id, bundle_id)?;
        let (Some(warehouse_id), Some(finished_product)) =
            (source.warehouse_id(), source.finished_product())
        else {
            return Err(DomainError::invariant("bundle header is incomplete").into());
        };

        self.create_bundle(
            tenant_id,
            NewBundle {
                reference: None,
                warehouse_id,
                finished_product,
                finished_uom: source.finished_uom(),
                finished_quantity: source.finished_quantity(),
                lines: source
                    .lines()
                    .iter()
                    .map(|l| LineInput {
                        product_id: l.product_id,
                        uom_id: Some(l.uom_id),
                        quantity: l.quantity,
                    })
                    .collect(),
            },
        )
    }

    /// Audit trail of a bundle, oldest first. Deleted bundles keep theirs.
    pub fn history(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
    ) -> Result<Vec<HistoryEntry>, BundleServiceError> {
        let stream = self.dispatcher.store().load_stream(tenant_id, bundle_id.0)?;
        if stream.is_empty() {
            return Err(DomainError::not_found().into());
        }
        Ok(stream
            .into_iter()
            .map(|e| HistoryEntry {
                sequence_number: e.sequence_number,
                event_type: e.event_type,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect())
    }

    fn abandon(&self, savepoint: E::Savepoint, err: BundleServiceError) -> BundleServiceError {
        warn!(error = %err, "bundle completion failed, rolling back");
        if let Err(rollback_err) = self.engine.rollback(savepoint) {
            error!(error = %rollback_err, "rollback failed");
        }
        err
    }

    fn load(&self, tenant_id: TenantId, bundle_id: BundleId) -> Result<Bundle, BundleServiceError> {
        Ok(self
            .dispatcher
            .load(tenant_id, bundle_id.0, |_, id| Bundle::empty(BundleId::new(id)))?)
    }

    fn dispatch(
        &self,
        tenant_id: TenantId,
        bundle_id: BundleId,
        command: BundleCommand,
    ) -> Result<(), BundleServiceError> {
        self.dispatcher
            .dispatch(tenant_id, bundle_id.0, BUNDLE_AGGREGATE_TYPE, command, |_, id| {
                Bundle::empty(BundleId::new(id))
            })?;
        Ok(())
    }

    fn reference_for(&self, requested: Option<&str>) -> Result<String, BundleServiceError> {
        match requested {
            Some(reference) if !self.config.needs_sequence(Some(reference)) => Ok(reference.to_string()),
            _ => Ok(self.engine.next(&self.config.sequence_code)?),
        }
    }

    fn unit_for(&self, product_id: ProductId, explicit: Option<UomId>) -> Result<UomId, BundleServiceError> {
        match explicit {
            Some(uom_id) => Ok(uom_id),
            None => Ok(self.engine.product(product_id)?.uom_id),
        }
    }
}
