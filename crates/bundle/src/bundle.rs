use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbundle_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Entity, MovementId, ProductId, TenantId,
    UomId, WarehouseId,
};
use stockbundle_events::Event;

/// Stream type for bundle events.
pub const BUNDLE_AGGREGATE_TYPE: &str = "stock.bundle";

/// Bundle identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub AggregateId);

impl BundleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BundleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleState {
    Draft,
    #[serde(rename = "cancel")]
    Cancelled,
    Done,
}

/// One component requirement, in absolute quantity for the whole bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub quantity: Decimal,
}

impl Entity for BundleLine {
    type Id = u32;

    fn id(&self) -> &Self::Id {
        &self.line_no
    }
}

/// Line input for creation and `AddLine`, before a line number is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBundleLine {
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub quantity: Decimal,
}

/// Aggregate root: Bundle.
///
/// Lines are owned exclusively; deletion drops them together with the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    id: BundleId,
    tenant_id: Option<TenantId>,
    reference: String,
    warehouse_id: Option<WarehouseId>,
    finished_product: Option<ProductId>,
    finished_uom: Option<UomId>,
    finished_quantity: Decimal,
    lines: Vec<BundleLine>,
    next_line_no: u32,
    state: BundleState,
    outbound_movement: Option<MovementId>,
    inbound_movement: Option<MovementId>,
    unit_valuation: Option<Decimal>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Bundle {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BundleId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            warehouse_id: None,
            finished_product: None,
            finished_uom: None,
            finished_quantity: Decimal::ZERO,
            lines: Vec::new(),
            next_line_no: 1,
            state: BundleState::Draft,
            outbound_movement: None,
            inbound_movement: None,
            unit_valuation: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> BundleId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn finished_product(&self) -> Option<ProductId> {
        self.finished_product
    }

    pub fn finished_uom(&self) -> Option<UomId> {
        self.finished_uom
    }

    pub fn finished_quantity(&self) -> Decimal {
        self.finished_quantity
    }

    pub fn lines(&self) -> &[BundleLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&BundleLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn state(&self) -> BundleState {
        self.state
    }

    pub fn outbound_movement(&self) -> Option<MovementId> {
        self.outbound_movement
    }

    pub fn inbound_movement(&self) -> Option<MovementId> {
        self.inbound_movement
    }

    pub fn unit_valuation(&self) -> Option<Decimal> {
        self.unit_valuation
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Checks that must pass before any warehouse work starts for `complete`.
    pub fn ensure_completable(&self) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if self.state != BundleState::Draft {
            return Err(DomainError::precondition(format!(
                "only draft bundles can be completed (bundle '{}' is {:?})",
                self.reference, self.state
            )));
        }
        if self.warehouse_id.is_none() || self.finished_product.is_none() {
            return Err(DomainError::invariant("bundle header is incomplete"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("bundle has no component lines"));
        }
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if self.state == BundleState::Done {
            return Err(DomainError::precondition(format!(
                "unable to delete finished bundle '{}'",
                self.reference
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Bundle {
    type Id = BundleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBundle. `reference` is already resolved (sequence or caller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBundle {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub reference: String,
    pub warehouse_id: WarehouseId,
    pub finished_product: ProductId,
    pub finished_uom: UomId,
    pub finished_quantity: Decimal,
    pub lines: Vec<NewBundleLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetFinishedProduct. `uom_id` carries the product's default unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFinishedProduct {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFinishedUom {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFinishedQuantity {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line: NewBundleLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetLineProduct. `uom_id` carries the product's default unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLineProduct {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLineUom {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLineQuantity {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteBundle. Issued only after both movements are done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteBundle {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub outbound_movement: MovementId,
    pub inbound_movement: MovementId,
    pub unit_valuation: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBundle {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetBundleToDraft {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBundle {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleCommand {
    CreateBundle(CreateBundle),
    SetFinishedProduct(SetFinishedProduct),
    SetFinishedUom(SetFinishedUom),
    SetFinishedQuantity(SetFinishedQuantity),
    AddLine(AddLine),
    SetLineProduct(SetLineProduct),
    SetLineUom(SetLineUom),
    SetLineQuantity(SetLineQuantity),
    RemoveLine(RemoveLine),
    Complete(CompleteBundle),
    Cancel(CancelBundle),
    ResetToDraft(ResetBundleToDraft),
    Delete(DeleteBundle),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCreated {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub reference: String,
    pub warehouse_id: WarehouseId,
    pub finished_product: ProductId,
    pub finished_uom: UomId,
    pub finished_quantity: Decimal,
    pub lines: Vec<BundleLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedProductSet {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedUomSet {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedQuantitySet {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line: BundleLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProductSet {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUomSet {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub uom_id: UomId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantitySet {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BundleCompleted. Both movements are done when this is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCompleted {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub outbound_movement: MovementId,
    pub inbound_movement: MovementId,
    pub unit_valuation: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCancelled {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub previous_state: BundleState,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleResetToDraft {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub previous_state: BundleState,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDeleted {
    pub tenant_id: TenantId,
    pub bundle_id: BundleId,
    pub removed_lines: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleEvent {
    BundleCreated(BundleCreated),
    FinishedProductSet(FinishedProductSet),
    FinishedUomSet(FinishedUomSet),
    FinishedQuantitySet(FinishedQuantitySet),
    LineAdded(LineAdded),
    LineProductSet(LineProductSet),
    LineUomSet(LineUomSet),
    LineQuantitySet(LineQuantitySet),
    LineRemoved(LineRemoved),
    BundleCompleted(BundleCompleted),
    BundleCancelled(BundleCancelled),
    BundleResetToDraft(BundleResetToDraft),
    BundleDeleted(BundleDeleted),
}

impl BundleEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            BundleEvent::BundleCreated(e) => e.tenant_id,
            BundleEvent::FinishedProductSet(e) => e.tenant_id,
            BundleEvent::FinishedUomSet(e) => e.tenant_id,
            BundleEvent::FinishedQuantitySet(e) => e.tenant_id,
            BundleEvent::LineAdded(e) => e.tenant_id,
            BundleEvent::LineProductSet(e) => e.tenant_id,
            BundleEvent::LineUomSet(e) => e.tenant_id,
            BundleEvent::LineQuantitySet(e) => e.tenant_id,
            BundleEvent::LineRemoved(e) => e.tenant_id,
            BundleEvent::BundleCompleted(e) => e.tenant_id,
            BundleEvent::BundleCancelled(e) => e.tenant_id,
            BundleEvent::BundleResetToDraft(e) => e.tenant_id,
            BundleEvent::BundleDeleted(e) => e.tenant_id,
        }
    }

    pub fn bundle_id(&self) -> BundleId {
        match self {
            BundleEvent::BundleCreated(e) => e.bundle_id,
            BundleEvent::FinishedProductSet(e) => e.bundle_id,
            BundleEvent::FinishedUomSet(e) => e.bundle_id,
            BundleEvent::FinishedQuantitySet(e) => e.bundle_id,
            BundleEvent::LineAdded(e) => e.bundle_id,
            BundleEvent::LineProductSet(e) => e.bundle_id,
            BundleEvent::LineUomSet(e) => e.bundle_id,
            BundleEvent::LineQuantitySet(e) => e.bundle_id,
            BundleEvent::LineRemoved(e) => e.bundle_id,
            BundleEvent::BundleCompleted(e) => e.bundle_id,
            BundleEvent::BundleCancelled(e) => e.bundle_id,
            BundleEvent::BundleResetToDraft(e) => e.bundle_id,
            BundleEvent::BundleDeleted(e) => e.bundle_id,
        }
    }
}

impl Event for BundleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BundleEvent::BundleCreated(_) => "stock.bundle.created",
            BundleEvent::FinishedProductSet(_) => "stock.bundle.finished_product_set",
            BundleEvent::FinishedUomSet(_) => "stock.bundle.finished_uom_set",
            BundleEvent::FinishedQuantitySet(_) => "stock.bundle.finished_quantity_set",
            BundleEvent::LineAdded(_) => "stock.bundle.line_added",
            BundleEvent::LineProductSet(_) => "stock.bundle.line_product_set",
            BundleEvent::LineUomSet(_) => "stock.bundle.line_uom_set",
            BundleEvent::LineQuantitySet(_) => "stock.bundle.line_quantity_set",
            BundleEvent::LineRemoved(_) => "stock.bundle.line_removed",
            BundleEvent::BundleCompleted(_) => "stock.bundle.completed",
            BundleEvent::BundleCancelled(_) => "stock.bundle.cancelled",
            BundleEvent::BundleResetToDraft(_) => "stock.bundle.reset_to_draft",
            BundleEvent::BundleDeleted(_) => "stock.bundle.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BundleEvent::BundleCreated(e) => e.occurred_at,
            BundleEvent::FinishedProductSet(e) => e.occurred_at,
            BundleEvent::FinishedUomSet(e) => e.occurred_at,
            BundleEvent::FinishedQuantitySet(e) => e.occurred_at,
            BundleEvent::LineAdded(e) => e.occurred_at,
            BundleEvent::LineProductSet(e) => e.occurred_at,
            BundleEvent::LineUomSet(e) => e.occurred_at,
            BundleEvent::LineQuantitySet(e) => e.occurred_at,
            BundleEvent::LineRemoved(e) => e.occurred_at,
            BundleEvent::BundleCompleted(e) => e.occurred_at,
            BundleEvent::BundleCancelled(e) => e.occurred_at,
            BundleEvent::BundleResetToDraft(e) => e.occurred_at,
            BundleEvent::BundleDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Bundle {
    type Command = BundleCommand;
    type Event = BundleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BundleEvent::BundleCreated(e) => {
                self.id = e.bundle_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.warehouse_id = Some(e.warehouse_id);
                self.finished_product = Some(e.finished_product);
                self.finished_uom = Some(e.finished_uom);
                self.finished_quantity = e.finished_quantity;
                self.lines = e.lines.clone();
                self.next_line_no = e.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
                self.state = BundleState::Draft;
                self.created = true;
            }
            BundleEvent::FinishedProductSet(e) => {
                self.finished_product = Some(e.product_id);
                self.finished_uom = Some(e.uom_id);
            }
            BundleEvent::FinishedUomSet(e) => {
                self.finished_uom = Some(e.uom_id);
            }
            BundleEvent::FinishedQuantitySet(e) => {
                self.finished_quantity = e.quantity;
            }
            BundleEvent::LineAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.line.line_no + 1);
                self.lines.push(e.line.clone());
            }
            BundleEvent::LineProductSet(e) => {
                if let Some(line) = self.line_mut(e.line_no) {
                    line.product_id = e.product_id;
                    line.uom_id = e.uom_id;
                }
            }
            BundleEvent::LineUomSet(e) => {
                if let Some(line) = self.line_mut(e.line_no) {
                    line.uom_id = e.uom_id;
                }
            }
            BundleEvent::LineQuantitySet(e) => {
                if let Some(line) = self.line_mut(e.line_no) {
                    line.quantity = e.quantity;
                }
            }
            BundleEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            BundleEvent::BundleCompleted(e) => {
                self.outbound_movement = Some(e.outbound_movement);
                self.inbound_movement = Some(e.inbound_movement);
                self.unit_valuation = Some(e.unit_valuation);
                self.state = BundleState::Done;
            }
            BundleEvent::BundleCancelled(_) => {
                self.state = BundleState::Cancelled;
            }
            BundleEvent::BundleResetToDraft(_) => {
                self.state = BundleState::Draft;
            }
            BundleEvent::BundleDeleted(_) => {
                self.lines.clear();
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BundleCommand::CreateBundle(cmd) => self.handle_create(cmd),
            BundleCommand::SetFinishedProduct(cmd) => self.handle_set_finished_product(cmd),
            BundleCommand::SetFinishedUom(cmd) => self.handle_set_finished_uom(cmd),
            BundleCommand::SetFinishedQuantity(cmd) => self.handle_set_finished_quantity(cmd),
            BundleCommand::AddLine(cmd) => self.handle_add_line(cmd),
            BundleCommand::SetLineProduct(cmd) => self.handle_set_line_product(cmd),
            BundleCommand::SetLineUom(cmd) => self.handle_set_line_uom(cmd),
            BundleCommand::SetLineQuantity(cmd) => self.handle_set_line_quantity(cmd),
            BundleCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            BundleCommand::Complete(cmd) => self.handle_complete(cmd),
            BundleCommand::Cancel(cmd) => self.handle_cancel(cmd),
            BundleCommand::ResetToDraft(cmd) => self.handle_reset(cmd),
            BundleCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

fn ensure_positive(what: &str, quantity: Decimal) -> Result<(), DomainError> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{what} must be positive")));
    }
    Ok(())
}

impl Bundle {
    fn line_mut(&mut self, line_no: u32) -> Option<&mut BundleLine> {
        self.lines.iter_mut().find(|l| l.line_no == line_no)
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_target(&self, tenant_id: TenantId, bundle_id: BundleId) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != bundle_id {
            return Err(DomainError::invariant("bundle_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self, tenant_id: TenantId, bundle_id: BundleId) -> Result<(), DomainError> {
        self.ensure_target(tenant_id, bundle_id)?;
        if self.state != BundleState::Draft {
            return Err(DomainError::precondition(format!(
                "bundle '{}' can only be edited in draft",
                self.reference
            )));
        }
        Ok(())
    }

    fn ensure_line(&self, line_no: u32) -> Result<(), DomainError> {
        if self.line(line_no).is_none() {
            return Err(DomainError::validation(format!("bundle has no line {line_no}")));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBundle) -> Result<Vec<BundleEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("bundle already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }
        ensure_positive("finished quantity", cmd.finished_quantity)?;
        for line in &cmd.lines {
            ensure_positive("line quantity", line.quantity)?;
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(l, line_no)| BundleLine {
                line_no,
                product_id: l.product_id,
                uom_id: l.uom_id,
                quantity: l.quantity,
            })
            .collect();

        Ok(vec![BundleEvent::BundleCreated(BundleCreated {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            reference: cmd.reference.clone(),
            warehouse_id: cmd.warehouse_id,
            finished_product: cmd.finished_product,
            finished_uom: cmd.finished_uom,
            finished_quantity: cmd.finished_quantity,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_finished_product(
        &self,
        cmd: &SetFinishedProduct,
    ) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        Ok(vec![BundleEvent::FinishedProductSet(FinishedProductSet {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            product_id: cmd.product_id,
            uom_id: cmd.uom_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_finished_uom(&self, cmd: &SetFinishedUom) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        Ok(vec![BundleEvent::FinishedUomSet(FinishedUomSet {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            uom_id: cmd.uom_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_finished_quantity(
        &self,
        cmd: &SetFinishedQuantity,
    ) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        ensure_positive("finished quantity", cmd.quantity)?;
        Ok(vec![BundleEvent::FinishedQuantitySet(FinishedQuantitySet {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        ensure_positive("line quantity", cmd.line.quantity)?;
        Ok(vec![BundleEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            line: BundleLine {
                line_no: self.next_line_no,
                product_id: cmd.line.product_id,
                uom_id: cmd.line.uom_id,
                quantity: cmd.line.quantity,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_line_product(&self, cmd: &SetLineProduct) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        self.ensure_line(cmd.line_no)?;
        Ok(vec![BundleEvent::LineProductSet(LineProductSet {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            line_no: cmd.line_no,
            product_id: cmd.product_id,
            uom_id: cmd.uom_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_line_uom(&self, cmd: &SetLineUom) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        self.ensure_line(cmd.line_no)?;
        Ok(vec![BundleEvent::LineUomSet(LineUomSet {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            line_no: cmd.line_no,
            uom_id: cmd.uom_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_line_quantity(
        &self,
        cmd: &SetLineQuantity,
    ) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        self.ensure_line(cmd.line_no)?;
        ensure_positive("line quantity", cmd.quantity)?;
        Ok(vec![BundleEvent::LineQuantitySet(LineQuantitySet {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            line_no: cmd.line_no,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_editable(cmd.tenant_id, cmd.bundle_id)?;
        self.ensure_line(cmd.line_no)?;
        Ok(vec![BundleEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteBundle) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.bundle_id)?;
        self.ensure_completable()?;
        Ok(vec![BundleEvent::BundleCompleted(BundleCompleted {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            outbound_movement: cmd.outbound_movement,
            inbound_movement: cmd.inbound_movement,
            unit_valuation: cmd.unit_valuation,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelBundle) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.bundle_id)?;
        Ok(vec![BundleEvent::BundleCancelled(BundleCancelled {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            previous_state: self.state,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reset(&self, cmd: &ResetBundleToDraft) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.bundle_id)?;
        Ok(vec![BundleEvent::BundleResetToDraft(BundleResetToDraft {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            previous_state: self.state,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteBundle) -> Result<Vec<BundleEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.bundle_id)?;
        self.ensure_deletable()?;
        Ok(vec![BundleEvent::BundleDeleted(BundleDeleted {
            tenant_id: cmd.tenant_id,
            bundle_id: cmd.bundle_id,
            removed_lines: self.lines.iter().map(|l| l.line_no).collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockbundle_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    struct Ctx {
        tenant_id: TenantId,
        bundle_id: BundleId,
    }

    fn ctx() -> Ctx {
        Ctx {
            tenant_id: TenantId::new(),
            bundle_id: BundleId::new(AggregateId::new()),
        }
    }

    fn component(quantity: Decimal) -> NewBundleLine {
        NewBundleLine {
            product_id: ProductId::new(),
            uom_id: UomId::new(),
            quantity,
        }
    }

    fn create_cmd(c: &Ctx, lines: Vec<NewBundleLine>) -> BundleCommand {
        BundleCommand::CreateBundle(CreateBundle {
            tenant_id: c.tenant_id,
            bundle_id: c.bundle_id,
            reference: "BDL/00001".to_string(),
            warehouse_id: WarehouseId::new(),
            finished_product: ProductId::new(),
            finished_uom: UomId::new(),
            finished_quantity: dec!(5),
            lines,
            occurred_at: test_time(),
        })
    }

    fn created(c: &Ctx) -> Bundle {
        let mut bundle = Bundle::empty(c.bundle_id);
        execute(&mut bundle, &create_cmd(c, vec![component(dec!(10))])).unwrap();
        bundle
    }

    fn complete_cmd(c: &Ctx) -> BundleCommand {
        BundleCommand::Complete(CompleteBundle {
            tenant_id: c.tenant_id,
            bundle_id: c.bundle_id,
            outbound_movement: MovementId::new(),
            inbound_movement: MovementId::new(),
            unit_valuation: dec!(4),
            occurred_at: test_time(),
        })
    }

    fn cancel_cmd(c: &Ctx) -> BundleCommand {
        BundleCommand::Cancel(CancelBundle {
            tenant_id: c.tenant_id,
            bundle_id: c.bundle_id,
            occurred_at: test_time(),
        })
    }

    fn reset_cmd(c: &Ctx) -> BundleCommand {
        BundleCommand::ResetToDraft(ResetBundleToDraft {
            tenant_id: c.tenant_id,
            bundle_id: c.bundle_id,
            occurred_at: test_time(),
        })
    }

    fn delete_cmd(c: &Ctx) -> BundleCommand {
        BundleCommand::Delete(DeleteBundle {
            tenant_id: c.tenant_id,
            bundle_id: c.bundle_id,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_numbers_lines_and_starts_in_draft() {
        let c = ctx();
        let mut bundle = Bundle::empty(c.bundle_id);
        let events = execute(
            &mut bundle,
            &create_cmd(&c, vec![component(dec!(10)), component(dec!(2))]),
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(bundle.state(), BundleState::Draft);
        assert_eq!(
            bundle.lines().iter().map(|l| l.line_no).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(bundle.outbound_movement().is_none());
        assert!(bundle.inbound_movement().is_none());
        assert_eq!(bundle.version(), 1);
    }

    #[test]
    fn create_rejects_non_positive_quantities() {
        let c = ctx();
        let bundle = Bundle::empty(c.bundle_id);
        let err = bundle
            .handle(&create_cmd(&c, vec![component(Decimal::ZERO)]))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("line quantity must be positive"));

        let mut cmd = create_cmd(&c, vec![]);
        if let BundleCommand::CreateBundle(create) = &mut cmd {
            create.finished_quantity = Decimal::ZERO;
        }
        let err = bundle.handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::validation("finished quantity must be positive"));
    }

    #[test]
    fn create_twice_conflicts() {
        let c = ctx();
        let bundle = created(&c);
        let err = bundle.handle(&create_cmd(&c, vec![])).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn setting_finished_product_sets_its_unit() {
        let c = ctx();
        let mut bundle = created(&c);
        let product_id = ProductId::new();
        let uom_id = UomId::new();

        execute(
            &mut bundle,
            &BundleCommand::SetFinishedProduct(SetFinishedProduct {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                product_id,
                uom_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(bundle.finished_product(), Some(product_id));
        assert_eq!(bundle.finished_uom(), Some(uom_id));

        let override_uom = UomId::new();
        execute(
            &mut bundle,
            &BundleCommand::SetFinishedUom(SetFinishedUom {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                uom_id: override_uom,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(bundle.finished_product(), Some(product_id));
        assert_eq!(bundle.finished_uom(), Some(override_uom));
    }

    #[test]
    fn line_edits_update_the_right_line() {
        let c = ctx();
        let mut bundle = created(&c);

        execute(
            &mut bundle,
            &BundleCommand::AddLine(AddLine {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                line: component(dec!(3)),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let product_id = ProductId::new();
        let uom_id = UomId::new();
        execute(
            &mut bundle,
            &BundleCommand::SetLineProduct(SetLineProduct {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                line_no: 2,
                product_id,
                uom_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut bundle,
            &BundleCommand::SetLineQuantity(SetLineQuantity {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                line_no: 2,
                quantity: dec!(7),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let line = bundle.line(2).unwrap();
        assert_eq!(line.product_id, product_id);
        assert_eq!(line.uom_id, uom_id);
        assert_eq!(line.quantity, dec!(7));
        assert_eq!(bundle.line(1).unwrap().quantity, dec!(10));
    }

    #[test]
    fn removed_line_numbers_are_not_reused() {
        let c = ctx();
        let mut bundle = created(&c);
        execute(
            &mut bundle,
            &BundleCommand::RemoveLine(RemoveLine {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                line_no: 1,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut bundle,
            &BundleCommand::AddLine(AddLine {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                line: component(dec!(1)),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(bundle.lines().len(), 1);
        assert_eq!(bundle.lines()[0].line_no, 2);
    }

    #[test]
    fn unknown_line_is_rejected() {
        let c = ctx();
        let bundle = created(&c);
        let err = bundle
            .handle(&BundleCommand::RemoveLine(RemoveLine {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                line_no: 9,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("bundle has no line 9"));
    }

    #[test]
    fn complete_records_both_movements() {
        let c = ctx();
        let mut bundle = created(&c);
        execute(&mut bundle, &complete_cmd(&c)).unwrap();

        assert_eq!(bundle.state(), BundleState::Done);
        assert!(bundle.outbound_movement().is_some());
        assert!(bundle.inbound_movement().is_some());
        assert_eq!(bundle.unit_valuation(), Some(dec!(4)));
    }

    #[test]
    fn done_bundle_cannot_be_completed_or_edited() {
        let c = ctx();
        let mut bundle = created(&c);
        execute(&mut bundle, &complete_cmd(&c)).unwrap();

        let err = bundle.handle(&complete_cmd(&c)).unwrap_err();
        assert!(matches!(err, DomainError::PreconditionViolation(_)));

        let err = bundle
            .handle(&BundleCommand::SetFinishedQuantity(SetFinishedQuantity {
                tenant_id: c.tenant_id,
                bundle_id: c.bundle_id,
                quantity: dec!(1),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::PreconditionViolation(_)));
    }

    #[test]
    fn completing_without_lines_is_rejected() {
        let c = ctx();
        let mut bundle = Bundle::empty(c.bundle_id);
        execute(&mut bundle, &create_cmd(&c, vec![])).unwrap();
        assert_eq!(
            bundle.ensure_completable().unwrap_err(),
            DomainError::validation("bundle has no component lines")
        );
    }

    #[test]
    fn done_bundle_cannot_be_deleted() {
        let c = ctx();
        let mut bundle = created(&c);
        execute(&mut bundle, &complete_cmd(&c)).unwrap();

        let err = bundle.handle(&delete_cmd(&c)).unwrap_err();
        assert!(matches!(err, DomainError::PreconditionViolation(msg) if msg.contains("unable to delete finished bundle")));
    }

    #[test]
    fn delete_drops_lines_and_hides_the_bundle() {
        let c = ctx();
        let mut bundle = created(&c);
        let events = execute(&mut bundle, &delete_cmd(&c)).unwrap();

        match &events[0] {
            BundleEvent::BundleDeleted(e) => assert_eq!(e.removed_lines, vec![1]),
            other => panic!("expected BundleDeleted, got {other:?}"),
        }
        assert!(bundle.lines().is_empty());
        assert!(!bundle.exists());
        assert_eq!(bundle.handle(&cancel_cmd(&c)).unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn cancel_then_reset_keeps_movement_references() {
        let c = ctx();
        let mut bundle = created(&c);
        execute(&mut bundle, &complete_cmd(&c)).unwrap();
        let outbound = bundle.outbound_movement();
        let inbound = bundle.inbound_movement();

        execute(&mut bundle, &cancel_cmd(&c)).unwrap();
        assert_eq!(bundle.state(), BundleState::Cancelled);
        execute(&mut bundle, &reset_cmd(&c)).unwrap();
        assert_eq!(bundle.state(), BundleState::Draft);

        assert_eq!(bundle.outbound_movement(), outbound);
        assert_eq!(bundle.inbound_movement(), inbound);
    }

    #[test]
    fn cancelled_bundle_can_be_deleted() {
        let c = ctx();
        let mut bundle = created(&c);
        execute(&mut bundle, &complete_cmd(&c)).unwrap();
        execute(&mut bundle, &cancel_cmd(&c)).unwrap();
        assert!(execute(&mut bundle, &delete_cmd(&c)).is_ok());
    }

    #[test]
    fn foreign_tenant_is_rejected() {
        let c = ctx();
        let bundle = created(&c);
        let other = Ctx {
            tenant_id: TenantId::new(),
            bundle_id: c.bundle_id,
        };
        let err = bundle.handle(&cancel_cmd(&other)).unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }

    #[test]
    fn cancelled_state_serializes_as_cancel() {
        assert_eq!(
            serde_json::to_string(&BundleState::Cancelled).unwrap(),
            "\"cancel\""
        );
        assert_eq!(serde_json::to_string(&BundleState::Done).unwrap(), "\"done\"");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Any interleaving of add/remove keeps line numbers unique, and
        /// deleting the bundle always leaves no lines behind.
        #[test]
        fn lines_stay_unique_and_die_with_the_bundle(ops in prop::collection::vec(any::<bool>(), 0..30)) {
            let c = ctx();
            let mut bundle = created(&c);

            for add in ops {
                if add {
                    execute(&mut bundle, &BundleCommand::AddLine(AddLine {
                        tenant_id: c.tenant_id,
                        bundle_id: c.bundle_id,
                        line: component(dec!(1)),
                        occurred_at: test_time(),
                    })).unwrap();
                } else if let Some(first) = bundle.lines().first().map(|l| l.line_no) {
                    execute(&mut bundle, &BundleCommand::RemoveLine(RemoveLine {
                        tenant_id: c.tenant_id,
                        bundle_id: c.bundle_id,
                        line_no: first,
                        occurred_at: test_time(),
                    })).unwrap();
                }
            }

            let mut numbers: Vec<u32> = bundle.lines().iter().map(|l| l.line_no).collect();
            let len = numbers.len();
            numbers.sort_unstable();
            numbers.dedup();
            prop_assert_eq!(numbers.len(), len);

            execute(&mut bundle, &delete_cmd(&c)).unwrap();
            prop_assert!(bundle.lines().is_empty());
        }
    }
}
