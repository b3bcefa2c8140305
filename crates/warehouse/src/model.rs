//! Records owned by the warehouse engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbundle_core::{
    CompanyId, LocationId, MovementId, PickingTypeId, ProductId, UomId, WarehouseId,
};

/// What a location is used for. Only `Internal` locations hold valued stock;
/// the others are virtual counterparts (production, suppliers, customers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationUsage {
    Internal,
    Production,
    Transit,
    Supplier,
    Customer,
    Inventory,
}

impl LocationUsage {
    pub fn holds_stock(self) -> bool {
        matches!(self, LocationUsage::Internal | LocationUsage::Transit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub usage: LocationUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub display_name: String,
    /// Base unit; bundle lines default to it.
    pub uom_id: UomId,
}

/// Warehouse operation type (receipts or deliveries) with its default ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationType {
    pub id: PickingTypeId,
    pub default_source: Option<LocationId>,
    pub default_destination: Option<LocationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub company_id: CompanyId,
    /// Deliveries: its default source is where bundle components are taken from.
    pub outbound: OperationType,
    /// Receipts: its default destination is where finished goods land.
    pub inbound: OperationType,
}

/// Movement (picking) lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    Draft,
    /// Committed demand, nothing reserved yet.
    Confirmed,
    PartiallyAvailable,
    Assigned,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveType {
    /// Ship whatever is ready.
    Direct,
    /// Wait until everything is ready.
    One,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLineDraft {
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub name: String,
    pub quantity: Decimal,
    /// Pre-filled done quantity; bundles always set it to `quantity`.
    pub quantity_done: Decimal,
    /// Explicit price; only honoured when the source holds no valued stock.
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub picking_type_id: PickingTypeId,
    pub origin: String,
    pub move_type: MoveType,
    pub source: LocationId,
    pub destination: LocationId,
    pub company_id: CompanyId,
    pub lines: Vec<MovementLineDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub product_id: ProductId,
    pub uom_id: UomId,
    pub name: String,
    pub quantity: Decimal,
    pub quantity_done: Decimal,
    pub reserved: Decimal,
    /// Realized cost per unit; meaningful once the movement is done.
    pub unit_cost: Decimal,
}

impl MovementLine {
    pub fn value(&self) -> Decimal {
        self.quantity_done * self.unit_cost
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub picking_type_id: PickingTypeId,
    pub origin: String,
    pub move_type: MoveType,
    pub source: LocationId,
    pub destination: LocationId,
    pub company_id: CompanyId,
    pub state: MovementState,
    pub lines: Vec<MovementLine>,
    /// Total value forced at completion, bypassing automatic costing.
    pub valuation_override: Option<Decimal>,
}

impl Movement {
    /// Sum of realized line values.
    pub fn value(&self) -> Decimal {
        self.lines.iter().map(MovementLine::value).sum()
    }
}
