//! In-memory warehouse engine for tests/dev.
//!
//! Stock is tracked per (location, product) with a weighted average unit
//! cost. Only locations whose usage holds stock are valued; moving out of a
//! virtual location (production, supplier) is always available and keeps the
//! price given on the line.
//!
//! Units of work are exclusive: `begin` blocks until the previous unit has
//! committed or rolled back. A rollback restores the snapshot taken at
//! `begin`, so writes made outside any unit while one is open are undone too.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rust_decimal::Decimal;
use tracing::debug;

use stockbundle_core::{CompanyId, LocationId, MovementId, PickingTypeId, ProductId, UomId, WarehouseId};

use crate::engine::{
    LocationRegistry, MovementEngine, ProductCatalog, SequenceAllocator, TransactionBoundary,
    WarehouseDirectory,
};
use crate::error::WarehouseError;
use crate::model::{
    Location, LocationUsage, Movement, MovementDraft, MovementLine, MovementState, OperationType,
    Product, Warehouse,
};

#[derive(Debug, Clone, Default)]
struct Quant {
    on_hand: Decimal,
    reserved: Decimal,
    unit_cost: Decimal,
}

impl Quant {
    fn free(&self) -> Decimal {
        (self.on_hand - self.reserved).max(Decimal::ZERO)
    }

    fn add(&mut self, quantity: Decimal, unit_cost: Decimal) {
        let new_on_hand = self.on_hand + quantity;
        if new_on_hand > Decimal::ZERO && self.on_hand > Decimal::ZERO {
            self.unit_cost = (self.on_hand * self.unit_cost + quantity * unit_cost) / new_on_hand;
        } else {
            self.unit_cost = unit_cost;
        }
        self.on_hand = new_on_hand;
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    locations: Vec<Location>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    products: HashMap<ProductId, Product>,
    quants: HashMap<(LocationId, ProductId), Quant>,
    movements: Vec<Movement>,
}

impl State {
    fn location(&self, id: LocationId) -> Result<&Location, WarehouseError> {
        self.locations
            .iter()
            .find(|l| l.id == id)
            .ok_or(WarehouseError::UnknownLocation(id))
    }

    fn movement_index(&self, id: MovementId) -> Result<usize, WarehouseError> {
        self.movements
            .iter()
            .position(|m| m.id == id)
            .ok_or(WarehouseError::UnknownMovement(id))
    }
}

/// At most one open unit of work per engine.
#[derive(Debug, Default)]
struct UnitGate {
    active: Mutex<bool>,
    released: Condvar,
}

fn enter(gate: &Arc<UnitGate>) -> Result<UnitPermit, WarehouseError> {
    let mut active = gate.active.lock().map_err(|_| WarehouseError::Poisoned)?;
    while *active {
        active = gate
            .released
            .wait(active)
            .map_err(|_| WarehouseError::Poisoned)?;
    }
    *active = true;
    Ok(UnitPermit(Arc::clone(gate)))
}

/// Held by an open unit of work; dropping it lets the next one in.
#[derive(Debug)]
struct UnitPermit(Arc<UnitGate>);

impl Drop for UnitPermit {
    fn drop(&mut self) {
        let mut active = self.0.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = false;
        self.0.released.notify_one();
    }
}

/// Opaque snapshot returned by [`TransactionBoundary::begin`].
#[derive(Debug)]
pub struct InMemorySavepoint {
    snapshot: State,
    _permit: UnitPermit,
}

#[derive(Debug)]
pub struct InMemoryWarehouse {
    state: RwLock<State>,
    unit_gate: Arc<UnitGate>,
    sequences: Mutex<HashMap<String, u64>>,
    sequence_prefix: String,
    sequence_padding: usize,
}

impl Default for InMemoryWarehouse {
    fn default() -> Self {
        Self {
            state: RwLock::new(State::default()),
            unit_gate: Arc::new(UnitGate::default()),
            sequences: Mutex::new(HashMap::new()),
            sequence_prefix: "BDL/".to_string(),
            sequence_padding: 5,
        }
    }
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// References come out as `{prefix}{n:0padding}`, e.g. `BDL/00001`.
    pub fn with_sequence_format(mut self, prefix: impl Into<String>, padding: usize) -> Self {
        self.sequence_prefix = prefix.into();
        self.sequence_padding = padding;
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, WarehouseError> {
        self.state.read().map_err(|_| WarehouseError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, WarehouseError> {
        self.state.write().map_err(|_| WarehouseError::Poisoned)
    }

    pub fn add_location(
        &self,
        name: impl Into<String>,
        usage: LocationUsage,
    ) -> Result<Location, WarehouseError> {
        let location = Location {
            id: LocationId::new(),
            name: name.into(),
            usage,
        };
        self.write()?.locations.push(location.clone());
        Ok(location)
    }

    pub fn add_product(
        &self,
        display_name: impl Into<String>,
        uom_id: UomId,
    ) -> Result<Product, WarehouseError> {
        let product = Product {
            id: ProductId::new(),
            display_name: display_name.into(),
            uom_id,
        };
        self.write()?.products.insert(product.id, product.clone());
        Ok(product)
    }

    /// Register a warehouse whose deliveries leave from, and receipts land in,
    /// `stock_location`.
    pub fn add_warehouse(
        &self,
        name: impl Into<String>,
        company_id: CompanyId,
        stock_location: LocationId,
    ) -> Result<Warehouse, WarehouseError> {
        let mut state = self.write()?;
        state.location(stock_location)?;

        let warehouse = Warehouse {
            id: WarehouseId::new(),
            name: name.into(),
            company_id,
            outbound: OperationType {
                id: PickingTypeId::new(),
                default_source: Some(stock_location),
                default_destination: None,
            },
            inbound: OperationType {
                id: PickingTypeId::new(),
                default_source: None,
                default_destination: Some(stock_location),
            },
        };
        state.warehouses.insert(warehouse.id, warehouse.clone());
        Ok(warehouse)
    }

    /// Put stock on hand at `location`, averaging its cost into what is there.
    pub fn receive(
        &self,
        location: LocationId,
        product: ProductId,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> Result<(), WarehouseError> {
        let mut state = self.write()?;
        if !state.location(location)?.usage.holds_stock() {
            return Err(WarehouseError::InvalidMovement(format!(
                "location {location} does not hold stock"
            )));
        }
        if !state.products.contains_key(&product) {
            return Err(WarehouseError::UnknownProduct(product));
        }
        state
            .quants
            .entry((location, product))
            .or_default()
            .add(quantity, unit_cost);
        Ok(())
    }

    pub fn on_hand(&self, location: LocationId, product: ProductId) -> Result<Decimal, WarehouseError> {
        Ok(self
            .read()?
            .quants
            .get(&(location, product))
            .map(|q| q.on_hand)
            .unwrap_or_default())
    }

    pub fn reserved(&self, location: LocationId, product: ProductId) -> Result<Decimal, WarehouseError> {
        Ok(self
            .read()?
            .quants
            .get(&(location, product))
            .map(|q| q.reserved)
            .unwrap_or_default())
    }

    pub fn average_cost(
        &self,
        location: LocationId,
        product: ProductId,
    ) -> Result<Decimal, WarehouseError> {
        Ok(self
            .read()?
            .quants
            .get(&(location, product))
            .map(|q| q.unit_cost)
            .unwrap_or_default())
    }

    /// All movements in creation order.
    pub fn movements(&self) -> Result<Vec<Movement>, WarehouseError> {
        Ok(self.read()?.movements.clone())
    }
}

impl SequenceAllocator for InMemoryWarehouse {
    fn next(&self, code: &str) -> Result<String, WarehouseError> {
        let mut sequences = self.sequences.lock().map_err(|_| WarehouseError::Poisoned)?;
        let counter = sequences.entry(code.to_string()).or_insert(0);
        *counter += 1;
        Ok(format!(
            "{}{:0width$}",
            self.sequence_prefix,
            counter,
            width = self.sequence_padding
        ))
    }
}

impl LocationRegistry for InMemoryWarehouse {
    fn find_by_usage(
        &self,
        usage: LocationUsage,
        limit: usize,
    ) -> Result<Vec<Location>, WarehouseError> {
        Ok(self
            .read()?
            .locations
            .iter()
            .filter(|l| l.usage == usage)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl WarehouseDirectory for InMemoryWarehouse {
    fn warehouse(&self, id: WarehouseId) -> Result<Warehouse, WarehouseError> {
        self.read()?
            .warehouses
            .get(&id)
            .cloned()
            .ok_or(WarehouseError::UnknownWarehouse(id))
    }
}

impl ProductCatalog for InMemoryWarehouse {
    fn product(&self, id: ProductId) -> Result<Product, WarehouseError> {
        self.read()?
            .products
            .get(&id)
            .cloned()
            .ok_or(WarehouseError::UnknownProduct(id))
    }
}

impl MovementEngine for InMemoryWarehouse {
    fn create(&self, draft: MovementDraft) -> Result<MovementId, WarehouseError> {
        let mut state = self.write()?;
        state.location(draft.source)?;
        state.location(draft.destination)?;

        let mut lines = Vec::with_capacity(draft.lines.len());
        for line in draft.lines {
            if !state.products.contains_key(&line.product_id) {
                return Err(WarehouseError::UnknownProduct(line.product_id));
            }
            if line.quantity <= Decimal::ZERO {
                return Err(WarehouseError::InvalidMovement(format!(
                    "line '{}' has non-positive quantity {}",
                    line.name, line.quantity
                )));
            }
            lines.push(MovementLine {
                product_id: line.product_id,
                uom_id: line.uom_id,
                name: line.name,
                quantity: line.quantity,
                quantity_done: line.quantity_done,
                reserved: Decimal::ZERO,
                unit_cost: line.unit_cost.unwrap_or_default(),
            });
        }

        let movement = Movement {
            id: MovementId::new(),
            picking_type_id: draft.picking_type_id,
            origin: draft.origin,
            move_type: draft.move_type,
            source: draft.source,
            destination: draft.destination,
            company_id: draft.company_id,
            state: MovementState::Draft,
            lines,
            valuation_override: None,
        };
        let id = movement.id;
        debug!(movement_id = %id, origin = %movement.origin, lines = movement.lines.len(), "movement created");
        state.movements.push(movement);
        Ok(id)
    }

    fn confirm(&self, id: MovementId) -> Result<MovementState, WarehouseError> {
        let mut state = self.write()?;
        let idx = state.movement_index(id)?;
        let movement = &mut state.movements[idx];
        if movement.state != MovementState::Draft {
            return Err(WarehouseError::InvalidState {
                movement: id,
                state: movement.state,
                operation: "confirm",
            });
        }
        movement.state = MovementState::Confirmed;
        Ok(movement.state)
    }

    fn assign(&self, id: MovementId) -> Result<MovementState, WarehouseError> {
        let mut guard = self.write()?;
        let idx = guard.movement_index(id)?;
        let source_holds_stock = guard.location(guard.movements[idx].source)?.usage.holds_stock();

        let State {
            movements, quants, ..
        } = &mut *guard;
        let movement = &mut movements[idx];
        if !matches!(
            movement.state,
            MovementState::Confirmed | MovementState::PartiallyAvailable | MovementState::Assigned
        ) {
            return Err(WarehouseError::InvalidState {
                movement: id,
                state: movement.state,
                operation: "assign",
            });
        }

        for line in &mut movement.lines {
            let missing = line.quantity - line.reserved;
            if missing <= Decimal::ZERO {
                continue;
            }
            if !source_holds_stock {
                line.reserved = line.quantity;
                continue;
            }
            let quant = quants.entry((movement.source, line.product_id)).or_default();
            let take = quant.free().min(missing);
            if take > Decimal::ZERO {
                quant.reserved += take;
                line.reserved += take;
            }
        }

        let fully = !movement.lines.is_empty()
            && movement.lines.iter().all(|l| l.reserved >= l.quantity);
        let partly = movement.lines.iter().any(|l| l.reserved > Decimal::ZERO);
        movement.state = if fully {
            MovementState::Assigned
        } else if partly {
            MovementState::PartiallyAvailable
        } else {
            MovementState::Confirmed
        };
        debug!(movement_id = %id, state = ?movement.state, "movement assigned");
        Ok(movement.state)
    }

    fn force_complete(
        &self,
        id: MovementId,
        valuation_override: Option<Decimal>,
    ) -> Result<Movement, WarehouseError> {
        let mut guard = self.write()?;
        let idx = guard.movement_index(id)?;
        let source = guard.movements[idx].source;
        let destination = guard.movements[idx].destination;
        let source_holds_stock = guard.location(source)?.usage.holds_stock();
        let destination_holds_stock = guard.location(destination)?.usage.holds_stock();

        let State {
            movements, quants, ..
        } = &mut *guard;
        let movement = &mut movements[idx];
        if !matches!(
            movement.state,
            MovementState::Confirmed | MovementState::PartiallyAvailable | MovementState::Assigned
        ) {
            return Err(WarehouseError::InvalidState {
                movement: id,
                state: movement.state,
                operation: "complete",
            });
        }

        let override_unit_cost = match valuation_override {
            Some(total) => {
                let quantity: Decimal = movement.lines.iter().map(|l| l.quantity_done).sum();
                if quantity.is_zero() {
                    return Err(WarehouseError::InvalidMovement(
                        "cannot spread a valuation override over zero quantity".to_string(),
                    ));
                }
                Some(total / quantity)
            }
            None => None,
        };

        for line in &mut movement.lines {
            if source_holds_stock {
                let quant = quants.entry((source, line.product_id)).or_default();
                quant.on_hand -= line.quantity_done;
                quant.reserved = (quant.reserved - line.reserved).max(Decimal::ZERO);
                line.unit_cost = quant.unit_cost;
            }
            line.reserved = Decimal::ZERO;
            if let Some(unit_cost) = override_unit_cost {
                line.unit_cost = unit_cost;
            }
            if destination_holds_stock {
                quants
                    .entry((destination, line.product_id))
                    .or_default()
                    .add(line.quantity_done, line.unit_cost);
            }
        }

        movement.state = MovementState::Done;
        movement.valuation_override = valuation_override;
        debug!(movement_id = %id, value = %movement.value(), "movement done");
        Ok(movement.clone())
    }

    fn movement(&self, id: MovementId) -> Result<Movement, WarehouseError> {
        let state = self.read()?;
        let idx = state.movement_index(id)?;
        Ok(state.movements[idx].clone())
    }
}

impl TransactionBoundary for InMemoryWarehouse {
    type Savepoint = InMemorySavepoint;

    fn begin(&self) -> Result<Self::Savepoint, WarehouseError> {
        let permit = enter(&self.unit_gate)?;
        Ok(InMemorySavepoint {
            snapshot: self.read()?.clone(),
            _permit: permit,
        })
    }

    fn commit(&self, _savepoint: Self::Savepoint) -> Result<(), WarehouseError> {
        Ok(())
    }

    fn rollback(&self, savepoint: Self::Savepoint) -> Result<(), WarehouseError> {
        *self.write()? = savepoint.snapshot;
        Ok(())
    }
}
