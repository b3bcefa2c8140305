//! Bundle assembly: the warehouse work behind `complete`.
//!
//! ```text
//! check finished quantity
//!   ↓
//! resolve transit (production) location
//!   ↓
//! outbound movement: components, stock → transit
//!   ↓ confirm, assign (must be fully assigned), force-complete
//! valuation = Σ(qty_done × unit_cost) / finished_quantity
//!   ↓
//! inbound movement: finished good, transit → stock
//!   ↓ confirm, force-complete with override = valuation × finished_quantity
//! ```
//!
//! The assembler only talks to the engine. It neither opens nor closes the
//! unit of work and never touches the bundle's own state; the service does
//! both around it.

use thiserror::Error;
use tracing::debug;

use stockbundle_bundle::{Bundle, Valuation, ValuationError};
use stockbundle_core::{LocationId, MovementId};
use stockbundle_warehouse::{
    Location, LocationRegistry, LocationUsage, MoveType, MovementDraft, MovementEngine,
    MovementLineDraft, MovementState, ProductCatalog, Warehouse, WarehouseDirectory,
    WarehouseError,
};

use crate::config::TransitPolicy;

#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Missing or ambiguous setup in the warehouse engine.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The outbound reservation did not cover every component.
    #[error("insufficient product to bundle '{reference}' (movement {movement} is {state:?})")]
    InsufficientStock {
        reference: String,
        movement: MovementId,
        state: MovementState,
    },

    #[error(transparent)]
    Division(#[from] ValuationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// What a successful assembly produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyOutcome {
    pub outbound_movement: MovementId,
    pub inbound_movement: MovementId,
    pub valuation: Valuation,
}

/// Runs the two linked movements of one bundle against an engine.
#[derive(Debug)]
pub struct BundleAssembler<'a, E: ?Sized> {
    engine: &'a E,
    transit_policy: TransitPolicy,
}

impl<'a, E> BundleAssembler<'a, E>
where
    E: LocationRegistry + WarehouseDirectory + ProductCatalog + MovementEngine + ?Sized,
{
    pub fn new(engine: &'a E, transit_policy: TransitPolicy) -> Self {
        Self {
            engine,
            transit_policy,
        }
    }

    /// Pick the production location used as the transit point.
    pub fn resolve_transit(&self) -> Result<Location, AssemblyError> {
        let limit = match self.transit_policy {
            TransitPolicy::First => 1,
            TransitPolicy::Unique => 2,
        };
        let mut found = self.engine.find_by_usage(LocationUsage::Production, limit)?;

        if found.len() > 1 {
            return Err(AssemblyError::Configuration(
                "more than one production location defined".to_string(),
            ));
        }
        found
            .pop()
            .ok_or_else(|| AssemblyError::Configuration("no production location defined".to_string()))
    }

    /// Assemble `bundle`. The caller has already checked that it is a
    /// completable draft.
    pub fn assemble(&self, bundle: &Bundle) -> Result<AssemblyOutcome, AssemblyError> {
        // Nothing is created if the finished quantity cannot be divided into.
        Valuation::check_quantity(bundle.finished_quantity())?;

        let transit = self.resolve_transit()?;
        let warehouse = self.warehouse(bundle)?;
        debug!(transit = %transit.name, warehouse = %warehouse.name, "assembly resolved locations");

        let outbound = self.run_outbound(bundle, &warehouse, transit.id)?;
        let consumed = self.engine.force_complete(outbound, None)?;
        let valuation = Valuation::from_consumption(
            consumed.lines.iter().map(|l| (l.quantity_done, l.unit_cost)),
            bundle.finished_quantity(),
        )?;
        debug!(movement_id = %outbound, unit_cost = %valuation.unit_cost(), "components consumed");

        let inbound = self.run_inbound(bundle, &warehouse, transit.id, &valuation)?;
        debug!(movement_id = %inbound, "finished good received");

        Ok(AssemblyOutcome {
            outbound_movement: outbound,
            inbound_movement: inbound,
            valuation,
        })
    }

    fn warehouse(&self, bundle: &Bundle) -> Result<Warehouse, AssemblyError> {
        let id = bundle
            .warehouse_id()
            .ok_or_else(|| AssemblyError::Configuration("bundle has no warehouse".to_string()))?;
        Ok(self.engine.warehouse(id)?)
    }

    /// Create, confirm and reserve the component movement.
    fn run_outbound(
        &self,
        bundle: &Bundle,
        warehouse: &Warehouse,
        transit: LocationId,
    ) -> Result<MovementId, AssemblyError> {
        let source = warehouse.outbound.default_source.ok_or_else(|| {
            AssemblyError::Configuration(format!(
                "warehouse '{}' has no default source for deliveries",
                warehouse.name
            ))
        })?;

        let lines = bundle
            .lines()
            .iter()
            .map(|line| -> Result<MovementLineDraft, WarehouseError> {
                let product = self.engine.product(line.product_id)?;
                Ok(MovementLineDraft {
                    product_id: line.product_id,
                    uom_id: line.uom_id,
                    name: product.display_name,
                    quantity: line.quantity,
                    quantity_done: line.quantity,
                    unit_cost: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = self.engine.create(MovementDraft {
            picking_type_id: warehouse.outbound.id,
            origin: bundle.reference().to_string(),
            move_type: MoveType::Direct,
            source,
            destination: transit,
            company_id: warehouse.company_id,
            lines,
        })?;

        self.engine.confirm(id)?;
        let state = self.engine.assign(id)?;
        if state != MovementState::Assigned {
            return Err(AssemblyError::InsufficientStock {
                reference: bundle.reference().to_string(),
                movement: id,
                state,
            });
        }
        Ok(id)
    }

    /// Create, confirm and force-complete the finished-good movement.
    fn run_inbound(
        &self,
        bundle: &Bundle,
        warehouse: &Warehouse,
        transit: LocationId,
        valuation: &Valuation,
    ) -> Result<MovementId, AssemblyError> {
        let destination = warehouse.inbound.default_destination.ok_or_else(|| {
            AssemblyError::Configuration(format!(
                "warehouse '{}' has no default destination for receipts",
                warehouse.name
            ))
        })?;
        let (product_id, uom_id) = bundle
            .finished_product()
            .zip(bundle.finished_uom())
            .ok_or_else(|| AssemblyError::Configuration("bundle has no finished product".to_string()))?;
        let product = self.engine.product(product_id)?;

        let id = self.engine.create(MovementDraft {
            picking_type_id: warehouse.inbound.id,
            origin: bundle.reference().to_string(),
            move_type: MoveType::Direct,
            source: transit,
            destination,
            company_id: warehouse.company_id,
            lines: vec![MovementLineDraft {
                product_id,
                uom_id,
                name: product.display_name,
                quantity: bundle.finished_quantity(),
                quantity_done: bundle.finished_quantity(),
                unit_cost: Some(valuation.inbound_unit_cost()),
            }],
        })?;

        self.engine.confirm(id)?;
        self.engine
            .force_complete(id, Some(valuation.override_total()))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use stockbundle_bundle::{
        BundleCommand, BundleCreated, BundleEvent, BundleId, BundleLine, CreateBundle, NewBundleLine,
    };
    use stockbundle_core::{Aggregate, AggregateId, CompanyId, TenantId, UomId};
    use stockbundle_events::execute;
    use stockbundle_warehouse::{InMemoryWarehouse, Product};

    struct Fixture {
        engine: InMemoryWarehouse,
        stock: Location,
        component: Product,
        kit: Product,
        warehouse: Warehouse,
    }

    fn fixture() -> Fixture {
        let engine = InMemoryWarehouse::new();
        let stock = engine.add_location("WH/Stock", LocationUsage::Internal).unwrap();
        engine
            .add_location("Virtual/Production", LocationUsage::Production)
            .unwrap();
        let component = engine.add_product("Component A", UomId::new()).unwrap();
        let kit = engine.add_product("Kit", UomId::new()).unwrap();
        let warehouse = engine.add_warehouse("WH", CompanyId::new(), stock.id).unwrap();
        Fixture {
            engine,
            stock,
            component,
            kit,
            warehouse,
        }
    }

    fn bundle(f: &Fixture, component_qty: Decimal, finished_qty: Decimal) -> Bundle {
        let tenant_id = TenantId::new();
        let bundle_id = BundleId::new(AggregateId::new());
        let mut bundle = Bundle::empty(bundle_id);
        execute(
            &mut bundle,
            &BundleCommand::CreateBundle(CreateBundle {
                tenant_id,
                bundle_id,
                reference: "BDL/00001".to_string(),
                warehouse_id: f.warehouse.id,
                finished_product: f.kit.id,
                finished_uom: f.kit.uom_id,
                finished_quantity: finished_qty,
                lines: vec![NewBundleLine {
                    product_id: f.component.id,
                    uom_id: f.component.uom_id,
                    quantity: component_qty,
                }],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        bundle
    }

    #[test]
    fn worked_example_values_the_kit_at_four() {
        let f = fixture();
        f.engine
            .receive(f.stock.id, f.component.id, dec!(50), dec!(2.00))
            .unwrap();
        let b = bundle(&f, dec!(10), dec!(5));

        let outcome = BundleAssembler::new(&f.engine, TransitPolicy::First)
            .assemble(&b)
            .unwrap();

        assert_eq!(outcome.valuation.unit_cost(), dec!(4.00));
        let inbound = f.engine.movement(outcome.inbound_movement).unwrap();
        assert_eq!(inbound.lines[0].unit_cost, dec!(4.00));
        assert_eq!(inbound.valuation_override, Some(dec!(20.00)));
        assert_eq!(inbound.state, MovementState::Done);

        assert_eq!(f.engine.on_hand(f.stock.id, f.component.id).unwrap(), dec!(40));
        assert_eq!(f.engine.on_hand(f.stock.id, f.kit.id).unwrap(), dec!(5));
        assert_eq!(f.engine.average_cost(f.stock.id, f.kit.id).unwrap(), dec!(4.00));
    }

    #[test]
    fn movements_carry_bundle_metadata() {
        let f = fixture();
        f.engine
            .receive(f.stock.id, f.component.id, dec!(10), dec!(1))
            .unwrap();
        let b = bundle(&f, dec!(10), dec!(1));

        let outcome = BundleAssembler::new(&f.engine, TransitPolicy::First)
            .assemble(&b)
            .unwrap();
        let outbound = f.engine.movement(outcome.outbound_movement).unwrap();

        assert_eq!(outbound.origin, "BDL/00001");
        assert_eq!(outbound.move_type, MoveType::Direct);
        assert_eq!(outbound.company_id, f.warehouse.company_id);
        assert_eq!(outbound.picking_type_id, f.warehouse.outbound.id);
        assert_eq!(outbound.source, f.stock.id);
        assert_eq!(outbound.lines[0].name, "Component A");
        assert_eq!(outbound.lines[0].quantity_done, dec!(10));
    }

    #[test]
    fn missing_production_location_is_a_configuration_error() {
        let engine = InMemoryWarehouse::new();
        let stock = engine.add_location("WH/Stock", LocationUsage::Internal).unwrap();
        let component = engine.add_product("A", UomId::new()).unwrap();
        let kit = engine.add_product("Kit", UomId::new()).unwrap();
        let warehouse = engine.add_warehouse("WH", CompanyId::new(), stock.id).unwrap();
        let f = Fixture {
            engine,
            stock,
            component,
            kit,
            warehouse,
        };
        let b = bundle(&f, dec!(1), dec!(1));

        let err = BundleAssembler::new(&f.engine, TransitPolicy::First)
            .assemble(&b)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Configuration(msg) if msg == "no production location defined"));
        assert!(f.engine.movements().unwrap().is_empty());
    }

    #[test]
    fn unique_policy_rejects_two_production_locations() {
        let f = fixture();
        f.engine
            .add_location("Virtual/Production 2", LocationUsage::Production)
            .unwrap();

        assert!(BundleAssembler::new(&f.engine, TransitPolicy::First)
            .resolve_transit()
            .is_ok());
        let err = BundleAssembler::new(&f.engine, TransitPolicy::Unique)
            .resolve_transit()
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Configuration(_)));
    }

    #[test]
    fn short_stock_stops_before_force_complete() {
        let f = fixture();
        f.engine
            .receive(f.stock.id, f.component.id, dec!(3), dec!(2))
            .unwrap();
        let b = bundle(&f, dec!(10), dec!(5));

        let err = BundleAssembler::new(&f.engine, TransitPolicy::First)
            .assemble(&b)
            .unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::InsufficientStock { state: MovementState::PartiallyAvailable, .. }
        ));
        assert!(err.to_string().contains("insufficient product to bundle"));
        assert!(f
            .engine
            .movements()
            .unwrap()
            .iter()
            .all(|m| m.state != MovementState::Done));
    }

    #[test]
    fn zero_finished_quantity_is_caught_before_any_movement() {
        let f = fixture();
        f.engine
            .receive(f.stock.id, f.component.id, dec!(10), dec!(2))
            .unwrap();
        let mut b = bundle(&f, dec!(10), dec!(5));
        // Bypass command validation to reach the assembler with a bad quantity.
        b.apply(&BundleEvent::BundleCreated(BundleCreated {
            tenant_id: TenantId::new(),
            bundle_id: b.id_typed(),
            reference: "BDL/00002".to_string(),
            warehouse_id: f.warehouse.id,
            finished_product: f.kit.id,
            finished_uom: f.kit.uom_id,
            finished_quantity: Decimal::ZERO,
            lines: vec![BundleLine {
                line_no: 1,
                product_id: f.component.id,
                uom_id: f.component.uom_id,
                quantity: dec!(10),
            }],
            occurred_at: Utc::now(),
        }));

        let err = BundleAssembler::new(&f.engine, TransitPolicy::First)
            .assemble(&b)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Division(_)));
        assert!(f.engine.movements().unwrap().is_empty());
    }
}
