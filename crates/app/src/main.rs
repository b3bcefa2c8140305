//! Local demo: assembles one kit against the in-memory warehouse engine.

use std::sync::Arc;

use anyhow::Context;
use rust_decimal_macros::dec;

use stockbundle_core::{CompanyId, TenantId, UomId};
use stockbundle_events::{EventEnvelope, InMemoryEventBus};
use stockbundle_infra::event_store::InMemoryEventStore;
use stockbundle_infra::{BundleConfig, BundleService, CommandDispatcher, LineInput, NewBundle};
use stockbundle_warehouse::{InMemoryWarehouse, LocationUsage, MovementEngine};

fn main() -> anyhow::Result<()> {
    stockbundle_observability::init();

    let config = BundleConfig::from_env();
    tracing::info!(sequence = %config.sequence_code, policy = ?config.transit_policy, "starting");

    let engine = Arc::new(InMemoryWarehouse::new());
    let stock = engine.add_location("WH/Stock", LocationUsage::Internal)?;
    engine.add_location("Virtual/Production", LocationUsage::Production)?;
    let units = UomId::new();
    let bolt = engine.add_product("Bolt", units)?;
    let nut = engine.add_product("Nut", units)?;
    let kit = engine.add_product("Fastener Kit", units)?;
    let warehouse = engine.add_warehouse("Main", CompanyId::new(), stock.id)?;
    engine.receive(stock.id, bolt.id, dec!(100), dec!(0.40))?;
    engine.receive(stock.id, nut.id, dec!(100), dec!(0.10))?;

    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> = Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus);
    let service = BundleService::new(engine.clone(), dispatcher, config);

    let tenant_id = TenantId::new();
    let bundle_id = service
        .create_bundle(
            tenant_id,
            NewBundle {
                reference: None,
                warehouse_id: warehouse.id,
                finished_product: kit.id,
                finished_uom: None,
                finished_quantity: dec!(10),
                lines: vec![
                    LineInput {
                        product_id: bolt.id,
                        uom_id: None,
                        quantity: dec!(40),
                    },
                    LineInput {
                        product_id: nut.id,
                        uom_id: None,
                        quantity: dec!(40),
                    },
                ],
            },
        )
        .context("creating demo bundle")?;

    let bundle = service
        .complete(tenant_id, bundle_id)
        .context("completing demo bundle")?;
    let inbound = bundle
        .inbound_movement()
        .map(|id| engine.movement(id))
        .transpose()?;
    let kits_on_hand = engine.on_hand(stock.id, kit.id)?;

    tracing::info!(
        reference = bundle.reference(),
        state = ?bundle.state(),
        unit_cost = ?bundle.unit_valuation(),
        inbound_value = ?inbound.map(|m| m.value()),
        %kits_on_hand,
        "demo finished"
    );

    for entry in service.history(tenant_id, bundle_id)? {
        tracing::info!(seq = entry.sequence_number, event = %entry.event_type, "history");
    }

    Ok(())
}
