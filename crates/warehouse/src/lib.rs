//! Warehouse engine boundary.
//!
//! Bundles never move stock themselves. Everything that touches locations,
//! pickings, reservations or costing goes through the traits in [`engine`];
//! [`in_memory::InMemoryWarehouse`] implements all of them for tests and local
//! runs.

pub mod engine;
pub mod error;
pub mod in_memory;
pub mod model;

pub use engine::{
    LocationRegistry, MovementEngine, ProductCatalog, SequenceAllocator, TransactionBoundary,
    WarehouseDirectory, WarehouseEngine,
};
pub use error::WarehouseError;
pub use in_memory::InMemoryWarehouse;
pub use model::{
    Location, LocationUsage, MoveType, Movement, MovementDraft, MovementLine, MovementLineDraft,
    MovementState, OperationType, Product, Warehouse,
};
