use thiserror::Error;

use stockbundle_core::{LocationId, MovementId, ProductId, WarehouseId};

use crate::model::MovementState;

/// Failure reported by the warehouse engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("unknown location {0}")]
    UnknownLocation(LocationId),

    #[error("unknown product {0}")]
    UnknownProduct(ProductId),

    #[error("unknown warehouse {0}")]
    UnknownWarehouse(WarehouseId),

    #[error("unknown movement {0}")]
    UnknownMovement(MovementId),

    #[error("cannot {operation} movement {movement} in state {state:?}")]
    InvalidState {
        movement: MovementId,
        state: MovementState,
        operation: &'static str,
    },

    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    #[error("no savepoint is open")]
    NoSavepoint,

    #[error("warehouse state lock poisoned")]
    Poisoned,
}
