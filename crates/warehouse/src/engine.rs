//! Capabilities the bundle workflow needs from a warehouse engine.
//!
//! Each trait is a narrow seam so callers inject exactly what they use. All
//! calls are synchronous and may block on the engine's own locking; none of
//! them are retried by the caller.

use std::sync::Arc;

use rust_decimal::Decimal;

use stockbundle_core::{MovementId, ProductId, WarehouseId};

use crate::error::WarehouseError;
use crate::model::{Location, LocationUsage, Movement, MovementDraft, MovementState, Product, Warehouse};

/// Named sequences for display references.
///
/// Values are unique and increasing per code. Gaps are allowed: a number
/// handed out inside a failed unit of work is not given back.
pub trait SequenceAllocator: Send + Sync {
    fn next(&self, code: &str) -> Result<String, WarehouseError>;
}

pub trait LocationRegistry: Send + Sync {
    /// Locations with the given usage, in the engine's default order, at most
    /// `limit` of them.
    fn find_by_usage(
        &self,
        usage: LocationUsage,
        limit: usize,
    ) -> Result<Vec<Location>, WarehouseError>;
}

pub trait WarehouseDirectory: Send + Sync {
    fn warehouse(&self, id: WarehouseId) -> Result<Warehouse, WarehouseError>;
}

pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: ProductId) -> Result<Product, WarehouseError>;
}

/// Picking lifecycle: create → confirm → assign → force-complete.
pub trait MovementEngine: Send + Sync {
    fn create(&self, draft: MovementDraft) -> Result<MovementId, WarehouseError>;

    /// Commit the movement as demand.
    fn confirm(&self, id: MovementId) -> Result<MovementState, WarehouseError>;

    /// Reserve available stock; the returned state tells how much was found.
    fn assign(&self, id: MovementId) -> Result<MovementState, WarehouseError>;

    /// Mark done without further availability checks and run costing.
    ///
    /// With `valuation_override`, that amount becomes the total value of the
    /// movement instead of the automatically computed one.
    fn force_complete(
        &self,
        id: MovementId,
        valuation_override: Option<Decimal>,
    ) -> Result<Movement, WarehouseError>;

    fn movement(&self, id: MovementId) -> Result<Movement, WarehouseError>;
}

/// Unit-of-work boundary around engine writes.
///
/// Everything written between `begin` and `rollback` is undone; `commit`
/// keeps it. Sequence allocation is not covered.
pub trait TransactionBoundary: Send + Sync {
    type Savepoint: Send;

    fn begin(&self) -> Result<Self::Savepoint, WarehouseError>;

    fn commit(&self, savepoint: Self::Savepoint) -> Result<(), WarehouseError>;

    fn rollback(&self, savepoint: Self::Savepoint) -> Result<(), WarehouseError>;
}

/// Everything the bundle service needs, in one bound.
pub trait WarehouseEngine:
    SequenceAllocator
    + LocationRegistry
    + WarehouseDirectory
    + ProductCatalog
    + MovementEngine
    + TransactionBoundary
{
}

impl<T> WarehouseEngine for T where
    T: SequenceAllocator
        + LocationRegistry
        + WarehouseDirectory
        + ProductCatalog
        + MovementEngine
        + TransactionBoundary
{
}

impl<S> SequenceAllocator for Arc<S>
where
    S: SequenceAllocator + ?Sized,
{
    fn next(&self, code: &str) -> Result<String, WarehouseError> {
        (**self).next(code)
    }
}

impl<S> LocationRegistry for Arc<S>
where
    S: LocationRegistry + ?Sized,
{
    fn find_by_usage(
        &self,
        usage: LocationUsage,
        limit: usize,
    ) -> Result<Vec<Location>, WarehouseError> {
        (**self).find_by_usage(usage, limit)
    }
}

impl<S> WarehouseDirectory for Arc<S>
where
    S: WarehouseDirectory + ?Sized,
{
    fn warehouse(&self, id: WarehouseId) -> Result<Warehouse, WarehouseError> {
        (**self).warehouse(id)
    }
}

impl<S> ProductCatalog for Arc<S>
where
    S: ProductCatalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Result<Product, WarehouseError> {
        (**self).product(id)
    }
}

impl<S> MovementEngine for Arc<S>
where
    S: MovementEngine + ?Sized,
{
    fn create(&self, draft: MovementDraft) -> Result<MovementId, WarehouseError> {
        (**self).create(draft)
    }

    fn confirm(&self, id: MovementId) -> Result<MovementState, WarehouseError> {
        (**self).confirm(id)
    }

    fn assign(&self, id: MovementId) -> Result<MovementState, WarehouseError> {
        (**self).assign(id)
    }

    fn force_complete(
        &self,
        id: MovementId,
        valuation_override: Option<Decimal>,
    ) -> Result<Movement, WarehouseError> {
        (**self).force_complete(id, valuation_override)
    }

    fn movement(&self, id: MovementId) -> Result<Movement, WarehouseError> {
        (**self).movement(id)
    }
}

impl<S> TransactionBoundary for Arc<S>
where
    S: TransactionBoundary + ?Sized,
{
    type Savepoint = S::Savepoint;

    fn begin(&self) -> Result<Self::Savepoint, WarehouseError> {
        (**self).begin()
    }

    fn commit(&self, savepoint: Self::Savepoint) -> Result<(), WarehouseError> {
        (**self).commit(savepoint)
    }

    fn rollback(&self, savepoint: Self::Savepoint) -> Result<(), WarehouseError> {
        (**self).rollback(savepoint)
    }
}
