//! `stockbundle-core`: domain foundation building blocks.
//!
//! Pure domain primitives shared by the bundle aggregate and the warehouse
//! engine boundary. No IO, no storage.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, CompanyId, LocationId, MovementId, PickingTypeId, ProductId, TenantId, UomId,
    WarehouseId,
};
pub use value_object::ValueObject;
