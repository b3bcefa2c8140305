//! Read model builders.
//!
//! Projections consume published envelopes and are:
//! - **Rebuildable** from the event stream
//! - **Tenant-isolated**
//! - **Idempotent** under at-least-once delivery

pub mod bundles;

pub use bundles::{BundleListProjection, BundleProjectionError, BundleReadModel};
