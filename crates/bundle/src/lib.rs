//! Bundle domain module (event-sourced).
//!
//! A bundle turns a set of component quantities into a quantity of one
//! finished product. This crate holds the record, its lines and lifecycle
//! rules, and the valuation arithmetic; the warehouse work lives in infra.

pub mod bundle;
pub mod valuation;

pub use bundle::{
    AddLine, BUNDLE_AGGREGATE_TYPE, Bundle, BundleCancelled, BundleCommand, BundleCompleted,
    BundleCreated, BundleDeleted, BundleEvent, BundleId, BundleLine, BundleResetToDraft,
    BundleState, CancelBundle, CompleteBundle, CreateBundle, DeleteBundle, FinishedProductSet,
    FinishedQuantitySet, FinishedUomSet, LineAdded, LineProductSet, LineQuantitySet, LineRemoved,
    LineUomSet, NewBundleLine, RemoveLine, ResetBundleToDraft, SetFinishedProduct,
    SetFinishedQuantity, SetFinishedUom, SetLineProduct, SetLineQuantity, SetLineUom,
};
pub use valuation::{Valuation, ValuationError};
