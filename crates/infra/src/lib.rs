//! Infrastructure layer: event storage, dispatch, read models, and the
//! bundle service that drives the warehouse engine.

pub mod assembly;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod service;
pub mod workers;


pub use assembly::{AssemblyError, AssemblyOutcome, BundleAssembler};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{BundleConfig, TransitPolicy};
pub use service::{BundleService, BundleServiceError, HistoryEntry, LineInput, NewBundle};
