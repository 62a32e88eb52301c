//! Normalized record store.
//!
//! [`Store`] owns the canonical records, merges published batches, notifies
//! subscribers whose reads changed, tracks invalidation epochs and reclaims
//! unretained records with an incremental collector driven by a
//! [`tessera_worker::Scheduler`].

mod check;
/// Store tuning knobs.
pub mod config;
mod disposable;
mod error;
mod gc;
mod invalidation;
mod publish;
/// Selector projection.
pub mod reader;
mod retention;
mod store;
mod subscriptions;
mod walk;

pub use check::OperationAvailability;
pub use config::StoreConfig;
pub use disposable::Disposable;
pub use error::{Result, StoreError};
pub use invalidation::InvalidationState;
pub use reader::read;
pub use store::{Store, StoreId, StoreOptions};
