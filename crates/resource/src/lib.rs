//! Suspense-style result caches over the tessera store.
//!
//! [`QueryResource`] decides per fetch policy whether a query renders from
//! the store, fetches, or both, and shares one entry between every reader of
//! the same request. [`FragmentResource`] caches fragment reads, suspending on
//! in-flight operations when data is missing. Both hand back a [`Suspense`]
//! value: ready, pending on a [`PendingFetch`], or failed.

pub mod config;
mod environment;
mod error;
pub mod fetch;
#[cfg(test)]
mod fixtures;
mod fragment_resource;
mod operation_tracker;
mod pending;
mod policy;
mod query_resource;
mod registry;
mod suspense;

pub use config::{CacheConfig, FragmentResourceConfig, QueryResourceConfig};
pub use environment::{Environment, EnvironmentBuilder};
pub use error::{ConfigError, FetchError, ResourceError, Result};
pub use fetch::{
	ChannelFetch, FetchEvent, FetchObserver, FetchSink, FetchStream, NetworkSubscription, ResponsePayload, StaticFetch,
	fetch_channel,
};
pub use fragment_resource::{FragmentResource, FragmentResult, FragmentSnapshot, FragmentSpec, fragment_identifier};
pub use operation_tracker::{DefaultOperationTracker, OperationTracker};
pub use pending::{PendingFetch, PendingResolver, pending_fetch};
pub use policy::{FetchPolicy, RenderPolicy};
pub use query_resource::{
	CacheEntryState, PrepareOptions, QueryObserver, QueryResource, QueryResult, cache_key,
};
pub use registry::{ResourceRegistry, Resources};
pub use suspense::Suspense;
