//! Cache configuration, loadable from TOML.
//!
//! ```toml
//! [store]
//! gc_release_buffer_size = 10
//! query_cache_expiration_ms = 300000
//!
//! [query]
//! capacity = 1000
//! temporary_retain_timeout_ms = 300000
//!
//! [fragment]
//! capacity = 1000000
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use tessera_store::StoreConfig;

use crate::error::ConfigError;

const DEFAULT_QUERY_CAPACITY: usize = 1000;
const DEFAULT_TEMPORARY_RETAIN_TIMEOUT_MS: u64 = 5 * 60 * 1000;
const DEFAULT_FRAGMENT_CAPACITY: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryResourceConfig {
	pub capacity: usize,
	/// How long a render-phase retain holds a query before auto-release.
	pub temporary_retain_timeout_ms: u64,
}

impl Default for QueryResourceConfig {
	fn default() -> Self {
		Self {
			capacity: DEFAULT_QUERY_CAPACITY,
			temporary_retain_timeout_ms: DEFAULT_TEMPORARY_RETAIN_TIMEOUT_MS,
		}
	}
}

impl QueryResourceConfig {
	pub fn temporary_retain_timeout(&self) -> Duration {
		Duration::from_millis(self.temporary_retain_timeout_ms)
	}

	pub(crate) fn capacity(&self) -> NonZeroUsize {
		NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FragmentResourceConfig {
	pub capacity: usize,
}

impl Default for FragmentResourceConfig {
	fn default() -> Self {
		Self {
			capacity: DEFAULT_FRAGMENT_CAPACITY,
		}
	}
}

impl FragmentResourceConfig {
	pub(crate) fn capacity(&self) -> NonZeroUsize {
		NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
	}
}

/// Every tuning knob of a store and its result caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	pub store: StoreConfig,
	pub query: QueryResourceConfig,
	pub fragment: FragmentResourceConfig,
}

impl CacheConfig {
	/// Parses and validates a TOML document. Missing keys take defaults.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.query.capacity == 0 {
			return Err(ConfigError::Zero("query.capacity"));
		}
		if self.fragment.capacity == 0 {
			return Err(ConfigError::Zero("fragment.capacity"));
		}
		if self.store.gc_sweep_chunk == 0 {
			return Err(ConfigError::Zero("store.gc_sweep_chunk"));
		}
		Ok(())
	}
}
