//! Store tuning knobs.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_RELEASE_BUFFER_SIZE: usize = 10;
const DEFAULT_SWEEP_CHUNK: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
	/// Released roots kept around for reuse before becoming collectable.
	pub gc_release_buffer_size: usize,
	/// Optional grace period after which a buffered root is dropped even if
	/// the buffer has room.
	pub release_buffer_ttl_ms: Option<u64>,
	/// Data older than this (by fetch time) checks as stale.
	pub query_cache_expiration_ms: Option<u64>,
	/// Slab slots visited per sweep step.
	pub gc_sweep_chunk: usize,
	/// Re-read every subscription on notify instead of only overlapping ones.
	pub full_reread_on_notify: bool,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			gc_release_buffer_size: DEFAULT_RELEASE_BUFFER_SIZE,
			release_buffer_ttl_ms: None,
			query_cache_expiration_ms: None,
			gc_sweep_chunk: DEFAULT_SWEEP_CHUNK,
			full_reread_on_notify: false,
		}
	}
}

impl StoreConfig {
	pub fn release_buffer_ttl(&self) -> Option<Duration> {
		self.release_buffer_ttl_ms.map(Duration::from_millis)
	}

	pub fn query_cache_expiration(&self) -> Option<Duration> {
		self.query_cache_expiration_ms.map(Duration::from_millis)
	}
}
