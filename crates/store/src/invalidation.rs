//! Invalidation state lookups and subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::{FxHashMap, FxHashSet};
use tessera_primitives::{DataId, RecordSource};

/// Invalidation epochs of a set of records plus the store-wide epoch, as of
/// one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationState {
	data_ids: Vec<DataId>,
	invalidations: FxHashMap<DataId, Option<u64>>,
	global_epoch: Option<u64>,
}

impl InvalidationState {
	pub(crate) fn lookup<S: RecordSource + ?Sized>(source: &S, data_ids: Vec<DataId>, global_epoch: Option<u64>) -> Self {
		let invalidations = data_ids
			.iter()
			.map(|id| {
				let epoch = source.get(id).record().and_then(|record| record.invalidated_at());
				(id.clone(), epoch)
			})
			.collect();
		Self {
			data_ids,
			invalidations,
			global_epoch,
		}
	}

	pub fn data_ids(&self) -> &[DataId] {
		&self.data_ids
	}

	pub fn invalidated_at(&self, id: &str) -> Option<u64> {
		self.invalidations.get(id).copied().flatten()
	}

	/// True when `latest` (looked up for the same ids) reports a different
	/// epoch for any record, or the store was invalidated in between.
	pub(crate) fn changed_since(&self, latest: &InvalidationState) -> bool {
		latest.global_epoch != self.global_epoch
			|| self
				.data_ids
				.iter()
				.any(|id| latest.invalidations.get(id) != self.invalidations.get(id))
	}
}

pub(crate) type InvalidationCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct InvalidationSubscription {
	pub data_ids: Vec<DataId>,
	pub callback: InvalidationCallback,
	pub alive: Arc<AtomicBool>,
}

impl InvalidationSubscription {
	/// Whether this subscription fires for the pending invalidations.
	pub fn affected(&self, invalidated_store: bool, invalidated_ids: &FxHashSet<DataId>) -> bool {
		invalidated_store || self.data_ids.iter().any(|id| invalidated_ids.contains(id))
	}
}

/// A callback to run once the store lock is released.
pub(crate) struct DeferredInvalidation {
	pub callback: InvalidationCallback,
	pub alive: Arc<AtomicBool>,
}

impl DeferredInvalidation {
	pub fn fire(self) {
		if self.alive.load(Ordering::Acquire) {
			(self.callback)();
		}
	}
}
