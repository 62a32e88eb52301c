//! Snapshot subscriptions and their notify-time re-reads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashSet;
use tessera_primitives::{DataId, RecordSource, RequestDescriptor, Snapshot, recycle_nodes_into};

use crate::reader::read;

pub(crate) type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

pub(crate) struct Subscription {
	snapshot: Snapshot,
	/// Snapshot taken when an optimistic overlay was applied.
	backup: Option<Snapshot>,
	/// Set when the snapshot may no longer match the store.
	stale: bool,
	callback: SnapshotCallback,
	alive: Arc<AtomicBool>,
}

/// A changed snapshot waiting to be delivered outside the store lock.
pub(crate) struct Delivery {
	callback: SnapshotCallback,
	alive: Arc<AtomicBool>,
	snapshot: Snapshot,
}

impl Delivery {
	/// Skips the callback if the subscription was disposed in the meantime.
	pub fn fire(self) {
		if self.alive.load(Ordering::Acquire) {
			(self.callback)(&self.snapshot);
		}
	}
}

#[derive(Default)]
pub(crate) struct SubscriptionSet {
	entries: BTreeMap<u64, Subscription>,
	next_id: u64,
}

impl SubscriptionSet {
	pub fn insert(&mut self, snapshot: Snapshot, callback: SnapshotCallback) -> (u64, Arc<AtomicBool>) {
		let id = self.next_id;
		self.next_id += 1;
		let alive = Arc::new(AtomicBool::new(true));
		self.entries.insert(
			id,
			Subscription {
				snapshot,
				backup: None,
				stale: false,
				callback,
				alive: alive.clone(),
			},
		);
		(id, alive)
	}

	/// Unregisters `id`. The entry is handed back so its callback can be
	/// dropped outside the store lock.
	pub fn remove(&mut self, id: u64) -> Option<Subscription> {
		let subscription = self.entries.remove(&id)?;
		subscription.alive.store(false, Ordering::Release);
		Some(subscription)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Saves each subscription's current view before an optimistic overlay
	/// goes on top of `source`.
	pub fn backup_all<S: RecordSource + ?Sized>(&mut self, source: &S) {
		for subscription in self.entries.values_mut() {
			if !subscription.stale {
				subscription.backup = Some(subscription.snapshot.clone());
				continue;
			}
			let mut backup = read(source, &subscription.snapshot.selector);
			backup.data = recycle_nodes_into(&subscription.snapshot.data, backup.data);
			subscription.backup = Some(backup);
		}
	}

	/// Reinstates the saved bookkeeping once the overlay is discarded. The
	/// data last delivered is kept, and any subscription whose backup differs
	/// from it is marked stale so the next notify re-reads and delivers.
	pub fn restore_all(&mut self) {
		for subscription in self.entries.values_mut() {
			match subscription.backup.take() {
				Some(backup) => {
					if !backup.data.same_node(&subscription.snapshot.data) {
						subscription.stale = true;
					}
					subscription.snapshot = Snapshot {
						data: subscription.snapshot.data.clone(),
						..backup
					};
				}
				None => subscription.stale = true,
			}
		}
	}

	/// Re-reads affected subscriptions and queues a delivery for each whose
	/// data changed. Returns the owners of changed subscriptions.
	pub fn update<S: RecordSource + ?Sized>(
		&mut self,
		source: &S,
		updated_ids: &FxHashSet<DataId>,
		full_reread: bool,
		deliveries: &mut Vec<Delivery>,
	) -> Vec<RequestDescriptor> {
		let mut owners = Vec::new();
		for subscription in self.entries.values_mut() {
			let overlapping = full_reread
				|| (!updated_ids.is_empty()
					&& subscription
						.snapshot
						.seen_records
						.iter()
						.any(|id| updated_ids.contains(id)));
			if !subscription.stale && !overlapping {
				continue;
			}
			let mut next = match &subscription.backup {
				Some(backup) if !overlapping => backup.clone(),
				_ => read(source, &subscription.snapshot.selector),
			};
			next.data = recycle_nodes_into(&subscription.snapshot.data, next.data);
			let changed = !next.data.same_node(&subscription.snapshot.data);
			subscription.snapshot = next;
			subscription.stale = false;
			if changed {
				owners.push(subscription.snapshot.selector.owner.clone());
				deliveries.push(Delivery {
					callback: subscription.callback.clone(),
					alive: subscription.alive.clone(),
					snapshot: subscription.snapshot.clone(),
				});
			}
		}
		owners
	}
}
