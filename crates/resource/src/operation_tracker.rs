//! Which in-flight operations affect which owners.
//!
//! Fragment reads with missing data ask the tracker whether some operation
//! still in flight may fill the gap, and suspend on it if so.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_primitives::{RequestDescriptor, RequestIdentifier};

use crate::pending::{PendingFetch, PendingResolver, pending_fetch};

pub trait OperationTracker: Send + Sync {
	/// Registers an operation that just went to the network. It counts as
	/// affecting its own owner until it completes.
	fn start(&self, operation: &RequestDescriptor);

	/// Records owners whose subscriptions a payload of `operation` touched.
	fn update(&self, operation: &RequestDescriptor, affected_owners: &[RequestDescriptor]);

	/// Forgets `operation`, resolving waiters whose owner has nothing else
	/// in flight.
	fn complete(&self, operation: &RequestDescriptor);

	/// Pending fetch settling once nothing in flight affects `owner`, or
	/// `None` when nothing does now.
	fn pending_for_owner(&self, owner: &RequestIdentifier) -> Option<PendingFetch>;
}

#[derive(Default)]
struct TrackerState {
	operations_by_owner: FxHashMap<RequestIdentifier, FxHashSet<RequestIdentifier>>,
	owners_by_operation: FxHashMap<RequestIdentifier, FxHashSet<RequestIdentifier>>,
	waiters: FxHashMap<RequestIdentifier, (PendingFetch, PendingResolver)>,
}

impl TrackerState {
	fn link(&mut self, operation: &RequestIdentifier, owner: &RequestIdentifier) {
		self.owners_by_operation
			.entry(operation.clone())
			.or_default()
			.insert(owner.clone());
		self.operations_by_owner
			.entry(owner.clone())
			.or_default()
			.insert(operation.clone());
	}
}

#[derive(Default)]
pub struct DefaultOperationTracker {
	state: Mutex<TrackerState>,
}

impl DefaultOperationTracker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_active(&self, operation: &RequestIdentifier) -> bool {
		self.state.lock().owners_by_operation.contains_key(operation)
	}
}

impl OperationTracker for DefaultOperationTracker {
	fn start(&self, operation: &RequestDescriptor) {
		let id = operation.identifier();
		self.state.lock().link(id, id);
	}

	fn update(&self, operation: &RequestDescriptor, affected_owners: &[RequestDescriptor]) {
		let mut state = self.state.lock();
		for owner in affected_owners {
			state.link(operation.identifier(), owner.identifier());
		}
	}

	fn complete(&self, operation: &RequestDescriptor) {
		let resolved: Vec<PendingResolver> = {
			let mut state = self.state.lock();
			let Some(owners) = state.owners_by_operation.remove(operation.identifier()) else {
				return;
			};
			let mut resolved = Vec::new();
			for owner in owners {
				let Some(operations) = state.operations_by_owner.get_mut(&owner) else {
					continue;
				};
				operations.remove(operation.identifier());
				if operations.is_empty() {
					state.operations_by_owner.remove(&owner);
					if let Some((_, resolver)) = state.waiters.remove(&owner) {
						resolved.push(resolver);
					}
				}
			}
			resolved
		};
		tracing::trace!(operation = %operation.identifier(), waiters = resolved.len(), "tracker.complete");
		drop(resolved);
	}

	fn pending_for_owner(&self, owner: &RequestIdentifier) -> Option<PendingFetch> {
		let mut state = self.state.lock();
		if !state.operations_by_owner.get(owner).is_some_and(|ops| !ops.is_empty()) {
			return None;
		}
		let (pending, _) = state
			.waiters
			.entry(owner.clone())
			.or_insert_with(|| pending_fetch(owner.as_str()));
		Some(pending.clone())
	}
}
