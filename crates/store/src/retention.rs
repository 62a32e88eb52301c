//! Reference-counted roots and the release buffer.
//!
//! A root is retained while its count is positive. At zero it moves into a
//! bounded FIFO buffer so a quick re-retain finds its data still present;
//! overflow and the optional TTL push roots out of the buffer, after which the
//! collector may reclaim their records.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tessera_primitives::{NormalizationSelector, OperationDescriptor, OperationKind, RequestIdentifier};


#[derive(Debug)]
pub(crate) struct RootEntry {
	pub operation: OperationDescriptor,
	pub ref_count: usize,
	/// Write epoch of the last notify that carried this operation.
	pub epoch: Option<u64>,
	pub fetch_time: Option<Instant>,
}

/// Outcome of dropping one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
	StillRetained,
	Buffered,
	/// The root (or an older buffered one) was dropped; a collection is due.
	Evicted,
	Unknown,
}

#[derive(Debug)]
pub(crate) struct RetentionLedger {
	roots: FxHashMap<RequestIdentifier, RootEntry>,
	release_buffer: VecDeque<(RequestIdentifier, Instant)>,
	capacity: usize,
	ttl: Option<Duration>,
}

impl RetentionLedger {
	pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
		Self {
			roots: FxHashMap::default(),
			release_buffer: VecDeque::new(),
			capacity,
			ttl,
		}
	}

	pub fn get(&self, id: &RequestIdentifier) -> Option<&RootEntry> {
		self.roots.get(id)
	}

	pub fn contains(&self, id: &RequestIdentifier) -> bool {
		self.roots.contains_key(id)
	}

	pub fn buffered(&self) -> impl Iterator<Item = &RequestIdentifier> {
		self.release_buffer.iter().map(|(id, _)| id)
	}

	/// Adds a reference. Returns true when the root is new.
	pub fn retain(&mut self, operation: &OperationDescriptor) -> bool {
		let id = operation.identifier();
		match self.roots.get_mut(id) {
			Some(entry) => {
				if entry.ref_count == 0 {
					self.release_buffer.retain(|(buffered, _)| buffered != id);
				}
				entry.ref_count += 1;
				false
			}
			None => {
				self.roots.insert(
					id.clone(),
					RootEntry {
						operation: operation.clone(),
						ref_count: 1,
						epoch: None,
						fetch_time: None,
					},
				);
				true
			}
		}
	}

	/// Drops one reference. A root reaching zero is evicted outright when
	/// `is_stale` says so, and buffered otherwise.
	pub fn release(&mut self, id: &RequestIdentifier, now: Instant, is_stale: impl FnOnce(&RootEntry) -> bool) -> Release {
		let Some(entry) = self.roots.get_mut(id) else {
			return Release::Unknown;
		};
		entry.ref_count = entry.ref_count.saturating_sub(1);
		if entry.ref_count > 0 {
			return Release::StillRetained;
		}
		if is_stale(entry) {
			self.roots.remove(id);
			return Release::Evicted;
		}
		self.release_buffer.push_back((id.clone(), now));
		if self.release_buffer.len() > self.capacity {
			self.evict_oldest();
			return Release::Evicted;
		}
		Release::Buffered
	}

	/// Records a write for `operation`. Unretained queries get a temporary
	/// buffered root while the buffer has room.
	pub fn record_write(&mut self, operation: &OperationDescriptor, epoch: u64, now: Instant) {
		let id = operation.identifier();
		if let Some(entry) = self.roots.get_mut(id) {
			entry.epoch = Some(epoch);
			entry.fetch_time = Some(now);
			return;
		}
		if operation.request.node().kind == OperationKind::Query
			&& self.capacity > 0
			&& self.release_buffer.len() < self.capacity
		{
			self.roots.insert(
				id.clone(),
				RootEntry {
					operation: operation.clone(),
					ref_count: 0,
					epoch: Some(epoch),
					fetch_time: Some(now),
				},
			);
			self.release_buffer.push_back((id.clone(), now));
		}
	}

	/// Drops buffered roots older than the TTL. Returns true if any went.
	pub fn evict_expired(&mut self, now: Instant) -> bool {
		let Some(ttl) = self.ttl else {
			return false;
		};
		let mut evicted = false;
		while let Some(&(_, released_at)) = self.release_buffer.front()
			&& now.saturating_duration_since(released_at) >= ttl
		{
			self.evict_oldest();
			evicted = true;
		}
		evicted
	}

	fn evict_oldest(&mut self) {
		if let Some((id, _)) = self.release_buffer.pop_front() {
			self.roots.remove(&id);
			tracing::trace!(root = %id, "store.retention.evict");
		}
	}

	pub fn selectors(&self) -> Vec<NormalizationSelector> {
		self.roots.values().map(|entry| entry.operation.root.clone()).collect()
	}
}
