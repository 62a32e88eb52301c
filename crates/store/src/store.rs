//! The store handle: owns the canonical records and coordinates
//! publish/notify cycles, retention and collection.
//!
//! Every public method takes the state lock briefly. Subscription callbacks,
//! scheduler jobs and disposals always run after it is released, so they may
//! call back into the store.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tessera_primitives::{
	DataId, MutableRecordSource, OperationDescriptor, OptimisticRecordSource, ROOT_ID, ROOT_TYPE, Record, RecordMap,
	RecordSource, RequestDescriptor, RequestIdentifier, SingularReaderSelector, Snapshot, Value,
};
use tessera_worker::{Clock, ImmediateScheduler, JobClass, Scheduler, SystemClock};

use crate::check::{OperationAvailability, availability};
use crate::config::StoreConfig;
use crate::disposable::Disposable;
use crate::error::{Result, StoreError};
use crate::gc::{GcRun, Step};
use crate::invalidation::{DeferredInvalidation, InvalidationState, InvalidationSubscription};
use crate::publish::{Touched, merge_batch};
use crate::reader::read;
use crate::retention::{Release, RetentionLedger, RootEntry};
use crate::subscriptions::{Delivery, SubscriptionSet};
use crate::walk::walk;


static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

/// Collaborators a store is built with.
#[derive(Clone)]
pub struct StoreOptions {
	pub config: StoreConfig,
	/// Runs collection steps.
	pub scheduler: Arc<dyn Scheduler>,
	/// Stamps fetch and release times.
	pub clock: Arc<dyn Clock>,
}

impl Default for StoreOptions {
	fn default() -> Self {
		Self {
			config: StoreConfig::default(),
			scheduler: Arc::new(ImmediateScheduler),
			clock: Arc::new(SystemClock),
		}
	}
}

enum ActiveSource {
	Canonical(RecordMap),
	Optimistic(OptimisticRecordSource),
}

impl ActiveSource {
	fn active(&self) -> &dyn RecordSource {
		match self {
			Self::Canonical(records) => records,
			Self::Optimistic(overlay) => overlay,
		}
	}

	fn active_mut(&mut self) -> &mut dyn MutableRecordSource {
		match self {
			Self::Canonical(records) => records,
			Self::Optimistic(overlay) => overlay,
		}
	}

	fn canonical(&self) -> &RecordMap {
		match self {
			Self::Canonical(records) => records,
			Self::Optimistic(overlay) => overlay.base(),
		}
	}

	/// The canonical map, unless an overlay is applied over it.
	fn canonical_mut(&mut self) -> Option<&mut RecordMap> {
		match self {
			Self::Canonical(records) => Some(records),
			Self::Optimistic(_) => None,
		}
	}

	fn is_optimistic(&self) -> bool {
		matches!(self, Self::Optimistic(_))
	}

	fn begin_optimistic(&mut self) -> Result<()> {
		match self {
			Self::Optimistic(_) => Err(StoreError::SnapshotActive),
			Self::Canonical(records) => {
				let base = mem::take(records);
				*self = Self::Optimistic(OptimisticRecordSource::new(base));
				Ok(())
			}
		}
	}

	/// Drops the overlay. Returns the ids it had shadowed.
	fn end_optimistic(&mut self) -> Result<Vec<DataId>> {
		match mem::replace(self, Self::Canonical(RecordMap::new())) {
			Self::Optimistic(overlay) => {
				let (base, ids) = overlay.into_parts();
				*self = Self::Canonical(base);
				Ok(ids)
			}
			canonical => {
				*self = canonical;
				Err(StoreError::NoSnapshot)
			}
		}
	}
}

#[derive(Default)]
struct GcState {
	run: Option<GcRun>,
	next_run_id: u64,
	holds: usize,
	/// A collection was requested while held, paused or optimistic.
	deferred: bool,
}

struct StoreState {
	source: ActiveSource,
	touched: Touched,
	write_epoch: u64,
	global_invalidation_epoch: Option<u64>,
	/// Bumped by anything that can change what a collection must keep.
	mutation_epoch: u64,
	subscriptions: SubscriptionSet,
	invalidation_subscriptions: BTreeMap<u64, InvalidationSubscription>,
	next_invalidation_id: u64,
	retention: RetentionLedger,
	gc: GcState,
}

impl StoreState {
	/// Starts a run unless one is active or collection is held. Returns the
	/// run to schedule.
	fn request_gc(&mut self) -> Option<u64> {
		if self.gc.holds > 0 || self.source.is_optimistic() {
			self.gc.deferred = true;
			return None;
		}
		if self.gc.run.is_some() {
			return None;
		}
		let id = self.gc.next_run_id;
		self.gc.next_run_id += 1;
		self.gc.run = Some(GcRun::new(id, self.mutation_epoch, self.retention.selectors()));
		Some(id)
	}

	fn abort_gc(&mut self) {
		if self.gc.run.take().is_some() {
			self.gc.deferred = true;
			tracing::trace!("store.gc.abort");
		}
	}
}

struct StoreInner {
	id: StoreId,
	config: StoreConfig,
	scheduler: Arc<dyn Scheduler>,
	clock: Arc<dyn Clock>,
	state: Mutex<StoreState>,
}

impl StoreInner {
	fn schedule_step(self: &Arc<Self>, run_id: u64) {
		let weak = Arc::downgrade(self);
		self.scheduler.schedule(
			JobClass::Collection,
			Box::new(move || {
				if let Some(inner) = weak.upgrade() {
					inner.gc_step(run_id);
				}
			}),
		);
	}

	fn gc_step(self: &Arc<Self>, run_id: u64) {
		let again = {
			let mut guard = self.state.lock();
			let state = &mut *guard;
			let Some(mut run) = state.gc.run.take() else {
				return;
			};
			if run.id != run_id {
				state.gc.run = Some(run);
				return;
			}
			if run.epoch != state.mutation_epoch {
				tracing::trace!(run = run.id, "store.gc.restart");
				run = GcRun::new(run.id, state.mutation_epoch, state.retention.selectors());
			}
			let Some(records) = state.source.canonical_mut() else {
				state.gc.deferred = true;
				return;
			};
			match run.step(records, self.config.gc_sweep_chunk) {
				Step::Pending => {
					state.gc.run = Some(run);
					true
				}
				Step::Finished { removed } => {
					tracing::debug!(run = run.id, removed, remaining = records.len(), "store.gc");
					false
				}
			}
		};
		if again {
			self.schedule_step(run_id);
		}
	}

	fn release_root(self: &Arc<Self>, id: &RequestIdentifier) {
		let run = {
			let mut guard = self.state.lock();
			let state = &mut *guard;
			let now = self.clock.now();
			let expiration = self.config.query_cache_expiration();
			let source = state.source.active();
			let global = state.global_invalidation_epoch;
			let outcome = state.retention.release(id, now, |root| {
				root_availability(source, global, &root.operation, Some(root), expiration, now)
					== OperationAvailability::Stale
			});
			let expired = state.retention.evict_expired(now);
			tracing::trace!(root = %id, outcome = ?outcome, "store.release");
			if outcome == Release::Evicted || expired {
				state.request_gc()
			} else {
				None
			}
		};
		if let Some(run) = run {
			self.schedule_step(run);
		}
	}

	fn release_hold(self: &Arc<Self>) {
		let run = {
			let mut state = self.state.lock();
			if state.gc.holds == 0 {
				return;
			}
			state.gc.holds -= 1;
			if state.gc.holds == 0 && state.gc.deferred {
				state.gc.deferred = false;
				state.request_gc()
			} else {
				None
			}
		};
		if let Some(run) = run {
			self.schedule_step(run);
		}
	}
}

/// Shared handle to one normalized record store.
#[derive(Clone)]
pub struct Store {
	inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("Store")
			.field("id", &self.inner.id)
			.field("records", &state.source.canonical().len())
			.field("epoch", &state.write_epoch)
			.field("optimistic", &state.source.is_optimistic())
			.finish()
	}
}

impl Store {
	pub fn new(source: RecordMap) -> Self {
		Self::with_options(source, StoreOptions::default())
	}

	/// Builds a store over `source`, creating the root record if absent.
	pub fn with_options(mut source: RecordMap, options: StoreOptions) -> Self {
		if !source.has(ROOT_ID) {
			source.set(Arc::new(Record::new(ROOT_ID, ROOT_TYPE)));
		}
		let StoreOptions {
			config,
			scheduler,
			clock,
		} = options;
		let state = StoreState {
			source: ActiveSource::Canonical(source),
			touched: Touched::default(),
			write_epoch: 0,
			global_invalidation_epoch: None,
			mutation_epoch: 0,
			subscriptions: SubscriptionSet::default(),
			invalidation_subscriptions: BTreeMap::new(),
			next_invalidation_id: 0,
			retention: RetentionLedger::new(config.gc_release_buffer_size, config.release_buffer_ttl()),
			gc: GcState::default(),
		};
		Self {
			inner: Arc::new(StoreInner {
				id: StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)),
				config,
				scheduler,
				clock,
				state: Mutex::new(state),
			}),
		}
	}

	pub fn id(&self) -> StoreId {
		self.inner.id
	}

	pub fn config(&self) -> &StoreConfig {
		&self.inner.config
	}

	/// Current write epoch; bumped by every notify.
	pub fn epoch(&self) -> u64 {
		self.inner.state.lock().write_epoch
	}

	/// Reads `selector` from the active source (the overlay, if applied).
	pub fn lookup(&self, selector: &SingularReaderSelector) -> Snapshot {
		let state = self.inner.state.lock();
		read(state.source.active(), selector)
	}

	/// Calls `callback` with a fresh snapshot whenever a notify changes the
	/// data `snapshot` read.
	pub fn subscribe(&self, snapshot: Snapshot, callback: impl Fn(&Snapshot) + Send + Sync + 'static) -> Disposable {
		let (id, _) = self.inner.state.lock().subscriptions.insert(snapshot, Arc::new(callback));
		let weak = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			let Some(inner) = weak.upgrade() else {
				return;
			};
			let removed = inner.state.lock().subscriptions.remove(id);
			drop(removed);
		})
	}

	/// Merges `batch` into the active source without running callbacks.
	///
	/// Ids in `invalidated_ids` are stamped with the next write epoch.
	pub fn publish(&self, batch: RecordMap, invalidated_ids: impl IntoIterator<Item = DataId>) {
		let mut guard = self.inner.state.lock();
		let state = &mut *guard;
		let records = batch.len();
		let epoch = state.write_epoch + 1;
		merge_batch(state.source.active_mut(), batch, invalidated_ids, epoch, &mut state.touched);
		state.mutation_epoch += 1;
		tracing::debug!(
			records,
			updated = state.touched.updated.len(),
			invalidated = state.touched.invalidated.len(),
			optimistic = state.source.is_optimistic(),
			"store.publish"
		);
	}

	/// Delivers everything published since the last notify.
	///
	/// Returns the owners of subscriptions whose data changed.
	/// `source_operation` is the operation whose response was just written;
	/// its root records the write epoch and fetch time.
	pub fn notify(&self, source_operation: Option<&OperationDescriptor>, invalidate_store: bool) -> Vec<RequestDescriptor> {
		let (owners, deliveries, invalidations) = {
			let mut guard = self.inner.state.lock();
			let state = &mut *guard;
			state.write_epoch += 1;
			if invalidate_store {
				state.global_invalidation_epoch = Some(state.write_epoch);
			}

			let mut deliveries: Vec<Delivery> = Vec::new();
			let owners = state.subscriptions.update(
				state.source.active(),
				&state.touched.updated,
				self.inner.config.full_reread_on_notify,
				&mut deliveries,
			);
			let invalidations: Vec<DeferredInvalidation> = state
				.invalidation_subscriptions
				.values()
				.filter(|subscription| subscription.affected(invalidate_store, &state.touched.invalidated))
				.map(|subscription| DeferredInvalidation {
					callback: subscription.callback.clone(),
					alive: subscription.alive.clone(),
				})
				.collect();

			if let Some(operation) = source_operation {
				state
					.retention
					.record_write(operation, state.write_epoch, self.inner.clock.now());
			}
			tracing::debug!(
				epoch = state.write_epoch,
				updated = state.touched.updated.len(),
				changed = deliveries.len(),
				invalidation_callbacks = invalidations.len(),
				invalidate_store,
				"store.notify"
			);
			state.touched = Touched::default();
			state.mutation_epoch += 1;
			(owners, deliveries, invalidations)
		};
		for delivery in deliveries {
			delivery.fire();
		}
		for invalidation in invalidations {
			invalidation.fire();
		}
		owners
	}

	/// Reports whether `operation` can be served from the store.
	pub fn check(&self, operation: &OperationDescriptor) -> OperationAvailability {
		let state = self.inner.state.lock();
		root_availability(
			state.source.active(),
			state.global_invalidation_epoch,
			operation,
			state.retention.get(operation.identifier()),
			self.inner.config.query_cache_expiration(),
			self.inner.clock.now(),
		)
	}

	/// Keeps `operation`'s data from being collected until the handle is
	/// disposed.
	pub fn retain(&self, operation: &OperationDescriptor) -> Disposable {
		{
			let mut state = self.inner.state.lock();
			if state.retention.retain(operation) {
				state.mutation_epoch += 1;
			}
		}
		tracing::trace!(root = %operation.identifier(), "store.retain");
		let id = operation.identifier().clone();
		let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.release_root(&id);
			}
		})
	}

	/// True while `operation` has a root, retained or buffered.
	pub fn is_retained(&self, operation: &OperationDescriptor) -> bool {
		self.inner.state.lock().retention.contains(operation.identifier())
	}

	/// Identifiers of released roots still in the release buffer, oldest
	/// first.
	pub fn buffered_roots(&self) -> Vec<RequestIdentifier> {
		self.inner.state.lock().retention.buffered().cloned().collect()
	}

	pub fn lookup_invalidation_state(&self, data_ids: Vec<DataId>) -> InvalidationState {
		let state = self.inner.state.lock();
		InvalidationState::lookup(state.source.active(), data_ids, state.global_invalidation_epoch)
	}

	/// True when any of `prev`'s records or the store itself was invalidated
	/// since `prev` was looked up.
	pub fn check_invalidation_state(&self, prev: &InvalidationState) -> bool {
		let latest = self.lookup_invalidation_state(prev.data_ids().to_vec());
		prev.changed_since(&latest)
	}

	/// Calls `callback` on every notify that invalidates one of `state`'s
	/// records or the whole store.
	pub fn subscribe_to_invalidation_state(
		&self,
		state: &InvalidationState,
		callback: impl Fn() + Send + Sync + 'static,
	) -> Disposable {
		let alive = Arc::new(AtomicBool::new(true));
		let id = {
			let mut guard = self.inner.state.lock();
			let id = guard.next_invalidation_id;
			guard.next_invalidation_id += 1;
			guard.invalidation_subscriptions.insert(
				id,
				InvalidationSubscription {
					data_ids: state.data_ids().to_vec(),
					callback: Arc::new(callback),
					alive: alive.clone(),
				},
			);
			id
		};
		let weak = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			alive.store(false, Ordering::Release);
			if let Some(inner) = weak.upgrade() {
				let removed = inner.state.lock().invalidation_subscriptions.remove(&id);
				drop(removed);
			}
		})
	}

	/// Requests an incremental collection.
	pub fn schedule_gc(&self) {
		let run = {
			let mut state = self.inner.state.lock();
			state.retention.evict_expired(self.inner.clock.now());
			state.request_gc()
		};
		if let Some(run) = run {
			self.inner.schedule_step(run);
		}
	}

	/// Runs a full collection synchronously. Returns the number of records
	/// removed; nothing is collected while an optimistic snapshot is active.
	pub fn gc_now(&self) -> usize {
		let mut guard = self.inner.state.lock();
		let state = &mut *guard;
		let now = self.inner.clock.now();
		state.retention.evict_expired(now);
		let run_id = state.gc.next_run_id;
		state.gc.next_run_id += 1;
		let run = GcRun::new(run_id, state.mutation_epoch, state.retention.selectors());
		let Some(records) = state.source.canonical_mut() else {
			return 0;
		};
		state.gc.run = None;
		let removed = run.run_to_completion(records, self.inner.config.gc_sweep_chunk);
		tracing::debug!(run = run_id, removed, "store.gc");
		removed
	}

	/// Suspends collection until the returned handle is disposed; a run
	/// requested meanwhile starts then.
	pub fn hold_gc(&self) -> Disposable {
		{
			let mut state = self.inner.state.lock();
			state.abort_gc();
			state.gc.holds += 1;
		}
		let weak = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.release_hold();
			}
		})
	}

	/// Applies an optimistic overlay: later publishes land in it and leave
	/// the canonical records untouched until [`Self::restore`].
	pub fn snapshot(&self) -> Result<()> {
		let mut guard = self.inner.state.lock();
		let state = &mut *guard;
		if state.source.is_optimistic() {
			return Err(StoreError::SnapshotActive);
		}
		state.subscriptions.backup_all(state.source.active());
		state.abort_gc();
		state.source.begin_optimistic()?;
		tracing::debug!(subscriptions = state.subscriptions.len(), "store.snapshot");
		Ok(())
	}

	/// Discards the optimistic overlay. Subscriptions that saw optimistic
	/// data are re-read on the next notify.
	pub fn restore(&self) -> Result<()> {
		let run = {
			let mut guard = self.inner.state.lock();
			let state = &mut *guard;
			let shadowed = state.source.end_optimistic()?;
			state.mutation_epoch += 1;
			state.subscriptions.restore_all();
			tracing::debug!(shadowed = shadowed.len(), "store.restore");
			if state.gc.deferred && state.gc.holds == 0 {
				state.gc.deferred = false;
				state.request_gc()
			} else {
				None
			}
		};
		if let Some(run) = run {
			self.inner.schedule_step(run);
		}
		Ok(())
	}

	pub fn is_optimistic(&self) -> bool {
		self.inner.state.lock().source.is_optimistic()
	}

	/// Runs `f` against the active source under the store lock. `f` must not
	/// call back into the store.
	pub fn with_source<R>(&self, f: impl FnOnce(&dyn RecordSource) -> R) -> R {
		let state = self.inner.state.lock();
		f(state.source.active())
	}

	pub fn subscription_count(&self) -> usize {
		self.inner.state.lock().subscriptions.len()
	}

	/// JSON form of the canonical records, excluding optimistic edits.
	pub fn to_json(&self) -> Value {
		self.inner.state.lock().source.canonical().to_json()
	}
}

/// Availability of `operation` against `source`, given its root entry if it
/// has one.
fn root_availability(
	source: &dyn RecordSource,
	global_invalidation_epoch: Option<u64>,
	operation: &OperationDescriptor,
	root: Option<&RootEntry>,
	expiration: Option<Duration>,
	now: Instant,
) -> OperationAvailability {
	let last_written_at = root.and_then(|entry| entry.epoch);
	if let Some(global) = global_invalidation_epoch
		&& last_written_at.is_none_or(|written| written <= global)
	{
		return OperationAvailability::Stale;
	}
	let reachable = walk(source, &operation.root);
	availability(
		reachable.missing,
		reachable.most_recent_invalidation,
		last_written_at,
		root.and_then(|entry| entry.fetch_time),
		expiration,
		now,
	)
}
