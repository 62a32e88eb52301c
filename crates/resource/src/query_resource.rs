//! Cache of query results shared by every reader of the same request.
//!
//! An entry is keyed by request identifier, fetch policy, render policy and
//! an optional cache buster. It holds either a ready [`QueryResult`], a
//! [`PendingFetch`](crate::pending::PendingFetch) to suspend on, or the fetch
//! error.
//!
//! Entries are reference counted. Preparing a query takes a *temporary*
//! retain that expires after `temporary_retain_timeout`; readers that commit
//! to the result take a *permanent* retain with [`QueryResource::retain`],
//! which replaces the temporary one. The store root stays retained while any
//! retain is held, and releasing the last one drops the entry and cancels a
//! fetch still in flight.

use std::fmt;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tessera_primitives::{Data, DataObject, FragmentRefs, OperationDescriptor, ReaderFragment};
use tessera_store::{Disposable, OperationAvailability};
use tessera_worker::TimerHandle;

use crate::config::QueryResourceConfig;
use crate::environment::Environment;
use crate::error::ResourceError;
use crate::fetch::{FetchEvent, FetchObserver, FetchStream, NetworkSubscription};
use crate::pending::{PendingResolver, pending_fetch};
use crate::policy::{FetchPolicy, RenderPolicy};
use crate::suspense::Suspense;


/// What a query read hands to its renderer: a reference to the query's root
/// fragment, to be read through the fragment resource.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
	pub cache_key: Arc<str>,
	pub fragment_node: Arc<ReaderFragment>,
	pub fragment_ref: Data,
	pub operation: OperationDescriptor,
}

impl QueryResult {
	fn new(cache_key: Arc<str>, operation: &OperationDescriptor) -> Self {
		let fragment = operation.request.node().fragment.clone();
		let refs = FragmentRefs {
			id: operation.fragment.data_id.clone(),
			fragments: [(fragment.name.clone(), operation.request.variables().clone())]
				.into_iter()
				.collect(),
			owner: operation.request.clone(),
		};
		Self {
			cache_key,
			fragment_node: fragment,
			fragment_ref: Data::from(DataObject {
				fields: Default::default(),
				fragments: Some(refs),
			}),
			operation: operation.clone(),
		}
	}
}

/// Observes the fetch events of a prepared query, after the cache has
/// processed them.
pub type QueryObserver = Box<dyn FnMut(&FetchEvent) + Send>;

#[derive(Default)]
pub struct PrepareOptions {
	pub fetch_policy: FetchPolicy,
	/// Defaults to the environment's render policy.
	pub render_policy: Option<RenderPolicy>,
	/// Forces a distinct entry for an otherwise identical read.
	pub cache_buster: Option<String>,
	pub observer: Option<QueryObserver>,
}

impl PrepareOptions {
	pub fn policy(fetch_policy: FetchPolicy) -> Self {
		Self {
			fetch_policy,
			..Self::default()
		}
	}
}

impl fmt::Debug for PrepareOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PrepareOptions")
			.field("fetch_policy", &self.fetch_policy)
			.field("render_policy", &self.render_policy)
			.field("cache_buster", &self.cache_buster)
			.field("observer", &self.observer.is_some())
			.finish()
	}
}

/// `{fetch_policy}-{render_policy}-{request identifier}[-{cache_buster}]`
pub fn cache_key(
	operation: &OperationDescriptor,
	fetch_policy: FetchPolicy,
	render_policy: RenderPolicy,
	cache_buster: Option<&str>,
) -> Arc<str> {
	let key = format!("{fetch_policy}-{render_policy}-{}", operation.identifier());
	match cache_buster {
		Some(buster) => format!("{key}-{buster}").into(),
		None => key.into(),
	}
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntryState {
	pub id: u64,
	pub key: Arc<str>,
	pub value: Suspense<QueryResult>,
	pub availability: OperationAvailability,
	pub retain_count: usize,
	pub processed_payloads: usize,
	pub has_temporary_retain: bool,
	/// Set while the fetch that fills the entry is still running.
	pub in_flight: bool,
}

struct TemporaryRetain {
	token: u64,
	handle: TimerHandle,
}

struct CacheEntry {
	id: u64,
	operation: OperationDescriptor,
	availability: OperationAvailability,
	value: Suspense<QueryResult>,
	resolver: Option<PendingResolver>,
	processed_payloads: usize,
	network: Option<NetworkSubscription>,
	retain_count: usize,
	store_retain: Option<Disposable>,
	temporary: Option<TemporaryRetain>,
}

impl CacheEntry {
	fn retain(&mut self, environment: &Environment) {
		self.retain_count += 1;
		if self.retain_count == 1 {
			self.store_retain = Some(environment.retain(&self.operation));
		}
	}

	/// Returns true when this released the last retain.
	fn release(&mut self, released: &mut Released) -> bool {
		if self.retain_count == 0 {
			return false;
		}
		self.retain_count -= 1;
		if self.retain_count > 0 {
			return false;
		}
		released.disposables.extend(self.store_retain.take());
		if let Some(network) = self.network.take() {
			network.cancel();
		}
		true
	}

	fn release_temporary(&mut self, released: &mut Released) -> bool {
		match self.temporary.take() {
			Some(temporary) => {
				temporary.handle.cancel();
				self.release(released)
			}
			None => false,
		}
	}

	/// A live query replacing its subscription cancels the previous one.
	fn set_network(&mut self, subscription: Option<NetworkSubscription>) {
		let previous = std::mem::replace(&mut self.network, subscription);
		if self.operation.request.node().live
			&& let Some(previous) = previous
		{
			previous.cancel();
		}
	}

	fn state(&self, key: &Arc<str>) -> CacheEntryState {
		CacheEntryState {
			id: self.id,
			key: key.clone(),
			value: self.value.clone(),
			availability: self.availability,
			retain_count: self.retain_count,
			processed_payloads: self.processed_payloads,
			has_temporary_retain: self.temporary.is_some(),
			in_flight: self.network.is_some() || self.resolver.is_some(),
		}
	}
}

/// Values dropped only after the cache lock is released: store retains,
/// evicted entries and resolvers of settled fetches.
#[derive(Default)]
struct Released {
	disposables: Vec<Disposable>,
	entries: Vec<CacheEntry>,
	resolvers: Vec<PendingResolver>,
}

impl Released {
	fn entry(&mut self, mut entry: CacheEntry) {
		if let Some(temporary) = entry.temporary.take() {
			temporary.handle.cancel();
		}
		self.entries.push(entry);
	}
}

struct QueryState {
	cache: LruCache<Arc<str>, CacheEntry>,
	next_entry_id: u64,
	next_token: u64,
}

impl QueryState {
	fn insert(&mut self, key: &Arc<str>, make: impl FnOnce(u64) -> CacheEntry, released: &mut Released) {
		self.next_entry_id += 1;
		let entry = make(self.next_entry_id);
		if let Some((evicted_key, evicted)) = self.cache.push(key.clone(), entry) {
			tracing::debug!(key = &*evicted_key, id = evicted.id, "queryresource.evict");
			released.entry(evicted);
		}
	}

	fn get_or_insert(
		&mut self,
		key: &Arc<str>,
		make: impl FnOnce(u64) -> CacheEntry,
		released: &mut Released,
	) -> Option<&mut CacheEntry> {
		if !self.cache.contains(&**key) {
			self.insert(key, make, released);
		}
		self.cache.get_mut(&**key)
	}

	/// Runs `release` on the entry under `key`, dropping the entry when it
	/// reports that its last retain went away.
	fn release_with(
		&mut self,
		key: &str,
		released: &mut Released,
		release: impl FnOnce(&mut CacheEntry, &mut Released) -> bool,
	) {
		let emptied = match self.cache.peek_mut(key) {
			Some(entry) => release(entry, released),
			None => false,
		};
		if emptied && let Some(entry) = self.cache.pop(key) {
			tracing::debug!(key, id = entry.id, "queryresource.release");
			released.entry(entry);
		}
	}
}

fn new_entry(
	id: u64,
	operation: &OperationDescriptor,
	availability: OperationAvailability,
	value: Suspense<QueryResult>,
	resolver: Option<PendingResolver>,
) -> CacheEntry {
	CacheEntry {
		id,
		operation: operation.clone(),
		availability,
		value,
		resolver,
		processed_payloads: 0,
		network: None,
		retain_count: 0,
		store_retain: None,
		temporary: None,
	}
}

struct QueryInner {
	environment: Environment,
	config: QueryResourceConfig,
	state: Mutex<QueryState>,
}

/// Query result cache for one [`Environment`]. Clones share the cache.
#[derive(Clone)]
pub struct QueryResource {
	inner: Arc<QueryInner>,
}

impl fmt::Debug for QueryResource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("QueryResource")
			.field("entries", &self.len())
			.field("config", &self.inner.config)
			.finish()
	}
}

impl QueryResource {
	pub fn new(environment: Environment, config: QueryResourceConfig) -> Self {
		let cache = LruCache::new(config.capacity());
		Self {
			inner: Arc::new(QueryInner {
				environment,
				config,
				state: Mutex::new(QueryState {
					cache,
					next_entry_id: 0,
					next_token: 0,
				}),
			}),
		}
	}

	pub fn environment(&self) -> &Environment {
		&self.inner.environment
	}

	pub fn len(&self) -> usize {
		self.inner.state.lock().cache.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Reads `operation`, fetching it through `network` when the fetch
	/// policy and the store's availability call for it.
	///
	/// `network` is executed through the environment, so its payloads are
	/// committed to the store before the entry resolves. It is dropped
	/// unsubscribed when the entry already exists or no fetch is needed.
	pub fn prepare(
		&self,
		operation: &OperationDescriptor,
		network: Box<dyn FetchStream>,
		options: PrepareOptions,
	) -> Suspense<QueryResult> {
		let render_policy = options
			.render_policy
			.unwrap_or_else(|| self.inner.environment.default_render_policy());
		let key = cache_key(operation, options.fetch_policy, render_policy, options.cache_buster.as_deref());
		self.prepare_with_identifier(key, operation, network, options)
	}

	/// [`Self::prepare`] with a precomputed cache key.
	pub fn prepare_with_identifier(
		&self,
		key: Arc<str>,
		operation: &OperationDescriptor,
		network: Box<dyn FetchStream>,
		options: PrepareOptions,
	) -> Suspense<QueryResult> {
		self.inner.prepare(key, operation, network, options)
	}

	/// Retains the entry behind `result` until the returned handle is
	/// disposed, replacing any temporary retain. Re-creates the entry if it
	/// was already dropped.
	pub fn retain(&self, result: &QueryResult) -> Disposable {
		let inner = &self.inner;
		let mut released = Released::default();
		let availability = inner.environment.check(&result.operation);
		let id = {
			let mut state = inner.state.lock();
			let entry = state.get_or_insert(
				&result.cache_key,
				|id| new_entry(id, &result.operation, availability, Suspense::Ready(result.clone()), None),
				&mut released,
			);
			let Some(entry) = entry else {
				return Disposable::noop();
			};
			entry.retain(&inner.environment);
			entry.release_temporary(&mut released);
			entry.id
		};
		drop(released);
		tracing::debug!(key = &*result.cache_key, id, "queryresource.retain");

		let weak = Arc::downgrade(inner);
		let key = result.cache_key.clone();
		Disposable::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.release_permanent(&key, id);
			}
		})
	}

	/// Drops the temporary retain taken while preparing `result`, if still
	/// held.
	pub fn release_temporary_retain(&self, result: &QueryResult) {
		let mut released = Released::default();
		self.inner
			.state
			.lock()
			.release_with(&result.cache_key, &mut released, CacheEntry::release_temporary);
		drop(released);
	}

	pub fn get_cache_entry(
		&self,
		operation: &OperationDescriptor,
		fetch_policy: FetchPolicy,
		render_policy: Option<RenderPolicy>,
	) -> Option<CacheEntryState> {
		let render_policy = render_policy.unwrap_or_else(|| self.inner.environment.default_render_policy());
		let key = cache_key(operation, fetch_policy, render_policy, None);
		self.get_cache_entry_with_identifier(&key)
	}

	pub fn get_cache_entry_with_identifier(&self, key: &Arc<str>) -> Option<CacheEntryState> {
		self.inner
			.state
			.lock()
			.cache
			.peek(&**key)
			.map(|entry| entry.state(key))
	}
}

impl QueryInner {
	fn prepare(
		self: &Arc<Self>,
		key: Arc<str>,
		operation: &OperationDescriptor,
		network: Box<dyn FetchStream>,
		options: PrepareOptions,
	) -> Suspense<QueryResult> {
		let PrepareOptions {
			fetch_policy,
			render_policy,
			observer,
			..
		} = options;
		let render_policy = render_policy.unwrap_or_else(|| self.environment.default_render_policy());
		let mut released = Released::default();

		let (cached, fetch) = {
			let mut state = self.state.lock();
			if state.cache.contains(&*key) {
				(true, None)
			} else {
				(false, self.fetch_and_save(&mut state, &key, operation, fetch_policy, render_policy, &mut released))
			}
		};
		drop(released);

		match fetch {
			Some(availability) => {
				let observer = self.observer(key.clone(), operation.clone(), availability, observer);
				self.environment.execute(operation, network).subscribe(observer);
			}
			None if !cached => {
				if let Some(mut observer) = observer {
					observer(&FetchEvent::Complete);
				}
			}
			None => {}
		}

		let mut released = Released::default();
		let value = {
			let mut state = self.state.lock();
			state.next_token += 1;
			let token = state.next_token;
			let Some(entry) = state.cache.get_mut(&*key) else {
				return Suspense::Failed(ResourceError::MissingCacheEntry { key: key.to_string() });
			};
			if !self.environment.is_server() {
				self.temporary_retain(entry, &key, token, &mut released);
			}
			entry.value.clone()
		};
		drop(released);

		if let Suspense::Pending(pending) = &value {
			tracing::debug!(
				key = &*key,
				cached,
				fetch_policy = fetch_policy.as_str(),
				render_policy = render_policy.as_str(),
				label = pending.label(),
				"suspense.query"
			);
		}
		value
	}

	/// Decides whether to render from the store and whether to fetch, and
	/// seeds the entry. Returns the availability when a fetch must start.
	fn fetch_and_save(
		&self,
		state: &mut QueryState,
		key: &Arc<str>,
		operation: &OperationDescriptor,
		fetch_policy: FetchPolicy,
		render_policy: RenderPolicy,
		released: &mut Released,
	) -> Option<OperationAvailability> {
		let availability = self.environment.check(operation);
		let has_full_query = availability.is_available();
		let can_partial_render = has_full_query
			|| (render_policy == RenderPolicy::Partial && availability != OperationAvailability::Stale);
		let (should_fetch, allow_render) = match fetch_policy {
			FetchPolicy::StoreOnly => (false, true),
			FetchPolicy::StoreOrNetwork => (!has_full_query, can_partial_render),
			FetchPolicy::StoreAndNetwork => (true, can_partial_render),
			FetchPolicy::NetworkOnly => (true, false),
		};

		let (value, resolver) = if allow_render || !should_fetch {
			(Suspense::Ready(QueryResult::new(key.clone(), operation)), None)
		} else {
			let (pending, resolver) = pending_fetch(operation.request.node().name.clone());
			(Suspense::Pending(pending), Some(resolver))
		};
		state.insert(key, |id| new_entry(id, operation, availability, value, resolver), released);
		tracing::debug!(
			key = &**key,
			fetch_policy = fetch_policy.as_str(),
			render_policy = render_policy.as_str(),
			?availability,
			should_fetch,
			"queryresource.fetch"
		);
		should_fetch.then_some(availability)
	}

	fn temporary_retain(self: &Arc<Self>, entry: &mut CacheEntry, key: &Arc<str>, token: u64, released: &mut Released) {
		entry.retain(&self.environment);
		let weak: Weak<Self> = Arc::downgrade(self);
		let timer_key = key.clone();
		let handle = self.environment.timer().schedule_after(
			self.config.temporary_retain_timeout(),
			Box::new(move || {
				if let Some(inner) = weak.upgrade() {
					inner.expire_temporary(&timer_key, token);
				}
			}),
		);
		if let Some(previous) = entry.temporary.replace(TemporaryRetain { token, handle }) {
			previous.handle.cancel();
			entry.release(released);
		}
	}

	fn expire_temporary(&self, key: &str, token: u64) {
		let mut released = Released::default();
		self.state.lock().release_with(key, &mut released, |entry, released| {
			if entry.temporary.as_ref().is_some_and(|temporary| temporary.token == token) {
				tracing::trace!(key, "queryresource.temporary_retain.expired");
				entry.temporary = None;
				entry.release(released)
			} else {
				false
			}
		});
		drop(released);
	}

	fn release_permanent(&self, key: &str, id: u64) {
		let mut released = Released::default();
		self.state
			.lock()
			.release_with(key, &mut released, |entry, released| entry.id == id && entry.release(released));
		drop(released);
	}

	fn observer(
		self: &Arc<Self>,
		key: Arc<str>,
		operation: OperationDescriptor,
		availability: OperationAvailability,
		mut user: Option<QueryObserver>,
	) -> FetchObserver {
		let weak = Arc::downgrade(self);
		let mut subscription: Option<NetworkSubscription> = None;
		Box::new(move |event: FetchEvent| {
			if let FetchEvent::Start(started) = &event {
				subscription = Some(started.clone());
			} else if subscription.as_ref().is_some_and(NetworkSubscription::is_cancelled) {
				return;
			}
			if let Some(inner) = weak.upgrade() {
				inner.on_fetch_event(&key, &operation, availability, &event);
			}
			if let Some(user) = user.as_mut() {
				user(&event);
			}
		})
	}

	fn on_fetch_event(
		&self,
		key: &Arc<str>,
		operation: &OperationDescriptor,
		availability: OperationAvailability,
		event: &FetchEvent,
	) {
		let mut released = Released::default();
		{
			let mut state = self.state.lock();
			let seed = |id, value| new_entry(id, operation, availability, value, None);
			match event {
				FetchEvent::Start(subscription) => {
					if let Some(entry) = state.cache.peek_mut(&**key) {
						entry.set_network(Some(subscription.clone()));
					}
				}
				FetchEvent::Next(_) => {
					let result = QueryResult::new(key.clone(), operation);
					let ready = Suspense::Ready(result.clone());
					if let Some(entry) = state.get_or_insert(key, |id| seed(id, ready), &mut released) {
						entry.processed_payloads += 1;
						entry.value = Suspense::Ready(result);
						released.resolvers.extend(entry.resolver.take());
					}
				}
				FetchEvent::Error(error) => {
					let failed = Suspense::Failed(ResourceError::from(error.clone()));
					if let Some(entry) = state.get_or_insert(key, |id| seed(id, failed), &mut released) {
						if entry.processed_payloads > 0 {
							tracing::debug!(
								key = &**key,
								payloads = entry.processed_payloads,
								%error,
								"queryresource.error_after_payload"
							);
						}
						entry.value = Suspense::Failed(ResourceError::from(error.clone()));
						released.resolvers.extend(entry.resolver.take());
						entry.set_network(None);
					}
				}
				FetchEvent::Complete => {
					if let Some(entry) = state.cache.peek_mut(&**key) {
						released.resolvers.extend(entry.resolver.take());
						entry.set_network(None);
					}
				}
			}
		}
		drop(released);
	}
}
