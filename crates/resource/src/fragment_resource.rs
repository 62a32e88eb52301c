//! Cache of fragment reads.
//!
//! Reads are keyed by `{owner}/{fragment}/{variables}/{ids}`. A read with
//! complete data is cached until the subscription set up for it is disposed;
//! a read with missing data suspends while an operation in flight may still
//! supply it, and otherwise returns what the store has.

use std::fmt;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tessera_primitives::{
	Data, FieldError, ReaderFragment, RequestIdentifier, Snapshot, Variables, get_plural_selector, get_selector,
	recycle_nodes_into,
};
use tessera_store::Disposable;

use crate::config::FragmentResourceConfig;
use crate::environment::Environment;
use crate::error::ResourceError;
use crate::pending::PendingFetch;
use crate::suspense::Suspense;

#[cfg(test)]
mod tests;

/// Snapshots behind a fragment result.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentSnapshot {
	/// Null key: nothing was read.
	None,
	Single(Snapshot),
	Plural(Vec<Snapshot>),
}

impl FragmentSnapshot {
	fn iter(&self) -> impl Iterator<Item = &Snapshot> {
		let snapshots: &[Snapshot] = match self {
			Self::None => &[],
			Self::Single(snapshot) => std::slice::from_ref(snapshot),
			Self::Plural(snapshots) => snapshots,
		};
		snapshots.iter()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentResult {
	pub cache_key: Arc<str>,
	/// A list for plural fragments.
	pub data: Data,
	pub is_missing_data: bool,
	pub snapshot: FragmentSnapshot,
	/// Store epoch when the snapshots were read.
	pub store_epoch: u64,
}

impl FragmentResult {
	fn new(cache_key: Arc<str>, snapshot: FragmentSnapshot, store_epoch: u64) -> Self {
		let (data, is_missing_data) = match &snapshot {
			FragmentSnapshot::None => (Data::Null, false),
			FragmentSnapshot::Single(snapshot) => (snapshot.data.clone(), snapshot.is_missing_data),
			FragmentSnapshot::Plural(snapshots) => (
				Data::List(snapshots.iter().map(|snapshot| snapshot.data.clone()).collect()),
				snapshots.iter().any(|snapshot| snapshot.is_missing_data),
			),
		};
		Self {
			cache_key,
			data,
			is_missing_data,
			snapshot,
			store_epoch,
		}
	}

	fn owners(&self) -> Vec<RequestIdentifier> {
		let mut owners: Vec<RequestIdentifier> = Vec::new();
		for snapshot in self.snapshot.iter() {
			let owner = snapshot.selector.owner.identifier();
			if !owners.contains(owner) {
				owners.push(owner.clone());
			}
		}
		owners
	}

	/// Logs recoverable field errors; fails on fatal ones.
	fn check_errors(&self, fragment: &ReaderFragment) -> Result<(), ResourceError> {
		let mut fatal: Vec<FieldError> = Vec::new();
		for snapshot in self.snapshot.iter() {
			if let Err(errors) = snapshot.report_field_errors() {
				fatal.extend(errors);
			}
		}
		if fatal.is_empty() {
			Ok(())
		} else {
			Err(ResourceError::FieldErrors {
				fragment: fragment.name.to_string(),
				errors: fatal,
			})
		}
	}
}

/// `{owner}/{fragment}/{variables}/{ids}` for a fragment key.
///
/// Owners and ids of a plural key are bracketed lists; a null key yields an
/// owner of `null`, and a key without a reference to the fragment yields ids
/// of `missing`.
pub fn fragment_identifier(fragment: &Arc<ReaderFragment>, key: &Data) -> Arc<str> {
	let (owner, variables, ids) = if fragment.plural {
		match key.as_list() {
			Some(items) => plural_identity(fragment, items),
			None if key.is_null() => ("null".to_string(), Variables::new(), "null".to_string()),
			None => ("null".to_string(), Variables::new(), "missing".to_string()),
		}
	} else {
		match get_selector(fragment, key) {
			Some(selector) => (
				selector.owner.identifier().to_string(),
				selector.variables,
				selector.data_id.to_string(),
			),
			None if key.is_null() => ("null".to_string(), Variables::new(), "null".to_string()),
			None => ("null".to_string(), Variables::new(), "missing".to_string()),
		}
	};
	format!("{owner}/{}/{}/{ids}", fragment.name, variables.to_stable_json()).into()
}

fn plural_identity(fragment: &Arc<ReaderFragment>, items: &[Data]) -> (String, Variables, String) {
	let mut owners = Vec::new();
	let mut ids = Vec::new();
	let mut variables = Variables::new();
	for item in items {
		match get_selector(fragment, item) {
			Some(selector) => {
				owners.push(selector.owner.identifier().to_string());
				ids.push(selector.data_id.to_string());
				for (name, value) in selector.variables.iter() {
					variables.insert(name, value.clone());
				}
			}
			None => ids.push(String::new()),
		}
	}
	(format!("[{}]", owners.join(",")), variables, format!("[{}]", ids.join(",")))
}

enum FragmentEntry {
	/// Missing data that an operation in flight may supply.
	Pending(PendingFetch),
	Done(FragmentResult),
}

enum Cached {
	Hit(FragmentResult),
	Waiting(PendingFetch),
	Settled,
	Miss,
}

struct FragmentInner {
	environment: Environment,
	cache: Mutex<LruCache<Arc<str>, FragmentEntry>>,
}

impl FragmentInner {
	fn put(&self, key: Arc<str>, entry: FragmentEntry) {
		self.cache.lock().push(key, entry);
	}

	fn update_single(&self, key: &Arc<str>, latest: &Snapshot) {
		let store_epoch = self.environment.store().epoch();
		let result = FragmentResult::new(key.clone(), FragmentSnapshot::Single(latest.clone()), store_epoch);
		self.put(key.clone(), FragmentEntry::Done(result));
	}

	fn update_plural(&self, key: &Arc<str>, current: &Mutex<Vec<Snapshot>>, index: usize, latest: &Snapshot) {
		let snapshots = {
			let mut current = current.lock();
			if let Some(slot) = current.get_mut(index) {
				*slot = latest.clone();
			}
			current.clone()
		};
		let store_epoch = self.environment.store().epoch();
		let result = FragmentResult::new(key.clone(), FragmentSnapshot::Plural(snapshots), store_epoch);
		self.put(key.clone(), FragmentEntry::Done(result));
	}
}

/// Fragment read cache for one [`Environment`]. Clones share the cache.
#[derive(Clone)]
pub struct FragmentResource {
	inner: Arc<FragmentInner>,
}

impl fmt::Debug for FragmentResource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FragmentResource")
			.field("entries", &self.inner.cache.lock().len())
			.finish()
	}
}

/// One named fragment read of a multi-fragment read.
pub type FragmentSpec<'a> = (&'a str, &'a Arc<ReaderFragment>, &'a Data);

impl FragmentResource {
	pub fn new(environment: Environment, config: FragmentResourceConfig) -> Self {
		Self {
			inner: Arc::new(FragmentInner {
				environment,
				cache: Mutex::new(LruCache::new(config.capacity())),
			}),
		}
	}

	pub fn environment(&self) -> &Environment {
		&self.inner.environment
	}

	pub fn len(&self) -> usize {
		self.inner.cache.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Reads `fragment` through the reference(s) in `key`.
	pub fn read(&self, fragment: &Arc<ReaderFragment>, key: &Data) -> Suspense<FragmentResult> {
		self.read_with_identifier(fragment, key, fragment_identifier(fragment, key))
	}

	pub fn read_with_identifier(
		&self,
		fragment: &Arc<ReaderFragment>,
		key: &Data,
		identifier: Arc<str>,
	) -> Suspense<FragmentResult> {
		let environment = &self.inner.environment;
		if key.is_null() {
			return Suspense::Ready(FragmentResult::new(identifier, FragmentSnapshot::None, 0));
		}
		let store_epoch = environment.store().epoch();
		if fragment.plural && key.as_list().is_some_and(<[Data]>::is_empty) {
			return Suspense::Ready(FragmentResult::new(
				identifier,
				FragmentSnapshot::Plural(Vec::new()),
				store_epoch,
			));
		}

		let cached = {
			let mut cache = self.inner.cache.lock();
			let cached = match cache.get(&*identifier) {
				Some(FragmentEntry::Pending(pending)) if !pending.is_resolved() => Cached::Waiting(pending.clone()),
				Some(FragmentEntry::Pending(_)) => Cached::Settled,
				Some(FragmentEntry::Done(result)) => Cached::Hit(result.clone()),
				None => Cached::Miss,
			};
			if matches!(cached, Cached::Settled) {
				cache.pop(&*identifier);
			}
			cached
		};
		match cached {
			Cached::Hit(result) => return Suspense::Ready(result),
			Cached::Waiting(pending) => {
				tracing::debug!(fragment = &*fragment.name, key = &*identifier, cached = true, "suspense.fragment");
				return Suspense::Pending(pending);
			}
			Cached::Settled | Cached::Miss => {}
		}

		let snapshot = if fragment.plural {
			match get_plural_selector(fragment, key) {
				Some(plural) => {
					FragmentSnapshot::Plural(plural.selectors.iter().map(|selector| environment.lookup(selector)).collect())
				}
				None => return missing_ref(fragment),
			}
		} else {
			match get_selector(fragment, key) {
				Some(selector) => FragmentSnapshot::Single(environment.lookup(&selector)),
				None => return missing_ref(fragment),
			}
		};
		let result = FragmentResult::new(identifier.clone(), snapshot, store_epoch);

		if !result.is_missing_data {
			if let Err(error) = result.check_errors(fragment) {
				return Suspense::Failed(error);
			}
			self.inner.put(identifier, FragmentEntry::Done(result.clone()));
			return Suspense::Ready(result);
		}

		let mut pending: Vec<PendingFetch> = result
			.owners()
			.iter()
			.filter_map(|owner| environment.tracker().pending_for_owner(owner))
			.collect();
		let pending = match pending.len() {
			0 => None,
			1 => pending.pop(),
			_ => Some(PendingFetch::all(fragment.name.clone(), pending)),
		};
		if let Some(pending) = pending {
			tracing::debug!(fragment = &*fragment.name, key = &*identifier, cached = false, "suspense.fragment");
			self.inner.put(identifier, FragmentEntry::Pending(pending.clone()));
			return Suspense::Pending(pending);
		}

		tracing::warn!(
			fragment = &*fragment.name,
			key = &*identifier,
			"fragmentresource.missing_data"
		);
		match result.check_errors(fragment) {
			Ok(()) => Suspense::Ready(result),
			Err(error) => Suspense::Failed(error),
		}
	}

	/// Reads several named fragments; the first read that suspends or fails
	/// decides the outcome.
	pub fn read_spec(&self, specs: &[FragmentSpec<'_>]) -> Suspense<Vec<(String, FragmentResult)>> {
		let mut results = Vec::with_capacity(specs.len());
		for &(name, fragment, key) in specs {
			match self.read(fragment, key) {
				Suspense::Ready(result) => results.push((name.to_string(), result)),
				Suspense::Pending(pending) => return Suspense::Pending(pending),
				Suspense::Failed(error) => return Suspense::Failed(error),
			}
		}
		Suspense::Ready(results)
	}

	/// Subscribes to the records behind `result`, calling `callback` after
	/// each change. Calls it once up front if the store moved on since the
	/// read. Disposing drops the cached read.
	pub fn subscribe(&self, result: &FragmentResult, callback: impl Fn() + Send + Sync + 'static) -> Disposable {
		self.subscribe_shared(result, Arc::new(callback))
	}

	fn subscribe_shared(&self, result: &FragmentResult, callback: Arc<dyn Fn() + Send + Sync>) -> Disposable {
		if matches!(result.snapshot, FragmentSnapshot::None) {
			return Disposable::noop();
		}
		let environment = &self.inner.environment;
		let (missed, current) = self.check_missed_updates(result);
		if missed {
			callback();
		}

		let key = result.cache_key.clone();
		let mut disposables = Vec::new();
		match current {
			FragmentSnapshot::None => {}
			FragmentSnapshot::Single(snapshot) => {
				let weak = Arc::downgrade(&self.inner);
				let key = key.clone();
				let callback = callback.clone();
				disposables.push(environment.subscribe(snapshot, move |latest| {
					if let Some(inner) = weak.upgrade() {
						inner.update_single(&key, latest);
					}
					callback();
				}));
			}
			FragmentSnapshot::Plural(snapshots) => {
				let current = Arc::new(Mutex::new(snapshots.clone()));
				for (index, snapshot) in snapshots.into_iter().enumerate() {
					let weak = Arc::downgrade(&self.inner);
					let key = key.clone();
					let current = current.clone();
					let callback = callback.clone();
					disposables.push(environment.subscribe(snapshot, move |latest| {
						if let Some(inner) = weak.upgrade() {
							inner.update_plural(&key, &current, index, latest);
						}
						callback();
					}));
				}
			}
		}

		let weak: Weak<FragmentInner> = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			for mut disposable in disposables {
				disposable.dispose();
			}
			if let Some(inner) = weak.upgrade() {
				inner.cache.lock().pop(&*key);
			}
		})
	}

	pub fn subscribe_spec<'a>(
		&self,
		results: impl IntoIterator<Item = &'a FragmentResult>,
		callback: impl Fn() + Send + Sync + 'static,
	) -> Disposable {
		let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(callback);
		let disposables: Vec<Disposable> = results
			.into_iter()
			.map(|result| self.subscribe_shared(result, callback.clone()))
			.collect();
		Disposable::new(move || {
			for mut disposable in disposables {
				disposable.dispose();
			}
		})
	}

	/// Re-reads `result` if the store epoch moved since it was read.
	///
	/// Returns whether the data changed, and the current snapshot(s) with
	/// unchanged subtrees sharing the rendered allocations. A change
	/// refreshes the cached read.
	pub fn check_missed_updates(&self, result: &FragmentResult) -> (bool, FragmentSnapshot) {
		let environment = &self.inner.environment;
		let store_epoch = environment.store().epoch();
		if store_epoch == result.store_epoch {
			return (false, result.snapshot.clone());
		}
		let refresh = |rendered: &Snapshot| -> (bool, Snapshot) {
			let mut current = environment.lookup(&rendered.selector);
			let data = std::mem::replace(&mut current.data, Data::Null);
			current.data = recycle_nodes_into(&rendered.data, data);
			(!current.data.same_node(&rendered.data), current)
		};
		let (missed, current) = match &result.snapshot {
			FragmentSnapshot::None => return (false, FragmentSnapshot::None),
			FragmentSnapshot::Single(rendered) => {
				let (missed, current) = refresh(rendered);
				(missed, FragmentSnapshot::Single(current))
			}
			FragmentSnapshot::Plural(rendered) => {
				let mut missed = false;
				let current = rendered
					.iter()
					.map(|rendered| {
						let (changed, current) = refresh(rendered);
						missed |= changed;
						current
					})
					.collect();
				(missed, FragmentSnapshot::Plural(current))
			}
		};
		if missed {
			let refreshed = FragmentResult::new(result.cache_key.clone(), current.clone(), store_epoch);
			self.inner.put(result.cache_key.clone(), FragmentEntry::Done(refreshed));
		}
		(missed, current)
	}

	pub fn check_missed_updates_spec<'a>(&self, results: impl IntoIterator<Item = &'a FragmentResult>) -> bool {
		results
			.into_iter()
			.any(|result| self.check_missed_updates(result).0)
	}
}

fn missing_ref(fragment: &ReaderFragment) -> Suspense<FragmentResult> {
	Suspense::Failed(ResourceError::MissingFragmentRef {
		fragment: fragment.name.to_string(),
	})
}
