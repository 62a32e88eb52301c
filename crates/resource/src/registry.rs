//! One query and fragment resource per store.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_store::StoreId;

use crate::config::{CacheConfig, FragmentResourceConfig, QueryResourceConfig};
use crate::environment::Environment;
use crate::fragment_resource::FragmentResource;
use crate::query_resource::QueryResource;

/// The result caches belonging to one environment.
#[derive(Debug, Clone)]
pub struct Resources {
	pub query: QueryResource,
	pub fragment: FragmentResource,
}

/// Hands out the resources of an environment, creating them on first use.
///
/// Keyed by [`StoreId`], so environments sharing a store share resources.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
	query_config: QueryResourceConfig,
	fragment_config: FragmentResourceConfig,
	resources: Mutex<FxHashMap<StoreId, Resources>>,
}

impl ResourceRegistry {
	pub fn new(query_config: QueryResourceConfig, fragment_config: FragmentResourceConfig) -> Self {
		Self {
			query_config,
			fragment_config,
			resources: Mutex::default(),
		}
	}

	pub fn from_config(config: &CacheConfig) -> Self {
		Self::new(config.query.clone(), config.fragment.clone())
	}

	pub fn resources(&self, environment: &Environment) -> Resources {
		let id = environment.store().id();
		self.resources
			.lock()
			.entry(id)
			.or_insert_with(|| {
				tracing::debug!(store = ?id, "registry.create");
				Resources {
					query: QueryResource::new(environment.clone(), self.query_config.clone()),
					fragment: FragmentResource::new(environment.clone(), self.fragment_config.clone()),
				}
			})
			.clone()
	}

	pub fn query_resource(&self, environment: &Environment) -> QueryResource {
		self.resources(environment).query
	}

	pub fn fragment_resource(&self, environment: &Environment) -> FragmentResource {
		self.resources(environment).fragment
	}

	/// Forgets the resources of `store`. Outstanding clones keep working.
	pub fn remove(&self, store: StoreId) -> Option<Resources> {
		self.resources.lock().remove(&store)
	}

	pub fn len(&self) -> usize {
		self.resources.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use tessera_primitives::RecordMap;
	use tessera_store::Store;

	use super::*;

	#[test]
	fn test_resources_are_shared_per_store() {
		let registry = ResourceRegistry::from_config(&CacheConfig::default());
		let store = Store::new(RecordMap::new());
		let a = Environment::new(store.clone());
		let b = Environment::new(store);
		let other = Environment::new(Store::new(RecordMap::new()));

		registry.resources(&a);
		registry.resources(&b);
		assert_eq!(registry.len(), 1);
		registry.query_resource(&other);
		assert_eq!(registry.len(), 2);

		assert!(registry.remove(other.store().id()).is_some());
		assert!(registry.remove(other.store().id()).is_none());
		assert_eq!(registry.len(), 1);
	}
}
