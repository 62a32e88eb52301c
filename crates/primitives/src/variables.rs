use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::storage_key::stable_stringify;

/// Bound variable values for a request or fragment.
///
/// Ordered by name so equality and the stable JSON rendering do not depend on
/// insertion order. Cloning shares the underlying map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables(Arc<BTreeMap<String, Value>>);

impl Variables {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	/// Sets `name`, copying the map first if it is shared.
	pub fn insert(&mut self, name: impl Into<String>, value: Value) {
		Arc::make_mut(&mut self.0).insert(name.into(), value);
	}

	/// Builder form of [`Self::insert`].
	pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
		self.insert(name, value);
		self
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Stable JSON rendering (`{}` when empty).
	pub fn to_stable_json(&self) -> String {
		stable_stringify(&self.to_json())
	}

	pub fn to_json(&self) -> Value {
		Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
	}
}

impl<K: Into<String>> FromIterator<(K, Value)> for Variables {
	fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
		Self(Arc::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect()))
	}
}

impl From<serde_json::Map<String, Value>> for Variables {
	fn from(map: serde_json::Map<String, Value>) -> Self {
		map.into_iter().collect()
	}
}
