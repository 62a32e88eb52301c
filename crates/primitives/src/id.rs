use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifier of the root record every query reads from by default.
pub const ROOT_ID: &str = "client:root";
/// Type tag of the root record.
pub const ROOT_TYPE: &str = "__Root";

const CLIENT_PREFIX: &str = "client:";

/// Stable identifier of a normalized record.
///
/// Cheap to clone; hashes and compares like the underlying string so maps
/// keyed by `DataId` can be queried with `&str`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(Arc<str>);

impl DataId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	/// Returns the id of the root record.
	pub fn root() -> Self {
		Self::new(ROOT_ID)
	}

	/// Derives a client-side id for a record without its own identity,
	/// nested under `parent` at `storage_key` (and `index` for list items).
	pub fn client_child(parent: &DataId, storage_key: &str, index: Option<usize>) -> Self {
		match index {
			Some(index) => Self::new(format!("{parent}:{storage_key}:{index}")),
			None => Self::new(format!("{parent}:{storage_key}")),
		}
	}

	/// Returns true for ids minted on the client rather than by the server.
	pub fn is_client_generated(&self) -> bool {
		self.0.starts_with(CLIENT_PREFIX)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DataId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Borrow<str> for DataId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl AsRef<str> for DataId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl Deref for DataId {
	type Target = str;

	fn deref(&self) -> &str {
		&self.0
	}
}

impl From<&str> for DataId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for DataId {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

/// Canonical identity of one logical request: cache id plus the stable JSON
/// rendering of its variables.
///
/// Used as the retention key in the store and the fetch dedup key in the
/// result caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestIdentifier(Arc<str>);

impl RequestIdentifier {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RequestIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Borrow<str> for RequestIdentifier {
	fn borrow(&self) -> &str {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::record::Record;
	use crate::source::{RecordMap, RecordSource, RecordState};

	#[test]
	fn test_ids_serialize_as_plain_strings() {
		let id = DataId::new("4");
		assert_eq!(serde_json::to_value(&id).unwrap(), json!("4"));
		let back: RequestIdentifier = serde_json::from_value(json!("AppQuery{}")).unwrap();
		assert_eq!(back, RequestIdentifier::new("AppQuery{}"));
	}

	#[test]
	fn test_data_id_derefs_to_str_for_lookups() {
		let id = DataId::new("4");
		let source: RecordMap = [Record::new("4", "User")].into_iter().collect();
		assert_eq!(source.status(&id), RecordState::Existent);
		assert!(id.starts_with('4'));
		assert!(DataId::client_child(&DataId::root(), "me", None).is_client_generated());
	}
}
