//! Immutable result trees produced by reads.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::id::DataId;
use crate::selector::RequestDescriptor;
use crate::snapshot::FieldError;
use crate::variables::Variables;

/// One node of a read result.
///
/// Composite nodes are `Arc`-shared; consecutive reads of unchanged data hand
/// back the same allocations (see [`recycle_nodes_into`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
	Null,
	Scalar(Value),
	List(Arc<[Data]>),
	Object(Arc<DataObject>),
	/// A `@catch(to: RESULT)` field whose subtree raised errors.
	Error(Arc<[FieldError]>),
}

/// Fields of one object, in selection order, plus the fragment references
/// spread on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataObject {
	pub fields: IndexMap<Arc<str>, Data>,
	pub fragments: Option<FragmentRefs>,
}

/// Opaque handle a parent read leaves for each spread fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRefs {
	pub id: DataId,
	/// Fragment name to the argument values the spread passed.
	pub fragments: IndexMap<Arc<str>, Variables>,
	pub owner: RequestDescriptor,
}

impl Data {
	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	pub fn as_object(&self) -> Option<&DataObject> {
		match self {
			Self::Object(object) => Some(object),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[Data]> {
		match self {
			Self::List(items) => Some(items),
			_ => None,
		}
	}

	pub fn as_scalar(&self) -> Option<&Value> {
		match self {
			Self::Scalar(value) => Some(value),
			_ => None,
		}
	}

	/// Looks up a field of an object node.
	pub fn get(&self, key: &str) -> Option<&Data> {
		self.as_object().and_then(|object| object.fields.get(key))
	}

	/// True when both nodes share storage (or are equal leaves).
	pub fn same_node(&self, other: &Data) -> bool {
		match (self, other) {
			(Self::Null, Self::Null) => true,
			(Self::Scalar(a), Self::Scalar(b)) => a == b,
			(Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
			(Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
			(Self::Error(a), Self::Error(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}

	/// Plain JSON view of the tree. Fragment references and caught errors
	/// are dropped.
	pub fn to_json(&self) -> Value {
		match self {
			Self::Null | Self::Error(_) => Value::Null,
			Self::Scalar(value) => value.clone(),
			Self::List(items) => Value::Array(items.iter().map(Data::to_json).collect()),
			Self::Object(object) => Value::Object(
				object
					.fields
					.iter()
					.map(|(key, value)| (key.to_string(), value.to_json()))
					.collect(),
			),
		}
	}
}

impl From<DataObject> for Data {
	fn from(object: DataObject) -> Self {
		Self::Object(Arc::new(object))
	}
}

impl From<Value> for Data {
	fn from(value: Value) -> Self {
		match value {
			Value::Null => Self::Null,
			value => Self::Scalar(value),
		}
	}
}

/// Returns `next` with every subtree equal to the matching subtree of `prev`
/// replaced by `prev`'s allocation.
///
/// When nothing changed the result is `prev` itself, so callers detect "no
/// change" with [`Data::same_node`].
pub fn recycle_nodes_into(prev: &Data, next: Data) -> Data {
	match (prev, next) {
		(Data::Object(prev_object), Data::Object(next_object)) => {
			if Arc::ptr_eq(prev_object, &next_object) {
				return prev.clone();
			}
			let mut object = Arc::unwrap_or_clone(next_object);
			let mut unchanged = object.fragments == prev_object.fragments && object.fields.len() == prev_object.fields.len();
			for (key, value) in object.fields.iter_mut() {
				let Some(prev_value) = prev_object.fields.get(key) else {
					unchanged = false;
					continue;
				};
				let recycled = recycle_nodes_into(prev_value, std::mem::replace(value, Data::Null));
				unchanged &= recycled.same_node(prev_value);
				*value = recycled;
			}
			if unchanged { prev.clone() } else { Data::from(object) }
		}
		(Data::List(prev_items), Data::List(next_items)) => {
			if Arc::ptr_eq(prev_items, &next_items) {
				return prev.clone();
			}
			let mut unchanged = prev_items.len() == next_items.len();
			let items: Vec<Data> = next_items
				.iter()
				.enumerate()
				.map(|(idx, item)| match prev_items.get(idx) {
					Some(prev_item) => {
						let recycled = recycle_nodes_into(prev_item, item.clone());
						unchanged &= recycled.same_node(prev_item);
						recycled
					}
					None => item.clone(),
				})
				.collect();
			if unchanged { prev.clone() } else { Data::List(items.into()) }
		}
		(prev, next) if *prev == next => prev.clone(),
		(_, next) => next,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn object(fields: impl IntoIterator<Item = (&'static str, Data)>) -> Data {
		Data::from(DataObject {
			fields: fields.into_iter().map(|(k, v)| (Arc::from(k), v)).collect(),
			fragments: None,
		})
	}

	#[test]
	fn test_recycle_returns_prev_when_equal() {
		let prev = object([("name", Data::from(json!("Zuck"))), ("tags", Data::List(vec![Data::Null].into()))]);
		let next = object([("name", Data::from(json!("Zuck"))), ("tags", Data::List(vec![Data::Null].into()))]);
		let recycled = recycle_nodes_into(&prev, next);
		assert!(recycled.same_node(&prev));
	}

	#[test]
	fn test_recycle_shares_unchanged_subtrees() {
		let friend = object([("name", Data::from(json!("Dustin")))]);
		let prev = object([("name", Data::from(json!("Zuck"))), ("friend", friend.clone())]);
		let next = object([
			("name", Data::from(json!("Mark"))),
			("friend", object([("name", Data::from(json!("Dustin")))])),
		]);
		let recycled = recycle_nodes_into(&prev, next);
		assert!(!recycled.same_node(&prev));
		assert!(recycled.get("friend").unwrap().same_node(&friend));
		assert_eq!(recycled.get("name"), Some(&Data::from(json!("Mark"))));
	}

	#[test]
	fn test_recycle_detects_list_growth() {
		let prev = Data::List(vec![Data::from(json!(1))].into());
		let next = Data::List(vec![Data::from(json!(1)), Data::from(json!(2))].into());
		let recycled = recycle_nodes_into(&prev, next.clone());
		assert_eq!(recycled, next);
		assert!(!recycled.same_node(&prev));
	}

	#[test]
	fn test_to_json() {
		let data = object([("id", Data::from(json!("4"))), ("friend", Data::Null)]);
		assert_eq!(data.to_json(), json!({"id": "4", "friend": null}));
	}
}
