//! Normalized entity records.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SourceError};
use crate::id::DataId;

const ID_KEY: &str = "__id";
const TYPENAME_KEY: &str = "__typename";
const ERRORS_KEY: &str = "__errors";
const INVALIDATED_AT_KEY: &str = "__invalidated_at";
const REF_KEY: &str = "__ref";
const REFS_KEY: &str = "__refs";

/// An error reported by the server for one field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<Vec<Value>>,
}

impl PayloadError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			path: None,
		}
	}
}

/// Value stored under one field storage key.
///
/// A null link is stored as `Scalar(Value::Null)`; an absent key means the
/// field was never fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
	Scalar(Value),
	Link(DataId),
	Links(Vec<Option<DataId>>),
}

impl FieldValue {
	fn to_json(&self) -> Value {
		match self {
			Self::Scalar(value) => value.clone(),
			Self::Link(id) => Value::Object(Map::from_iter([(REF_KEY.to_owned(), Value::String(id.to_string()))])),
			Self::Links(ids) => {
				let ids = ids
					.iter()
					.map(|id| id.as_ref().map_or(Value::Null, |id| Value::String(id.to_string())))
					.collect();
				Value::Object(Map::from_iter([(REFS_KEY.to_owned(), Value::Array(ids))]))
			}
		}
	}

	fn from_json(id: &DataId, field: &str, value: &Value) -> Result<Self> {
		let malformed = |reason| SourceError::MalformedField {
			id: id.to_string(),
			field: field.to_owned(),
			reason,
		};
		let Value::Object(map) = value else {
			return Ok(Self::Scalar(value.clone()));
		};
		if let Some(link) = map.get(REF_KEY) {
			let link = link.as_str().ok_or_else(|| malformed("`__ref` must be a string"))?;
			return Ok(Self::Link(DataId::from(link)));
		}
		if let Some(links) = map.get(REFS_KEY) {
			let links = links.as_array().ok_or_else(|| malformed("`__refs` must be an array"))?;
			let ids = links
				.iter()
				.map(|link| match link {
					Value::Null => Ok(None),
					Value::String(s) => Ok(Some(DataId::from(s.as_str()))),
					_ => Err(malformed("`__refs` entries must be strings or null")),
				})
				.collect::<Result<Vec<_>>>()?;
			return Ok(Self::Links(ids));
		}
		Ok(Self::Scalar(value.clone()))
	}
}

/// One entity's fields, keyed by storage key.
///
/// Records are built mutably, then published behind an `Arc` and never
/// touched again; [`Record::update`] produces the successor value.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
	id: DataId,
	typename: Arc<str>,
	fields: FxHashMap<Arc<str>, FieldValue>,
	errors: FxHashMap<Arc<str>, Arc<[PayloadError]>>,
	invalidated_at: Option<u64>,
}

impl Record {
	pub fn new(id: impl Into<DataId>, typename: impl Into<Arc<str>>) -> Self {
		Self {
			id: id.into(),
			typename: typename.into(),
			fields: FxHashMap::default(),
			errors: FxHashMap::default(),
			invalidated_at: None,
		}
	}

	pub fn id(&self) -> &DataId {
		&self.id
	}

	pub fn typename(&self) -> &str {
		&self.typename
	}

	pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
		self.fields.get(storage_key)
	}

	/// Returns the scalar under `storage_key`, if it holds one.
	pub fn value(&self, storage_key: &str) -> Option<&Value> {
		match self.fields.get(storage_key) {
			Some(FieldValue::Scalar(value)) => Some(value),
			_ => None,
		}
	}

	/// Payload errors the server reported for `storage_key`.
	pub fn errors(&self, storage_key: &str) -> Option<&[PayloadError]> {
		self.errors.get(storage_key).map(|errors| &errors[..])
	}

	/// Write epoch at which this record was explicitly invalidated.
	pub fn invalidated_at(&self) -> Option<u64> {
		self.invalidated_at
	}

	pub fn storage_keys(&self) -> impl Iterator<Item = &str> {
		self.fields.keys().map(|k| &**k)
	}

	/// Iterates the ids of every record this one links to.
	pub fn links(&self) -> impl Iterator<Item = &DataId> {
		self.fields.values().flat_map(|value| {
			let (single, many): (Option<&DataId>, &[Option<DataId>]) = match value {
				FieldValue::Link(id) => (Some(id), &[]),
				FieldValue::Links(ids) => (None, ids),
				FieldValue::Scalar(_) => (None, &[]),
			};
			single.into_iter().chain(many.iter().flatten())
		})
	}

	pub fn set(&mut self, storage_key: impl Into<Arc<str>>, value: FieldValue) {
		self.fields.insert(storage_key.into(), value);
	}

	pub fn set_value(&mut self, storage_key: impl Into<Arc<str>>, value: Value) {
		self.set(storage_key, FieldValue::Scalar(value));
	}

	pub fn set_link(&mut self, storage_key: impl Into<Arc<str>>, id: impl Into<DataId>) {
		self.set(storage_key, FieldValue::Link(id.into()));
	}

	pub fn set_links(&mut self, storage_key: impl Into<Arc<str>>, ids: Vec<Option<DataId>>) {
		self.set(storage_key, FieldValue::Links(ids));
	}

	pub fn set_errors(&mut self, storage_key: impl Into<Arc<str>>, errors: Vec<PayloadError>) {
		self.errors.insert(storage_key.into(), errors.into());
	}

	pub fn remove(&mut self, storage_key: &str) {
		self.fields.remove(storage_key);
		self.errors.remove(storage_key);
	}

	pub fn set_invalidated_at(&mut self, epoch: u64) {
		self.invalidated_at = Some(epoch);
	}

	pub fn with_value(mut self, storage_key: impl Into<Arc<str>>, value: Value) -> Self {
		self.set_value(storage_key, value);
		self
	}

	pub fn with_link(mut self, storage_key: impl Into<Arc<str>>, id: impl Into<DataId>) -> Self {
		self.set_link(storage_key, id);
		self
	}

	pub fn with_links<I, D>(mut self, storage_key: impl Into<Arc<str>>, ids: I) -> Self
	where
		I: IntoIterator<Item = Option<D>>,
		D: Into<DataId>,
	{
		self.set_links(storage_key, ids.into_iter().map(|id| id.map(Into::into)).collect());
		self
	}

	pub fn with_errors(mut self, storage_key: impl Into<Arc<str>>, errors: Vec<PayloadError>) -> Self {
		self.set_errors(storage_key, errors);
		self
	}

	/// Merges `next` over `self`, last write winning per storage key.
	///
	/// Returns `None` when `next` changes nothing, so callers can skip marking
	/// the record as updated. A field written without errors clears the
	/// errors previously stored for it.
	pub fn update(&self, next: &Record) -> Option<Record> {
		let mut updated: Option<Record> = None;
		if next.typename != self.typename {
			updated.get_or_insert_with(|| self.clone()).typename = next.typename.clone();
		}
		for (key, value) in &next.fields {
			let next_errors = next.errors.get(key);
			if self.fields.get(key) == Some(value) && self.errors.get(key) == next_errors {
				continue;
			}
			let target = updated.get_or_insert_with(|| self.clone());
			target.fields.insert(key.clone(), value.clone());
			match next_errors {
				Some(errors) => target.errors.insert(key.clone(), errors.clone()),
				None => target.errors.remove(key),
			};
		}
		for (key, errors) in &next.errors {
			if !next.fields.contains_key(key) && self.errors.get(key) != Some(errors) {
				updated.get_or_insert_with(|| self.clone()).errors.insert(key.clone(), errors.clone());
			}
		}
		if let Some(epoch) = next.invalidated_at
			&& self.invalidated_at != Some(epoch)
		{
			updated.get_or_insert_with(|| self.clone()).invalidated_at = Some(epoch);
		}
		updated
	}

	/// Plain JSON form: reserved `__`-prefixed keys plus one entry per field.
	pub fn to_json(&self) -> Value {
		let mut map = Map::new();
		map.insert(ID_KEY.to_owned(), Value::String(self.id.to_string()));
		map.insert(TYPENAME_KEY.to_owned(), Value::String(self.typename.to_string()));
		for (key, value) in &self.fields {
			map.insert(key.to_string(), value.to_json());
		}
		if !self.errors.is_empty() {
			let errors = self
				.errors
				.iter()
				.map(|(key, errors)| (key.to_string(), serde_json::to_value(&errors[..]).unwrap_or(Value::Null)))
				.collect();
			map.insert(ERRORS_KEY.to_owned(), Value::Object(errors));
		}
		if let Some(epoch) = self.invalidated_at {
			map.insert(INVALIDATED_AT_KEY.to_owned(), Value::from(epoch));
		}
		Value::Object(map)
	}

	/// Parses the form produced by [`Self::to_json`]. `key` is the id the
	/// record is stored under.
	pub fn from_json(key: &str, value: &Value) -> Result<Self> {
		let Value::Object(map) = value else {
			return Err(SourceError::NotAnObject {
				what: format!("record `{key}`"),
				found: value.to_string(),
			});
		};
		if let Some(declared) = map.get(ID_KEY).and_then(Value::as_str)
			&& declared != key
		{
			return Err(SourceError::IdMismatch {
				key: key.to_owned(),
				id: declared.to_owned(),
			});
		}
		let typename = map
			.get(TYPENAME_KEY)
			.and_then(Value::as_str)
			.ok_or_else(|| SourceError::MissingTypename { id: key.to_owned() })?;
		let mut record = Record::new(key, typename);
		for (field, value) in map {
			match field.as_str() {
				ID_KEY | TYPENAME_KEY => {}
				ERRORS_KEY => {
					let Value::Object(errors) = value else {
						return Err(SourceError::MalformedField {
							id: key.to_owned(),
							field: field.clone(),
							reason: "`__errors` must be an object",
						});
					};
					for (storage_key, errors) in errors {
						let errors: Vec<PayloadError> = serde_json::from_value(errors.clone())?;
						record.set_errors(storage_key.as_str(), errors);
					}
				}
				INVALIDATED_AT_KEY => {
					let epoch = value.as_u64().ok_or_else(|| SourceError::MalformedField {
						id: key.to_owned(),
						field: field.clone(),
						reason: "`__invalidated_at` must be an unsigned integer",
					})?;
					record.set_invalidated_at(epoch);
				}
				_ => {
					let parsed = FieldValue::from_json(&record.id, field, value)?;
					record.set(field.as_str(), parsed);
				}
			}
		}
		Ok(record)
	}
}
