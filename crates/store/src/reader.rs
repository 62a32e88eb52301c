//! Projects a selector against a record source into a [`Snapshot`].
//!
//! Reading is pure: it never writes to the source. Unknown ids and absent
//! fields set `is_missing_data` and are left out of the parent object;
//! known nulls read as [`Data::Null`].
//! `@required` nulls bubble to the closest nullable parent, `@catch` absorbs
//! errors raised beneath it, and fragment spreads leave [`FragmentRefs`]
//! rather than reading the spread's fields.

use std::mem;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tessera_primitives::selection::argument_values;
use tessera_primitives::{
	CatchTo, Data, DataId, DataObject, FieldError, FieldErrorKind, FieldValue, FragmentRefs, FragmentSpread, LinkedField,
	Lookup, Record, RecordSource, RequestDescriptor, RequiredAction, ScalarField, Selection, SingularReaderSelector,
	Snapshot, Value, Variables,
};

#[cfg(test)]
mod tests;

/// Reads `selector` from `source`.
pub fn read<S: RecordSource + ?Sized>(source: &S, selector: &SingularReaderSelector) -> Snapshot {
	let mut reader = Reader {
		source,
		variables: selector.variables.clone(),
		owner: &selector.owner,
		fragment_name: selector.node.name.clone(),
		throw_on_field_error: selector.node.throw_on_field_error,
		seen_records: FxHashSet::default(),
		is_missing_data: false,
		field_errors: Vec::new(),
		path: Vec::new(),
	};
	let data = reader.read_root(selector);
	Snapshot {
		data,
		seen_records: reader.seen_records,
		is_missing_data: reader.is_missing_data,
		field_errors: reader.field_errors,
		selector: selector.clone(),
	}
}

struct Reader<'a, S: ?Sized> {
	source: &'a S,
	variables: Variables,
	owner: &'a RequestDescriptor,
	fragment_name: Arc<str>,
	throw_on_field_error: bool,
	seen_records: FxHashSet<DataId>,
	is_missing_data: bool,
	field_errors: Vec<FieldError>,
	path: Vec<Arc<str>>,
}

/// Shared directive metadata of scalar and linked fields.
struct FieldMeta<'s> {
	key: &'s Arc<str>,
	required: Option<RequiredAction>,
	catch: Option<CatchTo>,
}

impl<'a, S: RecordSource + ?Sized> Reader<'a, S> {
	fn read_root(&mut self, selector: &SingularReaderSelector) -> Data {
		let Some(record) = self.lookup(&selector.data_id) else {
			return Data::Null;
		};
		let mut object = DataObject::default();
		if self.traverse_selections(&selector.node.selections, record, &mut object) {
			Data::from(object)
		} else {
			Data::Null
		}
	}

	/// Records `id` as seen; `None` for nulls and unknown ids.
	fn lookup(&mut self, id: &DataId) -> Option<&'a Arc<Record>> {
		self.seen_records.insert(id.clone());
		match self.source.get(id) {
			Lookup::Present(record) => Some(record),
			Lookup::Null => None,
			Lookup::Unknown => {
				self.is_missing_data = true;
				None
			}
		}
	}

	/// Returns false when a `@required` field bubbled, nulling the parent.
	fn traverse_selections(&mut self, selections: &[Selection], record: &'a Arc<Record>, object: &mut DataObject) -> bool {
		for selection in selections {
			let complete = match selection {
				Selection::Scalar(field) => self.read_scalar_field(field, record, object),
				Selection::Linked(field) => self.read_linked_field(field, record, object),
				Selection::InlineFragment(inline) => match &inline.type_condition {
					Some(typename) if &**typename != record.typename() => true,
					_ => self.traverse_selections(&inline.selections, record, object),
				},
				Selection::Condition(condition) => {
					!condition.passes(&self.variables) || self.traverse_selections(&condition.selections, record, object)
				}
				Selection::FragmentSpread(spread) => {
					self.create_fragment_ref(spread, record, object);
					true
				}
			};
			if !complete {
				return false;
			}
		}
		true
	}

	fn read_scalar_field(&mut self, field: &ScalarField, record: &'a Arc<Record>, object: &mut DataObject) -> bool {
		let meta = FieldMeta {
			key: field.response_key(),
			required: field.required,
			catch: field.catch,
		};
		self.read_field(meta, object, |reader, _| {
			let storage_key = field.storage_key(&reader.variables);
			match record.get(&storage_key) {
				None => {
					reader.is_missing_data = true;
					None
				}
				Some(FieldValue::Scalar(Value::Null)) => {
					reader.add_payload_errors(record, &storage_key);
					Some(Data::Null)
				}
				Some(FieldValue::Scalar(value)) => Some(Data::Scalar(value.clone())),
				Some(_) => {
					tracing::debug!(record = %record.id(), field = %storage_key, "reader.unexpected_link");
					reader.is_missing_data = true;
					None
				}
			}
		})
	}

	fn read_linked_field(&mut self, field: &LinkedField, record: &'a Arc<Record>, object: &mut DataObject) -> bool {
		let meta = FieldMeta {
			key: field.response_key(),
			required: field.required,
			catch: field.catch,
		};
		self.read_field(meta, object, |reader, prev| {
			let storage_key = field.storage_key(&reader.variables);
			match record.get(&storage_key) {
				None => {
					reader.is_missing_data = true;
					None
				}
				Some(FieldValue::Scalar(Value::Null)) => {
					reader.add_payload_errors(record, &storage_key);
					Some(Data::Null)
				}
				Some(FieldValue::Link(id)) if !field.plural => reader.traverse_linked(id, &field.selections, prev),
				Some(FieldValue::Links(ids)) if field.plural => {
					let prev_items = prev.and_then(Data::as_list).unwrap_or(&[]);
					let items: Vec<Data> = ids
						.iter()
						.enumerate()
						.map(|(idx, id)| {
							let Some(id) = id else {
								return Data::Null;
							};
							reader.path.push(Arc::from(idx.to_string()));
							let item = reader.traverse_linked(id, &field.selections, prev_items.get(idx));
							reader.path.pop();
							item.unwrap_or(Data::Null)
						})
						.collect();
					Some(Data::List(items.into()))
				}
				Some(_) => {
					tracing::debug!(record = %record.id(), field = %storage_key, plural = field.plural, "reader.shape_mismatch");
					reader.is_missing_data = true;
					None
				}
			}
		})
	}

	/// Reads one field through `read`, then applies `@required` and
	/// `@catch`. `read` returns `None` for missing data.
	fn read_field(
		&mut self,
		meta: FieldMeta<'_>,
		object: &mut DataObject,
		read: impl FnOnce(&mut Self, Option<&Data>) -> Option<Data>,
	) -> bool {
		self.path.push(meta.key.clone());
		let outer_errors = meta.catch.map(|_| mem::take(&mut self.field_errors));

		let prev = object.fields.get(meta.key).cloned();
		let mut value = read(self, prev.as_ref());
		let mut complete = true;
		if let Some(action) = meta.required
			&& value.as_ref().is_none_or(Data::is_null)
		{
			if value.is_some() {
				self.push_error(FieldErrorKind::MissingRequired { action }, action == RequiredAction::Throw);
			}
			complete = false;
		}

		if let (Some(to), Some(outer)) = (meta.catch, outer_errors) {
			let mut caught = mem::replace(&mut self.field_errors, outer);
			if !caught.is_empty() {
				for error in &mut caught {
					error.handled = true;
				}
				value = Some(match to {
					CatchTo::Null => Data::Null,
					CatchTo::Result => Data::Error(caught.clone().into()),
				});
				self.field_errors.extend(caught);
				complete = true;
			}
		}

		match value {
			Some(value) => {
				object.fields.insert(meta.key.clone(), value);
			}
			None => {
				object.fields.shift_remove(meta.key);
			}
		}
		self.path.pop();
		complete
	}

	fn traverse_linked(&mut self, id: &DataId, selections: &[Selection], prev: Option<&Data>) -> Option<Data> {
		self.seen_records.insert(id.clone());
		let record = match self.source.get(id) {
			Lookup::Present(record) => record,
			Lookup::Null => return Some(Data::Null),
			Lookup::Unknown => {
				self.is_missing_data = true;
				return None;
			}
		};
		let mut object = prev.and_then(Data::as_object).cloned().unwrap_or_default();
		if self.traverse_selections(selections, record, &mut object) {
			Some(Data::from(object))
		} else {
			Some(Data::Null)
		}
	}

	fn create_fragment_ref(&mut self, spread: &FragmentSpread, record: &Arc<Record>, object: &mut DataObject) {
		let arguments = argument_values(&spread.args, &self.variables);
		let refs = object.fragments.get_or_insert_with(|| FragmentRefs {
			id: record.id().clone(),
			fragments: IndexMap::new(),
			owner: self.owner.clone(),
		});
		refs.fragments.insert(spread.fragment.name.clone(), arguments);
	}

	fn add_payload_errors(&mut self, record: &Record, storage_key: &str) {
		let Some(errors) = record.errors(storage_key) else {
			return;
		};
		for error in errors {
			self.push_error(FieldErrorKind::Payload(error.clone()), self.throw_on_field_error);
		}
	}

	fn push_error(&mut self, kind: FieldErrorKind, fatal: bool) {
		let path = self.path.iter().map(|segment| &**segment).collect::<Vec<_>>().join(".");
		self.field_errors.push(FieldError {
			kind,
			owner: self.fragment_name.clone(),
			path: path.into(),
			handled: false,
			fatal,
		});
	}
}
