//! Selection-driven traversal shared by availability checks and GC marking.

use rustc_hash::FxHashSet;
use tessera_primitives::selection::argument_values;
use tessera_primitives::{
	DataId, FieldValue, Lookup, NormalizationSelector, Record, RecordSource, Selection, Value, Variables,
	get_fragment_variables,
};

/// Everything reachable from one root through its selections.
#[derive(Debug, Default)]
pub(crate) struct Reachable {
	pub references: FxHashSet<DataId>,
	pub missing: bool,
	/// Highest `invalidated_at` among reached records.
	pub most_recent_invalidation: Option<u64>,
}

/// Walks `selector` through `source`, following links and fragment spreads.
pub(crate) fn walk<S: RecordSource + ?Sized>(source: &S, selector: &NormalizationSelector) -> Reachable {
	let mut walker = Walker {
		source,
		out: Reachable::default(),
	};
	walker.visit(&selector.data_id, &selector.node.selections, &selector.variables);
	walker.out
}

struct Walker<'a, S: ?Sized> {
	source: &'a S,
	out: Reachable,
}

impl<S: RecordSource + ?Sized> Walker<'_, S> {
	fn visit(&mut self, id: &DataId, selections: &[Selection], variables: &Variables) {
		self.out.references.insert(id.clone());
		let record = match self.source.get(id) {
			Lookup::Present(record) => record.clone(),
			Lookup::Null => return,
			Lookup::Unknown => {
				self.out.missing = true;
				return;
			}
		};
		if let Some(epoch) = record.invalidated_at() {
			self.out.most_recent_invalidation = Some(self.out.most_recent_invalidation.map_or(epoch, |prev| prev.max(epoch)));
		}
		self.traverse(&record, selections, variables);
	}

	fn traverse(&mut self, record: &Record, selections: &[Selection], variables: &Variables) {
		for selection in selections {
			match selection {
				Selection::Scalar(field) => {
					if record.get(&field.storage_key(variables)).is_none() {
						self.out.missing = true;
					}
				}
				Selection::Linked(field) => match record.get(&field.storage_key(variables)) {
					None => self.out.missing = true,
					Some(FieldValue::Link(id)) => self.visit(id, &field.selections, variables),
					Some(FieldValue::Links(ids)) => {
						for id in ids.iter().flatten() {
							self.visit(id, &field.selections, variables);
						}
					}
					Some(FieldValue::Scalar(Value::Null)) => {}
					Some(FieldValue::Scalar(_)) => self.out.missing = true,
				},
				Selection::InlineFragment(inline) => {
					let matches = inline
						.type_condition
						.as_deref()
						.is_none_or(|typename| typename == record.typename());
					if matches {
						self.traverse(record, &inline.selections, variables);
					}
				}
				Selection::Condition(condition) => {
					if condition.passes(variables) {
						self.traverse(record, &condition.selections, variables);
					}
				}
				Selection::FragmentSpread(spread) => {
					let arguments = argument_values(&spread.args, variables);
					let fragment_variables = get_fragment_variables(&spread.fragment, variables, &arguments);
					self.traverse(record, &spread.fragment.selections, &fragment_variables);
				}
			}
		}
	}
}
