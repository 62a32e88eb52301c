//! Selectors, request descriptors and fragment variable resolution.

use std::sync::Arc;

use crate::data::Data;
use crate::id::{DataId, RequestIdentifier};
use crate::selection::{ArgumentDefinition, ConcreteRequest, ReaderFragment};
use crate::variables::Variables;

/// A compiled request bound to variables.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
	identifier: RequestIdentifier,
	node: Arc<ConcreteRequest>,
	variables: Variables,
}

impl RequestDescriptor {
	pub fn new(node: Arc<ConcreteRequest>, variables: Variables) -> Self {
		let identifier = RequestIdentifier::new(format!("{}{}", node.cache_id, variables.to_stable_json()));
		Self {
			identifier,
			node,
			variables,
		}
	}

	pub fn identifier(&self) -> &RequestIdentifier {
		&self.identifier
	}

	pub fn node(&self) -> &Arc<ConcreteRequest> {
		&self.node
	}

	pub fn variables(&self) -> &Variables {
		&self.variables
	}
}

impl PartialEq for RequestDescriptor {
	fn eq(&self, other: &Self) -> bool {
		self.identifier == other.identifier
	}
}

impl Eq for RequestDescriptor {}

/// Root record, fragment, variables and owning request of one read.
#[derive(Debug, Clone)]
pub struct SingularReaderSelector {
	pub data_id: DataId,
	pub node: Arc<ReaderFragment>,
	pub variables: Variables,
	pub owner: RequestDescriptor,
}

impl SingularReaderSelector {
	pub fn new(data_id: DataId, node: Arc<ReaderFragment>, variables: Variables, owner: RequestDescriptor) -> Self {
		Self {
			data_id,
			node,
			variables,
			owner,
		}
	}
}

/// Compares the fragment by identity, not structure.
impl PartialEq for SingularReaderSelector {
	fn eq(&self, other: &Self) -> bool {
		self.data_id == other.data_id
			&& Arc::ptr_eq(&self.node, &other.node)
			&& self.variables == other.variables
			&& self.owner.identifier() == other.owner.identifier()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluralReaderSelector {
	pub selectors: Vec<SingularReaderSelector>,
}

/// Root of the data an operation writes, used to check and retain it.
#[derive(Debug, Clone)]
pub struct NormalizationSelector {
	pub data_id: DataId,
	pub node: Arc<ReaderFragment>,
	pub variables: Variables,
}

/// An operation ready to execute: request descriptor plus its root selectors.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
	pub request: RequestDescriptor,
	pub fragment: SingularReaderSelector,
	pub root: NormalizationSelector,
}

impl OperationDescriptor {
	/// Binds `request` to `variables`, keeping only declared variables and
	/// filling declared defaults.
	pub fn new(request: Arc<ConcreteRequest>, variables: &Variables) -> Self {
		let operation_variables: Variables = request
			.variable_definitions
			.iter()
			.filter_map(|def| {
				let value = variables.get(&def.name).cloned().or_else(|| def.default.clone())?;
				Some((def.name.to_string(), value))
			})
			.collect();
		let fragment = request.fragment.clone();
		let descriptor = RequestDescriptor::new(request, operation_variables.clone());
		Self {
			fragment: SingularReaderSelector::new(
				DataId::root(),
				fragment.clone(),
				operation_variables.clone(),
				descriptor.clone(),
			),
			root: NormalizationSelector {
				data_id: DataId::root(),
				node: fragment,
				variables: operation_variables,
			},
			request: descriptor,
		}
	}

	pub fn identifier(&self) -> &RequestIdentifier {
		self.request.identifier()
	}
}

impl PartialEq for OperationDescriptor {
	fn eq(&self, other: &Self) -> bool {
		self.request == other.request
	}
}

/// Variables a fragment reads with: its declared arguments resolved from the
/// spread's argument values, then local defaults or the root variables.
pub fn get_fragment_variables(
	fragment: &ReaderFragment,
	root_variables: &Variables,
	argument_variables: &Variables,
) -> Variables {
	let mut variables = Variables::new();
	for def in &fragment.argument_definitions {
		if argument_variables.contains(def.name()) {
			continue;
		}
		match def {
			ArgumentDefinition::Local { name, default } => {
				variables.insert(&**name, default.clone().unwrap_or(serde_json::Value::Null));
			}
			ArgumentDefinition::Root { name } => {
				if let Some(value) = root_variables.get(name) {
					variables.insert(&**name, value.clone());
				}
			}
		}
	}
	for (name, value) in argument_variables.iter() {
		variables.insert(name, value.clone());
	}
	variables
}

/// Builds the selector for `fragment` from a fragment reference left by a
/// parent read. `None` when `item` does not carry a reference to it.
pub fn get_selector(fragment: &Arc<ReaderFragment>, item: &Data) -> Option<SingularReaderSelector> {
	let refs = item.as_object()?.fragments.as_ref()?;
	let arguments = refs.fragments.get(&*fragment.name)?;
	let variables = get_fragment_variables(fragment, refs.owner.variables(), arguments);
	Some(SingularReaderSelector::new(
		refs.id.clone(),
		fragment.clone(),
		variables,
		refs.owner.clone(),
	))
}

/// Plural form of [`get_selector`]; null items are skipped.
pub fn get_plural_selector(fragment: &Arc<ReaderFragment>, items: &Data) -> Option<PluralReaderSelector> {
	let selectors = items
		.as_list()?
		.iter()
		.filter(|item| !item.is_null())
		.map(|item| get_selector(fragment, item))
		.collect::<Option<Vec<_>>>()?;
	Some(PluralReaderSelector { selectors })
}

#[cfg(test)]
mod tests {
	use indexmap::IndexMap;
	use serde_json::json;

	use super::*;
	use crate::data::{DataObject, FragmentRefs};
	use crate::selection::Selection;

	fn request() -> Arc<ConcreteRequest> {
		Arc::new(
			ConcreteRequest::query("UserQuery", vec![Selection::scalar("id")])
				.variable("id", None)
				.variable("size", Some(json!(32))),
		)
	}

	#[test]
	fn test_operation_keeps_declared_variables() {
		let vars = Variables::new().with("id", json!("4")).with("extra", json!(1));
		let op = OperationDescriptor::new(request(), &vars);
		assert_eq!(op.request.variables().get("extra"), None);
		assert_eq!(op.request.variables().get("size"), Some(&json!(32)));
		assert_eq!(op.identifier().as_str(), r#"UserQuery{"id":"4","size":32}"#);
	}

	#[test]
	fn test_selector_equality_uses_fragment_identity() {
		let op = OperationDescriptor::new(request(), &Variables::new());
		let same = op.fragment.clone();
		let mut cloned_node = op.fragment.clone();
		cloned_node.node = Arc::new((*op.fragment.node).clone());
		assert_eq!(op.fragment, same);
		assert_ne!(op.fragment, cloned_node);
	}

	#[test]
	fn test_fragment_variables() {
		let fragment = ReaderFragment::new("Avatar", "User", vec![])
			.local_arg("scale", Some(json!(1)))
			.local_arg("size", None)
			.root_arg("theme");
		let root = Variables::new().with("theme", json!("dark"));
		let args = Variables::new().with("size", json!(64));
		let vars = get_fragment_variables(&fragment, &root, &args);
		assert_eq!(vars.get("scale"), Some(&json!(1)));
		assert_eq!(vars.get("size"), Some(&json!(64)));
		assert_eq!(vars.get("theme"), Some(&json!("dark")));
	}

	#[test]
	fn test_get_selector_from_fragment_refs() {
		let op = OperationDescriptor::new(request(), &Variables::new().with("id", json!("4")));
		let fragment = Arc::new(ReaderFragment::new("UserName", "User", vec![Selection::scalar("name")]));
		let item = Data::from(DataObject {
			fields: IndexMap::new(),
			fragments: Some(FragmentRefs {
				id: DataId::from("4"),
				fragments: IndexMap::from_iter([(fragment.name.clone(), Variables::new())]),
				owner: op.request.clone(),
			}),
		});
		let selector = get_selector(&fragment, &item).unwrap();
		assert_eq!(selector.data_id, DataId::from("4"));
		assert_eq!(selector.owner, op.request);

		let other = Arc::new(ReaderFragment::new("Other", "User", vec![]));
		assert!(get_selector(&other, &item).is_none());

		let list = Data::List(vec![item, Data::Null].into());
		assert_eq!(get_plural_selector(&fragment, &list).unwrap().selectors.len(), 1);
	}
}
