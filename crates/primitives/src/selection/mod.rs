//! Compiled selection trees.
//!
//! These are produced by an external compiler and consumed as-is; the builder
//! methods exist so hosts and tests can assemble trees by hand.

use std::sync::Arc;

use serde_json::Value;

use crate::storage_key::format_storage_key;
use crate::variables::Variables;


/// A field argument, either inline or bound to a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
	Literal { name: Arc<str>, value: Value },
	Variable { name: Arc<str>, variable: Arc<str> },
}

impl Argument {
	pub fn literal(name: impl Into<Arc<str>>, value: Value) -> Self {
		Self::Literal {
			name: name.into(),
			value,
		}
	}

	pub fn variable(name: impl Into<Arc<str>>, variable: impl Into<Arc<str>>) -> Self {
		Self::Variable {
			name: name.into(),
			variable: variable.into(),
		}
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Literal { name, .. } | Self::Variable { name, .. } => name,
		}
	}

	/// Resolves the argument value; unbound variables resolve to null.
	pub fn resolve(&self, variables: &Variables) -> Value {
		match self {
			Self::Literal { value, .. } => value.clone(),
			Self::Variable { variable, .. } => variables.get(variable).cloned().unwrap_or(Value::Null),
		}
	}
}

/// Resolves a list of arguments into a variables map.
pub fn argument_values(args: &[Argument], variables: &Variables) -> Variables {
	args.iter().map(|arg| (arg.name(), arg.resolve(variables))).collect()
}

fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
	if args.is_empty() {
		return name.to_owned();
	}
	let resolved: Vec<(&str, Value)> = args.iter().map(|arg| (arg.name(), arg.resolve(variables))).collect();
	format_storage_key(name, resolved.iter().map(|(name, value)| (*name, value)))
}

/// Reaction to a `@required` field that turns out to be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredAction {
	Throw,
	Log,
}

/// Target of a `@catch` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchTo {
	Null,
	Result,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
	pub name: Arc<str>,
	pub alias: Option<Arc<str>>,
	pub args: Vec<Argument>,
	pub required: Option<RequiredAction>,
	pub catch: Option<CatchTo>,
}

impl ScalarField {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self {
			name: name.into(),
			alias: None,
			args: Vec::new(),
			required: None,
			catch: None,
		}
	}

	pub fn alias(mut self, alias: impl Into<Arc<str>>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	pub fn arg(mut self, arg: Argument) -> Self {
		self.args.push(arg);
		self
	}

	pub fn required(mut self, action: RequiredAction) -> Self {
		self.required = Some(action);
		self
	}

	pub fn catch(mut self, to: CatchTo) -> Self {
		self.catch = Some(to);
		self
	}

	pub fn response_key(&self) -> &Arc<str> {
		self.alias.as_ref().unwrap_or(&self.name)
	}

	pub fn storage_key(&self, variables: &Variables) -> String {
		storage_key(&self.name, &self.args, variables)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedField {
	pub name: Arc<str>,
	pub alias: Option<Arc<str>>,
	pub args: Vec<Argument>,
	pub required: Option<RequiredAction>,
	pub catch: Option<CatchTo>,
	pub plural: bool,
	/// Set when the field's type is concrete rather than abstract.
	pub concrete_type: Option<Arc<str>>,
	pub selections: Vec<Selection>,
}

impl LinkedField {
	pub fn new(name: impl Into<Arc<str>>, selections: Vec<Selection>) -> Self {
		Self {
			name: name.into(),
			alias: None,
			args: Vec::new(),
			required: None,
			catch: None,
			plural: false,
			concrete_type: None,
			selections,
		}
	}

	pub fn plural(mut self) -> Self {
		self.plural = true;
		self
	}

	pub fn alias(mut self, alias: impl Into<Arc<str>>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	pub fn arg(mut self, arg: Argument) -> Self {
		self.args.push(arg);
		self
	}

	pub fn required(mut self, action: RequiredAction) -> Self {
		self.required = Some(action);
		self
	}

	pub fn catch(mut self, to: CatchTo) -> Self {
		self.catch = Some(to);
		self
	}

	pub fn concrete_type(mut self, typename: impl Into<Arc<str>>) -> Self {
		self.concrete_type = Some(typename.into());
		self
	}

	pub fn response_key(&self) -> &Arc<str> {
		self.alias.as_ref().unwrap_or(&self.name)
	}

	pub fn storage_key(&self, variables: &Variables) -> String {
		storage_key(&self.name, &self.args, variables)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
	pub type_condition: Option<Arc<str>>,
	pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
	pub fragment: Arc<ReaderFragment>,
	pub args: Vec<Argument>,
}

/// `@include` / `@skip` guard on a boolean variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
	pub variable: Arc<str>,
	pub passing_value: bool,
	pub selections: Vec<Selection>,
}

impl Condition {
	/// True when the guarded selections should be read. Unbound or
	/// non-boolean variables read as false.
	pub fn passes(&self, variables: &Variables) -> bool {
		variables.get(&self.variable).and_then(Value::as_bool).unwrap_or(false) == self.passing_value
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
	Scalar(ScalarField),
	Linked(LinkedField),
	InlineFragment(InlineFragment),
	FragmentSpread(FragmentSpread),
	Condition(Condition),
}

impl Selection {
	pub fn scalar(name: impl Into<Arc<str>>) -> Self {
		Self::Scalar(ScalarField::new(name))
	}

	pub fn linked(name: impl Into<Arc<str>>, selections: Vec<Selection>) -> Self {
		Self::Linked(LinkedField::new(name, selections))
	}

	pub fn inline(type_condition: Option<&str>, selections: Vec<Selection>) -> Self {
		Self::InlineFragment(InlineFragment {
			type_condition: type_condition.map(Arc::from),
			selections,
		})
	}

	pub fn spread(fragment: Arc<ReaderFragment>, args: Vec<Argument>) -> Self {
		Self::FragmentSpread(FragmentSpread { fragment, args })
	}

	pub fn include_if(variable: impl Into<Arc<str>>, selections: Vec<Selection>) -> Self {
		Self::Condition(Condition {
			variable: variable.into(),
			passing_value: true,
			selections,
		})
	}

	pub fn skip_if(variable: impl Into<Arc<str>>, selections: Vec<Selection>) -> Self {
		Self::Condition(Condition {
			variable: variable.into(),
			passing_value: false,
			selections,
		})
	}
}

impl From<ScalarField> for Selection {
	fn from(field: ScalarField) -> Self {
		Self::Scalar(field)
	}
}

impl From<LinkedField> for Selection {
	fn from(field: LinkedField) -> Self {
		Self::Linked(field)
	}
}

/// Declared fragment argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentDefinition {
	/// Fragment-local argument with an optional default.
	Local { name: Arc<str>, default: Option<Value> },
	/// Argument taken from the root operation's variables.
	Root { name: Arc<str> },
}

impl ArgumentDefinition {
	pub fn name(&self) -> &str {
		match self {
			Self::Local { name, .. } | Self::Root { name } => name,
		}
	}
}

/// A named selection over one type; the unit of reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderFragment {
	pub name: Arc<str>,
	pub type_condition: Arc<str>,
	pub plural: bool,
	pub argument_definitions: Vec<ArgumentDefinition>,
	pub selections: Vec<Selection>,
	/// Payload errors on fields of this fragment are fatal unless caught.
	pub throw_on_field_error: bool,
}

impl ReaderFragment {
	pub fn new(name: impl Into<Arc<str>>, type_condition: impl Into<Arc<str>>, selections: Vec<Selection>) -> Self {
		Self {
			name: name.into(),
			type_condition: type_condition.into(),
			plural: false,
			argument_definitions: Vec::new(),
			selections,
			throw_on_field_error: false,
		}
	}

	pub fn plural(mut self) -> Self {
		self.plural = true;
		self
	}

	pub fn local_arg(mut self, name: impl Into<Arc<str>>, default: Option<Value>) -> Self {
		self.argument_definitions.push(ArgumentDefinition::Local {
			name: name.into(),
			default,
		});
		self
	}

	pub fn root_arg(mut self, name: impl Into<Arc<str>>) -> Self {
		self.argument_definitions.push(ArgumentDefinition::Root { name: name.into() });
		self
	}

	pub fn throw_on_field_error(mut self) -> Self {
		self.throw_on_field_error = true;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
	Query,
	Mutation,
	Subscription,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
	pub name: Arc<str>,
	pub default: Option<Value>,
}

/// A compiled operation: its root reader fragment plus request metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcreteRequest {
	pub name: Arc<str>,
	/// Stable id for the operation text; prefix of every request identifier.
	pub cache_id: Arc<str>,
	pub kind: OperationKind,
	pub variable_definitions: Vec<VariableDefinition>,
	pub fragment: Arc<ReaderFragment>,
	/// Live queries keep their network subscription open after the first
	/// payload.
	pub live: bool,
}

impl ConcreteRequest {
	/// Builds a query whose root fragment selects from the root record.
	pub fn query(name: impl Into<Arc<str>>, selections: Vec<Selection>) -> Self {
		let name: Arc<str> = name.into();
		Self {
			cache_id: name.clone(),
			fragment: Arc::new(ReaderFragment::new(name.clone(), crate::id::ROOT_TYPE, selections)),
			name,
			kind: OperationKind::Query,
			variable_definitions: Vec::new(),
			live: false,
		}
	}

	pub fn variable(mut self, name: impl Into<Arc<str>>, default: Option<Value>) -> Self {
		self.variable_definitions.push(VariableDefinition {
			name: name.into(),
			default,
		});
		self
	}

	pub fn kind(mut self, kind: OperationKind) -> Self {
		self.kind = kind;
		self
	}

	pub fn live(mut self) -> Self {
		self.live = true;
		self
	}
}
