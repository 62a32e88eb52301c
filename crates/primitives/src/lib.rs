//! Data model shared by the tessera store and result caches: normalized
//! records, record sources, compiled selections, selectors and read results.

/// Immutable result trees and structural sharing.
pub mod data;
/// Record source errors.
pub mod error;
/// Record and request identifiers.
pub mod id;
/// Normalized records.
pub mod record;
/// Compiled selection trees.
pub mod selection;
/// Selectors and fragment variable resolution.
pub mod selector;
/// Read results.
pub mod snapshot;
/// Record sources and the optimistic overlay.
pub mod source;
/// Field storage keys.
pub mod storage_key;
/// Bound variables.
pub mod variables;

pub use data::{Data, DataObject, FragmentRefs, recycle_nodes_into};
pub use error::SourceError;
pub use id::{DataId, ROOT_ID, ROOT_TYPE, RequestIdentifier};
pub use record::{FieldValue, PayloadError, Record};
pub use selection::{
	Argument, ArgumentDefinition, CatchTo, Condition, ConcreteRequest, FragmentSpread, InlineFragment, LinkedField,
	OperationKind, ReaderFragment, RequiredAction, ScalarField, Selection, VariableDefinition,
};
pub use selector::{
	NormalizationSelector, OperationDescriptor, PluralReaderSelector, RequestDescriptor, SingularReaderSelector,
	get_fragment_variables, get_plural_selector, get_selector,
};
pub use serde_json::Value;
pub use snapshot::{FieldError, FieldErrorKind, Snapshot};
pub use source::{Lookup, MutableRecordSource, OptimisticRecordSource, RecordMap, RecordSource, RecordState, SweepProgress};
pub use storage_key::{format_storage_key, stable_stringify};
pub use variables::Variables;
