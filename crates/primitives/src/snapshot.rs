//! Read results and per-field error reporting.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::data::Data;
use crate::id::DataId;
use crate::record::PayloadError;
use crate::selection::RequiredAction;
use crate::selector::SingularReaderSelector;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldErrorKind {
	/// A `@required` field was null.
	MissingRequired { action: RequiredAction },
	/// The server reported an error for the field.
	Payload(PayloadError),
}

/// An error raised by one field during a read.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
	pub kind: FieldErrorKind,
	/// Fragment being read when the error was raised.
	pub owner: Arc<str>,
	/// Dotted response-key path from the fragment root.
	pub path: Arc<str>,
	/// Set when an enclosing `@catch` absorbed the error.
	pub handled: bool,
	pub fatal: bool,
}

impl FieldError {
	pub fn message(&self) -> String {
		match &self.kind {
			FieldErrorKind::MissingRequired { .. } => {
				format!("missing required field `{}` in `{}`", self.path, self.owner)
			}
			FieldErrorKind::Payload(error) => {
				format!("field `{}` in `{}` has a payload error: {}", self.path, self.owner, error.message)
			}
		}
	}
}

/// Output of reading one selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
	pub data: Data,
	/// Every id the read looked up, whether or not it existed.
	pub seen_records: FxHashSet<DataId>,
	pub is_missing_data: bool,
	pub field_errors: Vec<FieldError>,
	pub selector: SingularReaderSelector,
}

impl Snapshot {
	/// Logs non-fatal field errors and returns the fatal ones, if any.
	///
	/// Errors absorbed by `@catch` are skipped entirely.
	pub fn report_field_errors(&self) -> Result<(), Vec<FieldError>> {
		let mut fatal = Vec::new();
		for error in self.field_errors.iter().filter(|error| !error.handled) {
			if error.fatal {
				fatal.push(error.clone());
			} else {
				tracing::warn!(
					fragment = &*error.owner,
					path = &*error.path,
					message = %error.message(),
					"snapshot.field_error"
				);
			}
		}
		if fatal.is_empty() { Ok(()) } else { Err(fatal) }
	}
}
