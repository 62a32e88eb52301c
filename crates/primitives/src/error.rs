//! Error types for record source snapshots and selector resolution.

use thiserror::Error;

/// Errors raised while loading a record source from its JSON form.
#[derive(Debug, Error)]
pub enum SourceError {
	/// The snapshot or one of its records is not a JSON object.
	#[error("expected a JSON object for {what}, got {found}")]
	NotAnObject { what: String, found: String },

	/// A record is missing its type tag.
	#[error("record `{id}` has no `__typename`")]
	MissingTypename { id: String },

	/// The record's `__id` disagrees with the key it is stored under.
	#[error("record stored under `{key}` declares id `{id}`")]
	IdMismatch { key: String, id: String },

	/// A reserved field has the wrong shape.
	#[error("field `{field}` on record `{id}` is malformed: {reason}")]
	MalformedField { id: String, field: String, reason: &'static str },

	/// The snapshot text is not valid JSON.
	#[error("invalid record source JSON: {0}")]
	Json(#[from] serde_json::Error),
}

/// Result type for record source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
