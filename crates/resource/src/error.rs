//! Error types for fetches, result caches and configuration.

use tessera_primitives::FieldError;
use thiserror::Error;

/// Failure reported by a fetch stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
	#[error("network request failed: {0}")]
	Network(String),

	#[error("server returned errors: {}", .0.join("; "))]
	Server(Vec<String>),

	#[error("request was cancelled")]
	Cancelled,
}

/// Error surfaced by a result cache read.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
	#[error(transparent)]
	Fetch(#[from] FetchError),

	/// An entry expected to exist after preparing a query was gone.
	#[error("expected a cached result for `{key}`")]
	MissingCacheEntry { key: String },

	/// The key passed to a fragment read does not reference the fragment.
	#[error("expected an object where `...{fragment}` was spread, but no fragment reference was found")]
	MissingFragmentRef { fragment: String },

	/// A read raised errors that must fail the render.
	#[error("fragment `{fragment}` raised fatal field errors: {}", describe(.errors))]
	FieldErrors { fragment: String, errors: Vec<FieldError> },

	#[error("invariant violated: {0}")]
	Invariant(String),
}

fn describe(errors: &[FieldError]) -> String {
	errors.iter().map(FieldError::message).collect::<Vec<_>>().join("; ")
}

/// Errors raised while loading cache configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid cache configuration: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("`{0}` must be greater than zero")]
	Zero(&'static str),
}

pub type Result<T> = std::result::Result<T, ResourceError>;
