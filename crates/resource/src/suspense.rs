//! Outcome of a result cache read.

use crate::error::ResourceError;
use crate::pending::PendingFetch;

/// A read either produced a value, must wait for a fetch, or failed.
#[derive(Debug, Clone)]
pub enum Suspense<T> {
	Ready(T),
	/// Retry the read once the fetch settles.
	Pending(PendingFetch),
	Failed(ResourceError),
}

impl<T> Suspense<T> {
	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready(_))
	}

	pub fn is_pending(&self) -> bool {
		matches!(self, Self::Pending(_))
	}

	pub fn ready(self) -> Option<T> {
		match self {
			Self::Ready(value) => Some(value),
			_ => None,
		}
	}

	pub fn pending(&self) -> Option<&PendingFetch> {
		match self {
			Self::Pending(pending) => Some(pending),
			_ => None,
		}
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Suspense<U> {
		match self {
			Self::Ready(value) => Suspense::Ready(f(value)),
			Self::Pending(pending) => Suspense::Pending(pending),
			Self::Failed(error) => Suspense::Failed(error),
		}
	}

	/// Converts to a result, treating pending as `Ok(None)`.
	pub fn into_result(self) -> Result<Option<T>, ResourceError> {
		match self {
			Self::Ready(value) => Ok(Some(value)),
			Self::Pending(_) => Ok(None),
			Self::Failed(error) => Err(error),
		}
	}
}
