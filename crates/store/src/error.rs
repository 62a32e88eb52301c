use thiserror::Error;

/// Store invariant violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
	#[error("an optimistic snapshot is already active")]
	SnapshotActive,

	#[error("restore called without an active optimistic snapshot")]
	NoSnapshot,
}

pub type Result<T> = std::result::Result<T, StoreError>;
