use std::time::{Duration, Instant};

/// Whether an operation can be served from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAvailability {
	/// Everything the operation selects is present and fresh.
	Available { fetch_time: Option<Instant> },
	/// Present (or partially present) but invalidated or expired.
	Stale,
	Missing,
}

impl OperationAvailability {
	pub fn is_available(&self) -> bool {
		matches!(self, Self::Available { .. })
	}
}

/// Combines the traversal result with the root's write bookkeeping.
pub(crate) fn availability(
	missing: bool,
	most_recent_invalidation: Option<u64>,
	last_written_at: Option<u64>,
	fetch_time: Option<Instant>,
	expiration: Option<Duration>,
	now: Instant,
) -> OperationAvailability {
	if let Some(invalidated_at) = most_recent_invalidation
		&& last_written_at.is_none_or(|written| invalidated_at > written)
	{
		return OperationAvailability::Stale;
	}
	if missing {
		return OperationAvailability::Missing;
	}
	if is_expired(fetch_time, expiration, now) {
		return OperationAvailability::Stale;
	}
	OperationAvailability::Available { fetch_time }
}

/// True when `fetch_time` is at least `expiration` old.
pub(crate) fn is_expired(fetch_time: Option<Instant>, expiration: Option<Duration>, now: Instant) -> bool {
	match (fetch_time, expiration) {
		(Some(fetched), Some(expiration)) => now.saturating_duration_since(fetched) >= expiration,
		_ => false,
	}
}
