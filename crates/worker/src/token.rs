use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Shared counter handing out increasing ids, starting at 1.
///
/// Timers order same-deadline jobs by the id their handle was issued.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	last: Arc<AtomicU64>,
}

impl GenerationClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&self) -> u64 {
		self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

/// Cancellation flag tagged with the id it was issued under.
///
/// Clones observe the same flag. Cancelling twice is a no-op.
#[derive(Debug, Clone)]
pub struct CancelToken {
	generation: u64,
	flag: CancellationToken,
}

impl CancelToken {
	pub fn new(generation: u64) -> Self {
		Self {
			generation,
			flag: CancellationToken::new(),
		}
	}

	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_cancelled(&self) -> bool {
		self.flag.is_cancelled()
	}

	pub fn cancel(&self) {
		self.flag.cancel();
	}

	pub async fn cancelled(&self) {
		self.flag.cancelled().await;
	}

	/// Drives `fut` unless the token is cancelled first, in which case the
	/// future is dropped and `None` returned.
	pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
		self.flag.run_until_cancelled(fut).await
	}
}
