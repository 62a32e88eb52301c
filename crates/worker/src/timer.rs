//! Clocks and one-shot timers for retention windows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::scheduler::Job;
use crate::token::{CancelToken, GenerationClock};
use crate::{JobClass, spawn};

/// Source of the current time.
pub trait Clock: Send + Sync {
	fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Instant {
		Instant::now()
	}
}

/// One-shot timer.
pub trait Timer: Clock {
	/// Runs `job` once `delay` has elapsed, unless the returned handle is
	/// cancelled first.
	fn schedule_after(&self, delay: Duration, job: Job) -> TimerHandle;
}

/// Cancellation handle for a scheduled timer job.
///
/// Dropping the handle does not cancel the job.
#[derive(Debug, Clone)]
pub struct TimerHandle {
	token: CancelToken,
}

impl TimerHandle {
	/// Prevents the job from running if it has not run yet.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Returns the timer's generation ID.
	pub fn generation(&self) -> u64 {
		self.token.generation()
	}
}

/// Timer backed by `tokio::time::sleep`.
///
/// Reports time through tokio's clock so paused-time tests stay coherent.
#[derive(Debug, Default, Clone)]
pub struct TokioTimer {
	generations: GenerationClock,
}

impl TokioTimer {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Clock for TokioTimer {
	fn now(&self) -> Instant {
		tokio::time::Instant::now().into_std()
	}
}

impl Timer for TokioTimer {
	fn schedule_after(&self, delay: Duration, job: Job) -> TimerHandle {
		let token = CancelToken::new(self.generations.next());
		let task_token = token.clone();
		spawn(JobClass::Release, async move {
			if task_token.run_until_cancelled(tokio::time::sleep(delay)).await.is_some() {
				job();
			}
		});
		TimerHandle { token }
	}
}

struct PendingTimer {
	due: Duration,
	token: CancelToken,
	job: Job,
}

struct ManualTimerState {
	origin: Instant,
	elapsed: Duration,
	pending: Vec<PendingTimer>,
}

/// Virtual clock and timer advanced by hand.
#[derive(Clone)]
pub struct ManualTimer {
	state: Arc<Mutex<ManualTimerState>>,
	generations: GenerationClock,
}

impl Default for ManualTimer {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ManualTimer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("ManualTimer")
			.field("elapsed", &state.elapsed)
			.field("pending", &state.pending.len())
			.finish()
	}
}

impl ManualTimer {
	pub fn new() -> Self {
		Self {
			state: Arc::new(Mutex::new(ManualTimerState {
				origin: Instant::now(),
				elapsed: Duration::ZERO,
				pending: Vec::new(),
			})),
			generations: GenerationClock::new(),
		}
	}

	/// Returns the number of armed, uncancelled jobs.
	pub fn pending(&self) -> usize {
		self.state.lock().pending.iter().filter(|p| !p.token.is_cancelled()).count()
	}

	/// Moves the clock forward by `by`, running every job that falls due in
	/// due-time order (ties in scheduling order).
	///
	/// Jobs scheduled by running jobs also run if they fall inside the window.
	/// Returns the number of jobs run.
	pub fn advance(&self, by: Duration) -> usize {
		let target = self.state.lock().elapsed + by;
		let mut ran = 0;
		loop {
			let next = {
				let mut state = self.state.lock();
				state.pending.retain(|p| !p.token.is_cancelled());
				let due = state
					.pending
					.iter()
					.enumerate()
					.filter(|(_, p)| p.due <= target)
					.min_by_key(|(_, p)| (p.due, p.token.generation()))
					.map(|(idx, _)| idx);
				match due {
					Some(idx) => {
						let timer = state.pending.remove(idx);
						state.elapsed = state.elapsed.max(timer.due);
						Some(timer.job)
					}
					None => {
						state.elapsed = target;
						None
					}
				}
			};
			let Some(job) = next else { break };
			job();
			ran += 1;
		}
		ran
	}
}

impl Clock for ManualTimer {
	fn now(&self) -> Instant {
		let state = self.state.lock();
		state.origin + state.elapsed
	}
}

impl Timer for ManualTimer {
	fn schedule_after(&self, delay: Duration, job: Job) -> TimerHandle {
		let token = CancelToken::new(self.generations.next());
		let mut state = self.state.lock();
		let due = state.elapsed + delay;
		state.pending.push(PendingTimer {
			due,
			token: token.clone(),
			job,
		});
		tracing::trace!(delay_ms = delay.as_millis() as u64, pending = state.pending.len(), "worker.timer.schedule");
		TimerHandle { token }
	}
}
