//! Job schedulers for deferred, chunked work.
//!
//! The store hands each garbage collection step to a [`Scheduler`] instead of
//! running the whole collection inline. Swapping the scheduler changes when
//! steps run without changing what they do:
//! - [`ImmediateScheduler`] runs steps on the calling thread (trampolined)
//! - [`ManualScheduler`] queues steps until a test drains them
//! - [`TokioScheduler`] yields to the runtime between steps

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{JobClass, spawn};

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs a job at some later point.
pub trait Scheduler: Send + Sync {
	/// Schedules `job`. Implementations must never run it while the caller
	/// is still inside `schedule` on a nested call chain.
	fn schedule(&self, class: JobClass, job: Job);
}

thread_local! {
	static IMMEDIATE_QUEUE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Resets the trampoline queue even if a job panics.
struct DrainGuard;

impl Drop for DrainGuard {
	fn drop(&mut self) {
		IMMEDIATE_QUEUE.with(|cell| cell.borrow_mut().take());
	}
}

/// Runs jobs on the calling thread before `schedule` returns.
///
/// Jobs scheduled from inside a running job are queued and drained by the
/// outermost call, so chained steps never grow the stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
	fn schedule(&self, class: JobClass, job: Job) {
		tracing::trace!(job_class = class.as_str(), "worker.schedule");
		let mut job = Some(job);
		let nested = IMMEDIATE_QUEUE.with(|cell| {
			let mut slot = cell.borrow_mut();
			match slot.as_mut() {
				Some(queue) => {
					queue.extend(job.take());
					true
				}
				None => {
					*slot = Some(VecDeque::new());
					false
				}
			}
		});
		if nested {
			return;
		}

		let _guard = DrainGuard;
		let mut next = job;
		while let Some(job) = next {
			job();
			next = IMMEDIATE_QUEUE.with(|cell| cell.borrow_mut().as_mut().and_then(VecDeque::pop_front));
		}
	}
}

/// Queues jobs until explicitly drained.
///
/// Deterministic stand-in for idle callbacks in tests.
#[derive(Clone, Default)]
pub struct ManualScheduler {
	queue: Arc<Mutex<VecDeque<(JobClass, Job)>>>,
}

impl std::fmt::Debug for ManualScheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManualScheduler").field("pending", &self.pending()).finish()
	}
}

impl ManualScheduler {
	/// Creates an empty scheduler.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of queued jobs.
	pub fn pending(&self) -> usize {
		self.queue.lock().len()
	}

	/// Runs the oldest queued job. Returns false when the queue was empty.
	pub fn run_next(&self) -> bool {
		let next = self.queue.lock().pop_front();
		match next {
			Some((_, job)) => {
				job();
				true
			}
			None => false,
		}
	}

	/// Runs queued jobs (including ones they enqueue) until the queue is empty.
	///
	/// Returns the number of jobs run.
	pub fn run_all(&self) -> usize {
		let mut ran = 0;
		while self.run_next() {
			ran += 1;
		}
		ran
	}
}

impl Scheduler for ManualScheduler {
	fn schedule(&self, class: JobClass, job: Job) {
		let mut queue = self.queue.lock();
		queue.push_back((class, job));
		tracing::trace!(job_class = class.as_str(), pending = queue.len(), "worker.schedule");
	}
}

/// Runs each job as its own tokio task after yielding once.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
	fn schedule(&self, class: JobClass, job: Job) {
		spawn(class, async move {
			tokio::task::yield_now().await;
			job();
		});
	}
}
