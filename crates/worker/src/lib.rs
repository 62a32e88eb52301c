//! Scheduling, timer and cancellation primitives shared by the tessera cache.
//!
//! * [`Scheduler`]: runs garbage collection steps at a later point
//! * [`Timer`] / [`Clock`]: retention windows and release-buffer grace periods
//! * [`CancelToken`]: cancellation for timers and network subscriptions

mod class;
pub mod scheduler;
mod spawn;
pub mod timer;
mod token;

pub use class::JobClass;
pub use scheduler::{ImmediateScheduler, Job, ManualScheduler, Scheduler, TokioScheduler};
pub use spawn::spawn;
pub use timer::{Clock, ManualTimer, SystemClock, Timer, TimerHandle, TokioTimer};
pub use token::{CancelToken, GenerationClock};
