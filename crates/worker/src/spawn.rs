use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::JobClass;

static FALLBACK: OnceLock<Option<Runtime>> = OnceLock::new();

/// The caller's runtime, or a single-worker runtime owned by this crate when
/// called from outside one.
fn handle() -> Option<Handle> {
	if let Ok(handle) = Handle::try_current() {
		return Some(handle);
	}
	let runtime = FALLBACK.get_or_init(|| {
		Builder::new_multi_thread()
			.worker_threads(1)
			.thread_name("tessera-worker")
			.enable_time()
			.build()
			.inspect_err(|error| tracing::error!(%error, "worker.runtime_failed"))
			.ok()
	});
	runtime.as_ref().map(|runtime| runtime.handle().clone())
}

/// Spawns `fut` tagged with `class`.
///
/// Returns `None` when no runtime is available; the future is dropped.
pub fn spawn<F>(class: JobClass, fut: F) -> Option<JoinHandle<F::Output>>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(job_class = class.as_str(), "worker.spawn");
	handle().map(|handle| handle.spawn(fut))
}
