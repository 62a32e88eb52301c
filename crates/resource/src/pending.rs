//! Awaitable handles for fetches that have not settled yet.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

/// Resolves once the fetch it was created for delivers its first result,
/// fails, completes or is abandoned.
///
/// Clones share one underlying future, so any number of readers can wait on
/// the same fetch and retry their read afterwards.
#[derive(Clone)]
pub struct PendingFetch {
	label: Arc<str>,
	future: Shared<BoxFuture<'static, ()>>,
	flags: Arc<[Arc<AtomicBool>]>,
}

/// Completion side of a [`PendingFetch`]. Dropping it resolves the fetch.
pub struct PendingResolver {
	tx: Option<oneshot::Sender<()>>,
	resolved: Arc<AtomicBool>,
}

/// Creates a linked pending fetch and resolver.
pub fn pending_fetch(label: impl Into<Arc<str>>) -> (PendingFetch, PendingResolver) {
	let (tx, rx) = oneshot::channel();
	let resolved = Arc::new(AtomicBool::new(false));
	let pending = PendingFetch {
		label: label.into(),
		future: rx.map(|_| ()).boxed().shared(),
		flags: Arc::from([resolved.clone()]),
	};
	(
		pending,
		PendingResolver {
			tx: Some(tx),
			resolved,
		},
	)
}

impl PendingFetch {
	/// Pending fetch settling once every one of `fetches` has.
	pub fn all(label: impl Into<Arc<str>>, fetches: Vec<PendingFetch>) -> Self {
		let flags: Vec<_> = fetches.iter().flat_map(|fetch| fetch.flags.iter().cloned()).collect();
		Self {
			label: label.into(),
			future: futures::future::join_all(fetches).map(|_| ()).boxed().shared(),
			flags: flags.into(),
		}
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	/// Returns true once the fetch settled; awaiting it then completes
	/// immediately.
	pub fn is_resolved(&self) -> bool {
		self.flags.iter().all(|flag| flag.load(Ordering::Acquire))
	}
}

impl Future for PendingFetch {
	type Output = ();

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		self.future.poll_unpin(cx)
	}
}

impl fmt::Debug for PendingFetch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingFetch")
			.field("label", &self.label)
			.field("resolved", &self.is_resolved())
			.finish()
	}
}

impl PendingResolver {
	/// Resolves now rather than at drop.
	pub fn resolve(self) {
		drop(self);
	}
}

impl Drop for PendingResolver {
	fn drop(&mut self) {
		self.resolved.store(true, Ordering::Release);
		if let Some(tx) = self.tx.take() {
			let _ = tx.send(());
		}
	}
}

impl fmt::Debug for PendingResolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingResolver").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_resolve_wakes_every_clone() {
		let (pending, resolver) = pending_fetch("Query");
		let other = pending.clone();
		assert!(!pending.is_resolved());
		let waiter = tokio::spawn(other);
		resolver.resolve();
		waiter.await.unwrap();
		assert!(pending.is_resolved());
		pending.await;
	}

	#[tokio::test]
	async fn test_dropping_resolver_resolves() {
		let (pending, resolver) = pending_fetch("Query");
		drop(resolver);
		assert!(pending.is_resolved());
		pending.await;
	}

	#[test]
	fn test_all_waits_for_every_part() {
		let (a, resolve_a) = pending_fetch("A");
		let (b, resolve_b) = pending_fetch("B");
		let both = PendingFetch::all("A+B", vec![a, b]);
		resolve_a.resolve();
		assert!(!both.is_resolved());
		resolve_b.resolve();
		assert!(both.is_resolved());
		assert_eq!(both.label(), "A+B");
	}
}
