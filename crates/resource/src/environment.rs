//! The store plus everything result caches need around it.

use std::fmt;
use std::sync::Arc;

use tessera_primitives::{OperationDescriptor, SingularReaderSelector, Snapshot};
use tessera_store::{Disposable, OperationAvailability, Store};
use tessera_worker::{Timer, TokioTimer};

use crate::fetch::{FetchEvent, FetchObserver, FetchStream, ResponsePayload};
use crate::operation_tracker::{DefaultOperationTracker, OperationTracker};
use crate::policy::RenderPolicy;

struct EnvironmentInner {
	store: Store,
	tracker: Arc<dyn OperationTracker>,
	timer: Arc<dyn Timer>,
	is_server: bool,
	render_policy: RenderPolicy,
}

/// Shared handle bundling a [`Store`] with its operation tracker, timer and
/// render defaults.
#[derive(Clone)]
pub struct Environment {
	inner: Arc<EnvironmentInner>,
}

pub struct EnvironmentBuilder {
	store: Store,
	tracker: Option<Arc<dyn OperationTracker>>,
	timer: Option<Arc<dyn Timer>>,
	is_server: bool,
	render_policy: RenderPolicy,
}

impl EnvironmentBuilder {
	pub fn tracker(mut self, tracker: Arc<dyn OperationTracker>) -> Self {
		self.tracker = Some(tracker);
		self
	}

	pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
		self.timer = Some(timer);
		self
	}

	/// Server environments never retain query results temporarily.
	pub fn server(mut self, is_server: bool) -> Self {
		self.is_server = is_server;
		self
	}

	pub fn render_policy(mut self, policy: RenderPolicy) -> Self {
		self.render_policy = policy;
		self
	}

	pub fn build(self) -> Environment {
		Environment {
			inner: Arc::new(EnvironmentInner {
				store: self.store,
				tracker: self.tracker.unwrap_or_else(|| Arc::new(DefaultOperationTracker::new())),
				timer: self.timer.unwrap_or_else(|| Arc::new(TokioTimer::new())),
				is_server: self.is_server,
				render_policy: self.render_policy,
			}),
		}
	}
}

impl Environment {
	pub fn new(store: Store) -> Self {
		Self::builder(store).build()
	}

	pub fn builder(store: Store) -> EnvironmentBuilder {
		EnvironmentBuilder {
			store,
			tracker: None,
			timer: None,
			is_server: false,
			render_policy: RenderPolicy::default(),
		}
	}

	pub fn store(&self) -> &Store {
		&self.inner.store
	}

	pub fn tracker(&self) -> &Arc<dyn OperationTracker> {
		&self.inner.tracker
	}

	pub fn timer(&self) -> &Arc<dyn Timer> {
		&self.inner.timer
	}

	pub fn is_server(&self) -> bool {
		self.inner.is_server
	}

	pub fn default_render_policy(&self) -> RenderPolicy {
		self.inner.render_policy
	}

	pub fn lookup(&self, selector: &SingularReaderSelector) -> Snapshot {
		self.inner.store.lookup(selector)
	}

	pub fn check(&self, operation: &OperationDescriptor) -> OperationAvailability {
		self.inner.store.check(operation)
	}

	pub fn retain(&self, operation: &OperationDescriptor) -> Disposable {
		self.inner.store.retain(operation)
	}

	pub fn subscribe(&self, snapshot: Snapshot, callback: impl Fn(&Snapshot) + Send + Sync + 'static) -> Disposable {
		self.inner.store.subscribe(snapshot, callback)
	}

	/// Publishes `payload` as a response to `operation` and notifies
	/// subscribers, recording affected owners with the tracker.
	pub fn commit_payload(&self, operation: &OperationDescriptor, payload: &ResponsePayload) {
		let store = &self.inner.store;
		store.publish(payload.records.clone(), payload.invalidated_ids.iter().cloned());
		let owners = store.notify(Some(operation), false);
		self.inner.tracker.update(&operation.request, &owners);
	}

	/// Wraps a network stream so each payload is committed to the store
	/// before observers see it, and the operation is tracked while in flight.
	pub fn execute(&self, operation: &OperationDescriptor, network: Box<dyn FetchStream>) -> Box<dyn FetchStream> {
		Box::new(Execution {
			environment: self.clone(),
			operation: operation.clone(),
			network,
		})
	}
}

impl fmt::Debug for Environment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Environment")
			.field("store", &self.inner.store)
			.field("is_server", &self.inner.is_server)
			.field("render_policy", &self.inner.render_policy)
			.finish_non_exhaustive()
	}
}

struct Execution {
	environment: Environment,
	operation: OperationDescriptor,
	network: Box<dyn FetchStream>,
}

impl FetchStream for Execution {
	fn subscribe(self: Box<Self>, mut observer: FetchObserver) {
		let Execution {
			environment,
			operation,
			network,
		} = *self;
		network.subscribe(Box::new(move |event: FetchEvent| {
			match &event {
				FetchEvent::Start(_) => environment.tracker().start(&operation.request),
				FetchEvent::Next(payload) => environment.commit_payload(&operation, payload),
				FetchEvent::Error(error) => {
					tracing::debug!(operation = %operation.identifier(), %error, "environment.fetch_error");
				}
				FetchEvent::Complete => {}
			}
			let terminal = event.is_terminal();
			observer(event);
			if terminal {
				environment.tracker().complete(&operation.request);
			}
		}));
	}
}
