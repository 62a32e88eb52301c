//! Shared test setup: an app query spreading a user fragment.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tessera_primitives::{
	ConcreteRequest, OperationDescriptor, ROOT_ID, ROOT_TYPE, ReaderFragment, Record, RecordMap, Selection, Variables,
};
use tessera_store::{Store, StoreOptions};
use tessera_worker::ManualTimer;

use crate::environment::Environment;
use crate::fetch::{FetchObserver, FetchStream, ResponsePayload};

pub(crate) struct App {
	pub user: Arc<ReaderFragment>,
	pub query: Arc<ConcreteRequest>,
	pub operation: OperationDescriptor,
}

/// `AppQuery { me { id ...UserFragment } }` with
/// `UserFragment on User { id name }`.
pub(crate) fn app() -> App {
	let user = Arc::new(ReaderFragment::new(
		"UserFragment",
		"User",
		vec![Selection::scalar("id"), Selection::scalar("name")],
	));
	let query = Arc::new(ConcreteRequest::query(
		"AppQuery",
		vec![Selection::linked(
			"me",
			vec![Selection::scalar("id"), Selection::spread(user.clone(), Vec::new())],
		)],
	));
	let operation = OperationDescriptor::new(query.clone(), &Variables::new());
	App { user, query, operation }
}

pub(crate) fn user(id: &str, name: &str) -> Record {
	Record::new(id, "User").with_value("id", json!(id)).with_value("name", json!(name))
}

pub(crate) fn me_records(name: &str) -> RecordMap {
	[Record::new(ROOT_ID, ROOT_TYPE).with_link("me", "4"), user("4", name)]
		.into_iter()
		.collect()
}

pub(crate) fn me_payload(name: &str) -> ResponsePayload {
	ResponsePayload::new(me_records(name))
}

pub(crate) fn environment(records: RecordMap) -> (Environment, ManualTimer) {
	let timer = ManualTimer::new();
	let store = Store::with_options(
		records,
		StoreOptions {
			clock: Arc::new(timer.clone()),
			..StoreOptions::default()
		},
	);
	let environment = Environment::builder(store).timer(Arc::new(timer.clone())).build();
	(environment, timer)
}

/// Counts how often the wrapped stream is subscribed.
pub(crate) struct Counted {
	count: Arc<AtomicUsize>,
	inner: Box<dyn FetchStream>,
}

impl FetchStream for Counted {
	fn subscribe(self: Box<Self>, observer: FetchObserver) {
		self.count.fetch_add(1, Ordering::SeqCst);
		self.inner.subscribe(observer);
	}
}

pub(crate) struct FetchCounter(Arc<AtomicUsize>);

impl FetchCounter {
	pub fn new() -> Self {
		Self(Arc::new(AtomicUsize::new(0)))
	}

	pub fn wrap(&self, inner: impl FetchStream + 'static) -> Box<dyn FetchStream> {
		Box::new(Counted {
			count: self.0.clone(),
			inner: Box::new(inner),
		})
	}

	pub fn count(&self) -> usize {
		self.0.load(Ordering::SeqCst)
	}
}
