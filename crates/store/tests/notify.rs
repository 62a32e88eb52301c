use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{Value, json};
use tessera_primitives::{
	ConcreteRequest, LinkedField, OperationDescriptor, ROOT_ID, ROOT_TYPE, Record, RecordMap, Selection, Variables,
};
use tessera_store::{Disposable, Store, StoreConfig, StoreOptions};

const USERS: [&str; 3] = ["1", "2", "3"];

fn seeded() -> RecordMap {
	let mut root = Record::new(ROOT_ID, ROOT_TYPE).with_links("everyone", USERS.map(Some));
	for id in USERS {
		root.set_link(format!("user{id}"), id);
	}
	std::iter::once(root)
		.chain(USERS.map(|id| {
			Record::new(id, "User")
				.with_value("name", json!(format!("user-{id}")))
				.with_link("best_friend", "1")
		}))
		.collect()
}

fn operations() -> Vec<OperationDescriptor> {
	let person = || vec![Selection::scalar("name"), Selection::linked("best_friend", vec![Selection::scalar("name")])];
	let mut requests: Vec<ConcreteRequest> = USERS
		.iter()
		.map(|id| ConcreteRequest::query(format!("User{id}"), vec![Selection::linked(format!("user{id}"), person())]))
		.collect();
	requests.push(ConcreteRequest::query(
		"Everyone",
		vec![LinkedField::new("everyone", vec![Selection::scalar("name")]).plural().into()],
	));
	requests
		.into_iter()
		.map(|request| OperationDescriptor::new(Arc::new(request), &Variables::new()))
		.collect()
}

type Log = Arc<Mutex<Vec<(usize, Value)>>>;

fn subscribe_all(store: &Store, log: &Log) -> Vec<Disposable> {
	operations()
		.iter()
		.enumerate()
		.map(|(idx, op)| {
			let log = log.clone();
			store.subscribe(store.lookup(&op.fragment), move |snapshot| {
				log.lock().push((idx, snapshot.data.to_json()));
			})
		})
		.collect()
}

fn apply(store: &Store, writes: &[(usize, u8)]) -> Vec<String> {
	let batch: RecordMap = writes
		.iter()
		.map(|&(user, name)| Record::new(USERS[user], "User").with_value("name", json!(format!("name-{name}"))))
		.collect();
	store.publish(batch, []);
	let mut owners: Vec<String> = store
		.notify(None, false)
		.iter()
		.map(|owner| owner.identifier().to_string())
		.collect();
	owners.sort();
	owners
}

#[test]
fn test_basic_publish_notify() {
	let store = Store::new(seeded());
	let log: Log = Arc::default();
	let _subs = subscribe_all(&store, &log);

	let owners = apply(&store, &[(1, 9)]);
	assert_eq!(owners, vec!["Everyone{}".to_owned(), "User2{}".to_owned()]);
	assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_shared_record_notifies_each_subscription_once() {
	let store = Store::new(seeded());
	let log: Log = Arc::default();
	let _subs = subscribe_all(&store, &log);

	// user 1 is everyone's best friend and also appears in the plural list
	apply(&store, &[(0, 1), (0, 2)]);
	let mut notified: Vec<usize> = log.lock().iter().map(|(idx, _)| *idx).collect();
	notified.sort();
	assert_eq!(notified, vec![0, 1, 2, 3]);
}

proptest! {
	#[test]
	fn prop_full_and_incremental_notify_agree(
		rounds in prop::collection::vec(prop::collection::vec((0usize..3, 0u8..3), 0..4), 1..8)
	) {
		let incremental = Store::new(seeded());
		let full = Store::with_options(
			seeded(),
			StoreOptions {
				config: StoreConfig { full_reread_on_notify: true, ..StoreConfig::default() },
				..StoreOptions::default()
			},
		);
		let incremental_log: Log = Arc::default();
		let full_log: Log = Arc::default();
		let _a = subscribe_all(&incremental, &incremental_log);
		let _b = subscribe_all(&full, &full_log);

		for writes in &rounds {
			let left = apply(&incremental, writes);
			let right = apply(&full, writes);
			prop_assert_eq!(left, right);
		}
		prop_assert_eq!(&*incremental_log.lock(), &*full_log.lock());
	}

	#[test]
	fn prop_republishing_same_data_is_silent(writes in prop::collection::vec((0usize..3, 0u8..3), 1..6)) {
		let store = Store::new(seeded());
		let log: Log = Arc::default();
		let _subs = subscribe_all(&store, &log);
		apply(&store, &writes);
		let delivered = log.lock().len();

		prop_assert!(apply(&store, &writes).is_empty());
		prop_assert_eq!(log.lock().len(), delivered);
	}
}
