use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use serde_json::json;
use tessera_primitives::{
	ConcreteRequest, DataObject, LinkedField, OperationDescriptor, ROOT_ID, ROOT_TYPE, Record, RecordMap, RequiredAction,
	ScalarField, Selection, Variables,
};

use super::*;
use crate::config::FragmentResourceConfig;
use crate::fetch::{FetchEvent, ResponsePayload, fetch_channel};
use crate::fixtures::{app, environment, me_payload, me_records, user};

fn resource(environment: Environment) -> FragmentResource {
	FragmentResource::new(environment, FragmentResourceConfig::default())
}

fn key_at(environment: &Environment, operation: &OperationDescriptor, field: &str) -> Data {
	environment
		.lookup(&operation.fragment)
		.data
		.get(field)
		.cloned()
		.unwrap_or(Data::Null)
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
	let count = Arc::new(AtomicUsize::new(0));
	let bump = count.clone();
	(count, move || {
		bump.fetch_add(1, Ordering::SeqCst);
	})
}

#[test]
fn test_identifier_format() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let key = key_at(&environment, &app.operation, "me");
	assert_eq!(&*fragment_identifier(&app.user, &key), "AppQuery{}/UserFragment/{}/4");
	assert_eq!(&*fragment_identifier(&app.user, &Data::Null), "null/UserFragment/{}/null");
	let unrelated = Data::from(DataObject::default());
	assert_eq!(&*fragment_identifier(&app.user, &unrelated), "null/UserFragment/{}/missing");
}

#[test]
fn test_complete_read_is_cached() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");

	let first = resource.read(&app.user, &key).ready().unwrap();
	assert_eq!(first.data.to_json(), json!({"id": "4", "name": "Zuck"}));
	assert!(!first.is_missing_data);
	assert_eq!(resource.len(), 1);

	let second = resource.read(&app.user, &key).ready().unwrap();
	assert!(second.data.same_node(&first.data));
}

#[test]
fn test_null_key_reads_null() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment);
	let result = resource.read(&app.user, &Data::Null).ready().unwrap();
	assert_eq!(result.data, Data::Null);
	assert_eq!(result.snapshot, FragmentSnapshot::None);
	assert!(resource.is_empty());
}

#[test]
fn test_key_without_reference_fails() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment);
	match resource.read(&app.user, &Data::from(DataObject::default())) {
		Suspense::Failed(ResourceError::MissingFragmentRef { fragment }) => assert_eq!(fragment, "UserFragment"),
		other => panic!("expected missing ref, got {other:?}"),
	}
}

#[test]
fn test_missing_data_suspends_on_owner_fetch() {
	let app = app();
	let partial: RecordMap = [
		Record::new(ROOT_ID, ROOT_TYPE).with_link("me", "4"),
		Record::new("4", "User").with_value("id", json!("4")),
	]
	.into_iter()
	.collect();
	let (environment, _timer) = environment(partial);
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");

	let (sink, network) = fetch_channel();
	environment
		.execute(&app.operation, Box::new(network))
		.subscribe(Box::new(|_: FetchEvent| {}));

	let pending = resource.read(&app.user, &key).pending().cloned().unwrap();
	assert!(resource.read(&app.user, &key).is_pending());

	sink.next(me_payload("Zuck"));
	assert!(!pending.is_resolved());
	sink.complete();
	assert!(pending.is_resolved());

	let result = resource.read(&app.user, &key).ready().unwrap();
	assert_eq!(result.data.to_json(), json!({"id": "4", "name": "Zuck"}));
}

#[test]
fn test_missing_data_without_fetch_returns_partial() {
	let app = app();
	let partial: RecordMap = [
		Record::new(ROOT_ID, ROOT_TYPE).with_link("me", "4"),
		Record::new("4", "User").with_value("id", json!("4")),
	]
	.into_iter()
	.collect();
	let (environment, _timer) = environment(partial);
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");

	let result = resource.read(&app.user, &key).ready().unwrap();
	assert!(result.is_missing_data);
	assert_eq!(result.data.to_json(), json!({"id": "4"}));
	assert!(resource.is_empty());
}

#[test]
fn test_subscription_refreshes_cached_read() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");
	let result = resource.read(&app.user, &key).ready().unwrap();

	let (calls, callback) = counter();
	let _subscription = resource.subscribe(&result, callback);
	assert_eq!(calls.load(Ordering::SeqCst), 0);

	environment.commit_payload(&app.operation, &me_payload("Mark"));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	let cached = resource.read(&app.user, &key).ready().unwrap();
	assert_eq!(cached.data.to_json(), json!({"id": "4", "name": "Mark"}));
}

#[test]
fn test_subscribe_reports_missed_update() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");
	let result = resource.read(&app.user, &key).ready().unwrap();

	environment.commit_payload(&app.operation, &me_payload("Mark"));
	let (calls, callback) = counter();
	let _subscription = resource.subscribe(&result, callback);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	let cached = resource.read(&app.user, &key).ready().unwrap();
	assert_eq!(cached.data.to_json(), json!({"id": "4", "name": "Mark"}));
}

#[test]
fn test_unrelated_write_is_not_a_missed_update() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");
	let result = resource.read(&app.user, &key).ready().unwrap();

	let other: RecordMap = [user("9", "Someone")].into_iter().collect();
	environment.commit_payload(&app.operation, &ResponsePayload::new(other));
	let (missed, current) = resource.check_missed_updates(&result);
	assert!(!missed);
	let FragmentSnapshot::Single(current) = current else {
		panic!("expected a single snapshot");
	};
	assert!(current.data.same_node(&result.data));
	assert!(!resource.check_missed_updates_spec([&result]));
}

#[test]
fn test_dispose_drops_cached_read() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");
	let result = resource.read(&app.user, &key).ready().unwrap();

	let mut subscription = resource.subscribe(&result, || {});
	assert_eq!(environment.store().subscription_count(), 1);
	subscription.dispose();
	assert!(resource.is_empty());
	assert_eq!(environment.store().subscription_count(), 0);
}

#[test]
fn test_plural_fragment() {
	let friend = Arc::new(
		ReaderFragment::new("FriendFragment", "User", vec![Selection::scalar("name")]).plural(),
	);
	let query = Arc::new(ConcreteRequest::query(
		"FriendsQuery",
		vec![Selection::from(
			LinkedField::new("friends", vec![Selection::spread(friend.clone(), Vec::new())]).plural(),
		)],
	));
	let operation = OperationDescriptor::new(query, &Variables::new());
	let records: RecordMap = [
		Record::new(ROOT_ID, ROOT_TYPE).with_links("friends", [Some("4"), Some("5")]),
		user("4", "Zuck"),
		user("5", "Chris"),
	]
	.into_iter()
	.collect();
	let (environment, _timer) = environment(records);
	let resource = resource(environment.clone());
	let key = key_at(&environment, &operation, "friends");

	assert_eq!(
		&*fragment_identifier(&friend, &key),
		"[FriendsQuery{},FriendsQuery{}]/FriendFragment/{}/[4,5]"
	);
	let result = resource.read(&friend, &key).ready().unwrap();
	assert_eq!(result.data.to_json(), json!([{"name": "Zuck"}, {"name": "Chris"}]));

	let (calls, callback) = counter();
	let _subscription = resource.subscribe(&result, callback);
	let update: RecordMap = [user("5", "Kris")].into_iter().collect();
	environment.commit_payload(&operation, &ResponsePayload::new(update));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	let cached = resource.read(&friend, &key).ready().unwrap();
	assert_eq!(cached.data.to_json(), json!([{"name": "Zuck"}, {"name": "Kris"}]));

	let empty = resource.read(&friend, &Data::List(Arc::from([]))).ready().unwrap();
	assert_eq!(empty.data.to_json(), json!([]));
}

#[test]
fn test_required_throw_fails_read() {
	let strict = Arc::new(ReaderFragment::new(
		"StrictUser",
		"User",
		vec![Selection::from(ScalarField::new("name").required(RequiredAction::Throw))],
	));
	let query = Arc::new(ConcreteRequest::query(
		"StrictQuery",
		vec![Selection::linked("me", vec![Selection::spread(strict.clone(), Vec::new())])],
	));
	let operation = OperationDescriptor::new(query, &Variables::new());
	let records: RecordMap = [
		Record::new(ROOT_ID, ROOT_TYPE).with_link("me", "4"),
		Record::new("4", "User").with_value("name", serde_json::Value::Null),
	]
	.into_iter()
	.collect();
	let (environment, _timer) = environment(records);
	let resource = resource(environment.clone());
	let key = key_at(&environment, &operation, "me");

	match resource.read(&strict, &key) {
		Suspense::Failed(ResourceError::FieldErrors { fragment, errors }) => {
			assert_eq!(fragment, "StrictUser");
			assert_eq!(errors.len(), 1);
			assert_eq!(&*errors[0].path, "name");
		}
		other => panic!("expected field errors, got {other:?}"),
	}
	assert!(resource.is_empty());
}

#[test]
fn test_read_spec() {
	let app = app();
	let (environment, _timer) = environment(me_records("Zuck"));
	let resource = resource(environment.clone());
	let key = key_at(&environment, &app.operation, "me");

	let results = resource
		.read_spec(&[("viewer", &app.user, &key), ("nobody", &app.user, &Data::Null)])
		.ready()
		.unwrap();
	let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
	assert_eq!(names, ["viewer", "nobody"]);
	assert!(results[1].1.data.is_null());

	let (calls, callback) = counter();
	let _subscription = resource.subscribe_spec(results.iter().map(|(_, result)| result), callback);
	environment.commit_payload(&app.operation, &me_payload("Mark"));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
