use pretty_assertions::assert_eq;
use serde_json::json;
use tessera_primitives::{
	Argument, ConcreteRequest, LinkedField, OperationDescriptor, PayloadError, ReaderFragment, RecordMap, ScalarField,
};

use super::*;

fn source() -> RecordMap {
	[
		Record::new("client:root", "__Root")
			.with_link("me", "4")
			.with_link("node(id:\"5\")", "5"),
		Record::new("4", "User")
			.with_value("id", json!("4"))
			.with_value("name", json!("Zuck"))
			.with_value("email", json!(null))
			.with_errors("email", vec![PayloadError::new("forbidden")])
			.with_value("profilePicture(size:32)", json!("zuck-32.png"))
			.with_links("friends", [Some("5"), None, Some("6")]),
		Record::new("5", "Page").with_value("id", json!("5")).with_value("name", json!("Facebook")),
	]
	.into_iter()
	.collect()
}

fn selector(fragment: ReaderFragment, vars: Variables) -> SingularReaderSelector {
	let request = Arc::new(ConcreteRequest::query(fragment.name.clone(), fragment.selections.clone()));
	let op = OperationDescriptor::new(request, &Variables::new());
	SingularReaderSelector::new(DataId::root(), Arc::new(fragment), vars, op.request)
}

fn query(selections: Vec<Selection>) -> SingularReaderSelector {
	selector(ReaderFragment::new("TestQuery", "__Root", selections), Variables::new())
}

#[test]
fn test_reads_scalars_and_links() {
	let snapshot = read(
		&source(),
		&query(vec![Selection::linked("me", vec![Selection::scalar("id"), Selection::scalar("name")])]),
	);
	assert_eq!(snapshot.data.to_json(), json!({"me": {"id": "4", "name": "Zuck"}}));
	assert!(!snapshot.is_missing_data);
	let mut seen: Vec<_> = snapshot.seen_records.iter().map(DataId::as_str).collect();
	seen.sort();
	assert_eq!(seen, vec!["4", "client:root"]);
}

#[test]
fn test_missing_field_and_record() {
	let snapshot = read(&source(), &query(vec![Selection::linked("me", vec![Selection::scalar("birthday")])]));
	assert!(snapshot.is_missing_data);
	assert_eq!(snapshot.data.to_json(), json!({"me": {}}));

	let empty = RecordMap::new();
	let snapshot = read(&empty, &query(vec![Selection::scalar("id")]));
	assert!(snapshot.is_missing_data);
	assert_eq!(snapshot.data, Data::Null);
}

#[test]
fn test_unfetched_field_is_absent_but_known_null_is_kept() {
	let snapshot = read(
		&source(),
		&query(vec![Selection::linked(
			"me",
			vec![Selection::scalar("email"), Selection::scalar("birthday")],
		)]),
	);
	assert!(snapshot.is_missing_data);
	let me = snapshot.data.get("me").unwrap();
	assert_eq!(me.get("email"), Some(&Data::Null));
	assert_eq!(me.get("birthday"), None);
}

#[test]
fn test_plural_links() {
	let friends = LinkedField::new("friends", vec![Selection::scalar("name")]).plural();
	let snapshot = read(&source(), &query(vec![Selection::linked("me", vec![friends.into()])]));
	assert_eq!(
		snapshot.data.to_json(),
		json!({"me": {"friends": [{"name": "Facebook"}, null, null]}})
	);
	// "6" was never fetched.
	assert!(snapshot.is_missing_data);
	assert!(snapshot.seen_records.contains("6"));
}

#[test]
fn test_arguments_resolve_storage_keys() {
	let picture = ScalarField::new("profilePicture").arg(Argument::variable("size", "size"));
	let node = LinkedField::new("node", vec![Selection::scalar("name")]).arg(Argument::literal("id", json!("5")));
	let sel = selector(
		ReaderFragment::new(
			"Args",
			"__Root",
			vec![Selection::linked("me", vec![picture.into()]), node.into()],
		),
		Variables::new().with("size", json!(32.0)),
	);
	let snapshot = read(&source(), &sel);
	assert_eq!(
		snapshot.data.to_json(),
		json!({"me": {"profilePicture": "zuck-32.png"}, "node": {"name": "Facebook"}})
	);
}

#[test]
fn test_required_bubbles_to_parent() {
	let email = ScalarField::new("email").required(RequiredAction::Throw);
	let snapshot = read(
		&source(),
		&query(vec![Selection::linked("me", vec![Selection::scalar("name"), email.into()])]),
	);
	assert_eq!(snapshot.data.to_json(), json!({"me": null}));
	let required: Vec<_> = snapshot
		.field_errors
		.iter()
		.filter(|error| matches!(error.kind, FieldErrorKind::MissingRequired { .. }))
		.collect();
	assert_eq!(required.len(), 1);
	assert!(required[0].fatal);
	assert_eq!(&*required[0].path, "me.email");
}

#[test]
fn test_required_log_is_not_fatal() {
	let email = ScalarField::new("email").required(RequiredAction::Log);
	let snapshot = read(&source(), &query(vec![Selection::linked("me", vec![email.into()])]));
	assert_eq!(snapshot.data.to_json(), json!({"me": null}));
	assert!(snapshot.report_field_errors().is_ok());
}

#[test]
fn test_required_on_missing_data_reports_nothing() {
	let birthday = ScalarField::new("birthday").required(RequiredAction::Throw);
	let snapshot = read(&source(), &query(vec![Selection::linked("me", vec![birthday.into()])]));
	assert!(snapshot.is_missing_data);
	assert!(snapshot.field_errors.is_empty());
}

#[test]
fn test_catch_to_result() {
	let email = ScalarField::new("email").catch(CatchTo::Result);
	let snapshot = read(
		&source(),
		&selector(
			ReaderFragment::new("Caught", "__Root", vec![Selection::linked("me", vec![email.into()])])
				.throw_on_field_error(),
			Variables::new(),
		),
	);
	let me = snapshot.data.get("me").unwrap();
	let Some(Data::Error(errors)) = me.get("email") else {
		panic!("expected caught error, got {me:?}");
	};
	assert_eq!(errors.len(), 1);
	assert!(snapshot.field_errors.iter().all(|error| error.handled));
	assert!(snapshot.report_field_errors().is_ok());
}

#[test]
fn test_catch_stops_required_bubbling() {
	let email = LinkedField::new("me", vec![ScalarField::new("email").required(RequiredAction::Throw).into()])
		.catch(CatchTo::Null);
	let snapshot = read(&source(), &query(vec![email.into(), Selection::scalar("missing")]));
	assert_eq!(snapshot.data.get("me"), Some(&Data::Null));
	assert!(snapshot.data.get("missing").is_some());
}

#[test]
fn test_payload_errors_fatal_when_throwing() {
	let sel = selector(
		ReaderFragment::new("Strict", "__Root", vec![Selection::linked("me", vec![Selection::scalar("email")])])
			.throw_on_field_error(),
		Variables::new(),
	);
	let snapshot = read(&source(), &sel);
	assert_eq!(snapshot.data.to_json(), json!({"me": {"email": null}}));
	let fatal = snapshot.report_field_errors().unwrap_err();
	assert_eq!(fatal.len(), 1);
	assert_eq!(fatal[0].kind, FieldErrorKind::Payload(PayloadError::new("forbidden")));

	let lenient = read(&source(), &query(vec![Selection::linked("me", vec![Selection::scalar("email")])]));
	assert_eq!(lenient.field_errors.len(), 1);
	assert!(lenient.report_field_errors().is_ok());
}

#[test]
fn test_inline_fragments_and_conditions() {
	let selections = vec![Selection::linked(
		"me",
		vec![
			Selection::inline(Some("User"), vec![Selection::scalar("name")]),
			Selection::inline(Some("Page"), vec![Selection::scalar("likers")]),
			Selection::skip_if("brief", vec![Selection::scalar("id")]),
		],
	)];
	let sel = selector(
		ReaderFragment::new("Inline", "__Root", selections),
		Variables::new().with("brief", json!(true)),
	);
	let snapshot = read(&source(), &sel);
	assert_eq!(snapshot.data.to_json(), json!({"me": {"name": "Zuck"}}));
	assert!(!snapshot.is_missing_data);
}

#[test]
fn test_fragment_spread_leaves_refs() {
	let fragment = Arc::new(ReaderFragment::new("UserAvatar", "User", vec![Selection::scalar("avatar")]).local_arg("size", None));
	let selections = vec![Selection::linked(
		"me",
		vec![Selection::scalar("id"), Selection::spread(fragment, vec![Argument::literal("size", json!(64))])],
	)];
	let sel = query(selections);
	let snapshot = read(&source(), &sel);
	assert!(!snapshot.is_missing_data);

	let me = snapshot.data.get("me").and_then(Data::as_object).unwrap();
	let refs = me.fragments.as_ref().unwrap();
	assert_eq!(refs.id, DataId::from("4"));
	assert_eq!(refs.owner, sel.owner);
	assert_eq!(refs.fragments["UserAvatar"].get("size"), Some(&json!(64)));
	assert!(!me.fields.contains_key("avatar"));
}

#[test]
fn test_duplicate_response_keys_merge() {
	let selections = vec![
		Selection::linked("me", vec![Selection::scalar("id")]),
		Selection::inline(None, vec![Selection::linked("me", vec![Selection::scalar("name")])]),
	];
	let snapshot = read(&source(), &query(selections));
	assert_eq!(snapshot.data.to_json(), json!({"me": {"id": "4", "name": "Zuck"}}));
}

#[test]
fn test_read_is_pure() {
	let records = source();
	let before = records.to_json();
	let sel = query(vec![Selection::linked("me", vec![Selection::scalar("name")])]);
	let first = read(&records, &sel);
	let second = read(&records, &sel);
	assert_eq!(first, second);
	assert_eq!(records.to_json(), before);
}
