use std::sync::Arc;

use serde_json::json;
use tessera_primitives::{ConcreteRequest, OperationDescriptor, Record, RecordSource, Selection, Variables};

use super::*;

fn records() -> RecordMap {
	[
		Record::new("client:root", "__Root").with_link("me", "4").with_link("page", "5"),
		Record::new("4", "User").with_value("name", json!("Zuck")).with_link("friend", "6"),
		Record::new("5", "Page").with_value("name", json!("Facebook")),
		Record::new("6", "User").with_value("name", json!("Dustin")),
		Record::new("7", "User").with_value("name", json!("Orphan")),
	]
	.into_iter()
	.collect()
}

fn me_root() -> NormalizationSelector {
	let request = ConcreteRequest::query(
		"MeQuery",
		vec![Selection::linked(
			"me",
			vec![Selection::scalar("name"), Selection::linked("friend", vec![Selection::scalar("name")])],
		)],
	);
	OperationDescriptor::new(Arc::new(request), &Variables::new()).root
}

#[test]
fn test_marks_reachable_and_keeps_root() {
	let mut records = records();
	let removed = GcRun::new(1, 0, vec![me_root()]).run_to_completion(&mut records, 2);
	assert_eq!(removed, 2);
	let mut ids: Vec<_> = records.record_ids().iter().map(|id| id.to_string()).collect();
	ids.sort();
	assert_eq!(ids, vec!["4", "6", "client:root"]);
}

#[test]
fn test_no_roots_clears_all_but_root_record() {
	let mut records = records();
	GcRun::new(1, 0, Vec::new()).run_to_completion(&mut records, 256);
	assert_eq!(records.len(), 1);
	assert!(records.has("client:root"));
}

#[test]
fn test_steps_are_incremental() {
	let mut records = records();
	let mut run = GcRun::new(1, 0, vec![me_root()]);
	// mark one root, switch to sweep, then one slot per sweep step
	assert_eq!(run.step(&mut records, 1), Step::Pending);
	assert_eq!(run.step(&mut records, 1), Step::Pending);
	assert_eq!(records.len(), 5);
	let mut steps = 0;
	while run.step(&mut records, 1) == Step::Pending {
		steps += 1;
	}
	assert_eq!(steps, 4);
	assert_eq!(records.len(), 3);
}
