use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::record::{FieldValue, PayloadError};

fn user(id: &str, name: &str) -> Record {
	Record::new(id, "User").with_value("name", json!(name))
}

#[test]
fn test_states() {
	let mut source = RecordMap::new();
	source.set(Arc::new(user("4", "Zuck")));
	source.delete(&DataId::from("5"));

	assert_eq!(source.status("4"), RecordState::Existent);
	assert_eq!(source.status("5"), RecordState::Nonexistent);
	assert_eq!(source.status("6"), RecordState::Unknown);
	assert!(source.has("5"));
	assert!(!source.has("6"));
	assert_eq!(source.len(), 2);
}

#[test]
fn test_generation_bumps_on_every_write() {
	let mut source = RecordMap::new();
	source.set(Arc::new(user("4", "Zuck")));
	assert_eq!(source.generation("4"), Some(1));
	source.set(Arc::new(user("4", "Mark")));
	source.delete(&DataId::from("4"));
	assert_eq!(source.generation("4"), Some(3));

	source.remove(&DataId::from("4"));
	assert_eq!(source.generation("4"), None);
	assert_eq!(source.status("4"), RecordState::Unknown);
}

#[test]
fn test_sweep_chunk_resumes() {
	let mut source: RecordMap = (0..5).map(|i| user(&i.to_string(), "x")).collect();

	let first = source.sweep_chunk(0, 2, |id| id.as_str() != "1");
	assert_eq!(first.next, Some(2));
	assert_eq!(first.removed, vec![DataId::from("1")]);

	let second = source.sweep_chunk(2, 10, |id| id.as_str() == "2");
	assert_eq!(second.next, None);
	assert_eq!(second.removed.len(), 2);
	assert_eq!(source.record_ids(), vec![DataId::from("0"), DataId::from("2")]);
}

#[test]
fn test_json_round_trip() {
	let text = r#"{
		"client:root": {"__id": "client:root", "__typename": "__Root", "me": {"__ref": "4"}},
		"4": {
			"__id": "4",
			"__typename": "User",
			"name": "Zuck",
			"friends": {"__refs": ["5", null]},
			"__errors": {"email": [{"message": "denied"}]},
			"__invalidated_at": 2
		},
		"5": null
	}"#;
	let source = RecordMap::from_json_str(text).unwrap();
	let record = source.get("4").record().unwrap();
	assert_eq!(record.invalidated_at(), Some(2));
	assert_eq!(record.errors("email").unwrap()[0].message, "denied");
	assert_eq!(source.status("5"), RecordState::Nonexistent);

	let reparsed = RecordMap::from_json(&source.to_json()).unwrap();
	assert_eq!(reparsed.to_json(), source.to_json());
}

#[test]
fn test_json_rejects_mismatched_id() {
	let err = RecordMap::from_json(&json!({"4": {"__id": "5", "__typename": "User"}})).unwrap_err();
	assert!(matches!(err, SourceError::IdMismatch { .. }));
}

#[test]
fn test_overlay_shadows_base() {
	let base: RecordMap = [user("4", "Zuck"), user("5", "Dustin")].into_iter().collect();
	let mut overlay = OptimisticRecordSource::new(base);

	overlay.set(Arc::new(user("4", "Optimistic")));
	overlay.remove(&DataId::from("5"));
	overlay.delete(&DataId::from("6"));

	let name = overlay.get("4").record().unwrap().value("name").cloned();
	assert_eq!(name, Some(json!("Optimistic")));
	assert_eq!(overlay.status("5"), RecordState::Unknown);
	assert_eq!(overlay.status("6"), RecordState::Nonexistent);
	assert_eq!(overlay.len(), 2);

	let base_name = overlay.base().get("4").record().unwrap().value("name").cloned();
	assert_eq!(base_name, Some(json!("Zuck")));

	let (base, mut ids) = overlay.into_parts();
	ids.sort();
	assert_eq!(ids, vec![DataId::from("4"), DataId::from("5"), DataId::from("6")]);
	assert_eq!(base.status("5"), RecordState::Existent);
}

#[test]
fn test_overlay_clear_tombstones_everything() {
	let base: RecordMap = [user("4", "Zuck")].into_iter().collect();
	let mut overlay = OptimisticRecordSource::new(base);
	overlay.clear();
	assert_eq!(overlay.status("4"), RecordState::Unknown);
	assert!(overlay.is_empty());
	assert_eq!(overlay.base().len(), 1);
}

#[test]
fn test_record_update_is_none_when_unchanged() {
	let prev = user("4", "Zuck").with_link("best_friend", "5");
	assert_eq!(prev.update(&user("4", "Zuck")), None);

	let next = user("4", "Mark");
	let merged = prev.update(&next).unwrap();
	assert_eq!(merged.value("name"), Some(&json!("Mark")));
	assert_eq!(merged.get("best_friend"), Some(&FieldValue::Link(DataId::from("5"))));
}

#[test]
fn test_record_update_clears_errors_on_clean_write() {
	let prev = Record::new("4", "User")
		.with_value("email", json!(null))
		.with_errors("email", vec![PayloadError::new("denied")]);
	let next = Record::new("4", "User").with_value("email", json!(null));
	let merged = prev.update(&next).unwrap();
	assert_eq!(merged.errors("email"), None);
}
