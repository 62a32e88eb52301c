//! Optimistic overlay over a canonical [`RecordMap`].

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{Lookup, MutableRecordSource, RecordMap, RecordSource};
use crate::id::DataId;
use crate::record::Record;

#[derive(Debug, Clone)]
enum SinkEntry {
	Record(Arc<Record>),
	Null,
	Removed,
}

/// Record source layering speculative writes over a base.
///
/// Reads consult the sink first and fall through to the base. Writes only ever
/// touch the sink; a removal leaves a tombstone that reads as unknown instead
/// of exposing the base record.
#[derive(Debug, Default)]
pub struct OptimisticRecordSource {
	base: RecordMap,
	sink: FxHashMap<DataId, SinkEntry>,
}

impl OptimisticRecordSource {
	pub fn new(base: RecordMap) -> Self {
		Self {
			base,
			sink: FxHashMap::default(),
		}
	}

	pub fn base(&self) -> &RecordMap {
		&self.base
	}

	/// Ids with an entry in the sink.
	pub fn optimistic_ids(&self) -> Vec<DataId> {
		self.sink.keys().cloned().collect()
	}

	/// Discards the sink, handing back the untouched base and the ids the
	/// overlay had shadowed.
	pub fn into_parts(self) -> (RecordMap, Vec<DataId>) {
		let ids = self.sink.into_keys().collect();
		(self.base, ids)
	}
}

impl RecordSource for OptimisticRecordSource {
	fn get(&self, id: &str) -> Lookup<'_> {
		match self.sink.get(id) {
			Some(SinkEntry::Record(record)) => Lookup::Present(record),
			Some(SinkEntry::Null) => Lookup::Null,
			Some(SinkEntry::Removed) => Lookup::Unknown,
			None => self.base.get(id),
		}
	}

	fn record_ids(&self) -> Vec<DataId> {
		let mut ids: Vec<DataId> = self
			.base
			.record_ids()
			.into_iter()
			.filter(|id| !self.sink.contains_key(id))
			.collect();
		ids.extend(
			self.sink
				.iter()
				.filter(|(_, entry)| !matches!(entry, SinkEntry::Removed))
				.map(|(id, _)| id.clone()),
		);
		ids
	}

	fn len(&self) -> usize {
		self.record_ids().len()
	}
}

impl MutableRecordSource for OptimisticRecordSource {
	fn set(&mut self, record: Arc<Record>) {
		self.sink.insert(record.id().clone(), SinkEntry::Record(record));
	}

	fn delete(&mut self, id: &DataId) {
		self.sink.insert(id.clone(), SinkEntry::Null);
	}

	fn remove(&mut self, id: &DataId) {
		self.sink.insert(id.clone(), SinkEntry::Removed);
	}

	fn clear(&mut self) {
		for id in self.record_ids() {
			self.sink.insert(id, SinkEntry::Removed);
		}
	}
}
