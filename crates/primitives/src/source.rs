//! Record sources: the arena-backed canonical map and the source traits.
//!
//! Every id in a source is in one of three states. [`RecordState::Existent`]
//! holds a record, [`RecordState::Nonexistent`] is a known null (the server
//! said there is no such entity) and [`RecordState::Unknown`] means the id was
//! never fetched. Readers treat `Unknown` as missing data, never as an error.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use slab::Slab;

use crate::error::{Result, SourceError};
use crate::id::DataId;
use crate::record::Record;

mod overlay;

pub use overlay::OptimisticRecordSource;

#[cfg(test)]
mod tests;

/// State of an id within a record source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
	Existent,
	Nonexistent,
	Unknown,
}

/// Result of looking up an id.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
	Present(&'a Arc<Record>),
	Null,
	Unknown,
}

impl<'a> Lookup<'a> {
	pub fn state(&self) -> RecordState {
		match self {
			Self::Present(_) => RecordState::Existent,
			Self::Null => RecordState::Nonexistent,
			Self::Unknown => RecordState::Unknown,
		}
	}

	pub fn record(self) -> Option<&'a Arc<Record>> {
		match self {
			Self::Present(record) => Some(record),
			_ => None,
		}
	}
}

/// Read access to a set of records.
pub trait RecordSource {
	fn get(&self, id: &str) -> Lookup<'_>;

	fn status(&self, id: &str) -> RecordState {
		self.get(id).state()
	}

	/// True when the id holds a record or a known null.
	fn has(&self, id: &str) -> bool {
		!matches!(self.get(id), Lookup::Unknown)
	}

	fn record_ids(&self) -> Vec<DataId>;

	fn len(&self) -> usize;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Write access to a set of records.
pub trait MutableRecordSource: RecordSource {
	/// Stores `record` under its own id, replacing whatever was there.
	fn set(&mut self, record: Arc<Record>);

	/// Marks `id` as a known null.
	fn delete(&mut self, id: &DataId);

	/// Forgets `id`, so it reads as unknown again.
	fn remove(&mut self, id: &DataId);

	fn clear(&mut self);
}

#[derive(Debug, Clone)]
enum Entry {
	Record(Arc<Record>),
	Null,
}

#[derive(Debug, Clone)]
struct Slot {
	id: DataId,
	entry: Entry,
	generation: u64,
}

/// Progress of one [`RecordMap::sweep_chunk`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepProgress {
	/// Slot index to resume from, or `None` once every slot was visited.
	pub next: Option<usize>,
	pub removed: Vec<DataId>,
}

/// Canonical record source: id index over a slab of slots.
///
/// Each slot carries a generation bumped on every write so callers holding a
/// slot index can tell whether it still refers to the same write.
#[derive(Debug, Clone, Default)]
pub struct RecordMap {
	slots: Slab<Slot>,
	index: FxHashMap<DataId, usize>,
}

impl RecordMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Write generation of the slot holding `id`.
	pub fn generation(&self, id: &str) -> Option<u64> {
		self.index.get(id).map(|&key| self.slots[key].generation)
	}

	/// Iterates every id with its lookup state.
	pub fn iter(&self) -> impl Iterator<Item = (&DataId, Lookup<'_>)> {
		self.slots.iter().map(|(_, slot)| (&slot.id, slot.lookup()))
	}

	/// Visits up to `chunk` slot indices starting at `cursor`, removing every
	/// occupied slot whose id `keep` rejects.
	pub fn sweep_chunk(&mut self, cursor: usize, chunk: usize, mut keep: impl FnMut(&DataId) -> bool) -> SweepProgress {
		let end = cursor.saturating_add(chunk.max(1)).min(self.slot_bound());
		let mut removed = Vec::new();
		for key in cursor..end {
			let Some(slot) = self.slots.get(key) else {
				continue;
			};
			if keep(&slot.id) {
				continue;
			}
			let slot = self.slots.remove(key);
			self.index.remove(&slot.id);
			removed.push(slot.id);
		}
		SweepProgress {
			next: (end < self.slot_bound()).then_some(end),
			removed,
		}
	}

	/// Upper bound on occupied slot indices.
	fn slot_bound(&self) -> usize {
		self.slots.iter().next_back().map_or(0, |(key, _)| key + 1)
	}

	fn write(&mut self, id: DataId, entry: Entry) {
		match self.index.get(&id) {
			Some(&key) => {
				let slot = &mut self.slots[key];
				slot.entry = entry;
				slot.generation += 1;
			}
			None => {
				let key = self.slots.insert(Slot {
					id: id.clone(),
					entry,
					generation: 1,
				});
				self.index.insert(id, key);
			}
		}
	}

	/// Loads a source from its JSON form: an object mapping ids to records or
	/// `null`.
	pub fn from_json(value: &Value) -> Result<Self> {
		let Value::Object(map) = value else {
			return Err(SourceError::NotAnObject {
				what: "record source".to_owned(),
				found: value.to_string(),
			});
		};
		let mut source = Self::new();
		for (id, record) in map {
			if record.is_null() {
				source.delete(&DataId::from(id.as_str()));
			} else {
				source.set(Arc::new(Record::from_json(id, record)?));
			}
		}
		Ok(source)
	}

	pub fn from_json_str(text: &str) -> Result<Self> {
		Self::from_json(&serde_json::from_str(text)?)
	}

	pub fn to_json(&self) -> Value {
		let map: Map<String, Value> = self
			.slots
			.iter()
			.map(|(_, slot)| {
				let value = match &slot.entry {
					Entry::Record(record) => record.to_json(),
					Entry::Null => Value::Null,
				};
				(slot.id.to_string(), value)
			})
			.collect();
		Value::Object(map)
	}
}

impl Slot {
	fn lookup(&self) -> Lookup<'_> {
		match &self.entry {
			Entry::Record(record) => Lookup::Present(record),
			Entry::Null => Lookup::Null,
		}
	}
}

impl RecordSource for RecordMap {
	fn get(&self, id: &str) -> Lookup<'_> {
		match self.index.get(id) {
			Some(&key) => self.slots[key].lookup(),
			None => Lookup::Unknown,
		}
	}

	fn record_ids(&self) -> Vec<DataId> {
		self.slots.iter().map(|(_, slot)| slot.id.clone()).collect()
	}

	fn len(&self) -> usize {
		self.slots.len()
	}
}

impl MutableRecordSource for RecordMap {
	fn set(&mut self, record: Arc<Record>) {
		let id = record.id().clone();
		self.write(id, Entry::Record(record));
	}

	fn delete(&mut self, id: &DataId) {
		self.write(id.clone(), Entry::Null);
	}

	fn remove(&mut self, id: &DataId) {
		if let Some(key) = self.index.remove(id) {
			self.slots.remove(key);
		}
	}

	fn clear(&mut self) {
		self.slots.clear();
		self.index.clear();
	}
}

impl FromIterator<Record> for RecordMap {
	fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
		let mut source = Self::new();
		for record in iter {
			source.set(Arc::new(record));
		}
		source
	}
}
