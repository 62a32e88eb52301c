use std::sync::Arc;

use rustc_hash::FxHashSet;
use tessera_primitives::{DataId, Lookup, MutableRecordSource, Record, RecordMap, RecordSource};

/// Ids touched by one publish.
#[derive(Debug, Default)]
pub(crate) struct Touched {
	pub updated: FxHashSet<DataId>,
	pub invalidated: FxHashSet<DataId>,
}

/// Merges `batch` into `target`, last write winning per storage key.
///
/// Ids in `invalidate` get `invalidated_at = epoch` (unless the batch deletes
/// them) and count as invalidated rather than updated. A batch record equal to
/// the existing one leaves it untouched.
pub(crate) fn merge_batch<T: MutableRecordSource + ?Sized>(
	target: &mut T,
	batch: RecordMap,
	invalidate: impl IntoIterator<Item = DataId>,
	epoch: u64,
	touched: &mut Touched,
) {
	for id in invalidate {
		if matches!(batch.get(&id), Lookup::Null) {
			continue;
		}
		let base = match target.get(&id) {
			Lookup::Present(record) => Some(record.clone()),
			_ => batch.get(&id).record().cloned(),
		};
		let Some(base) = base else {
			continue;
		};
		let mut record = (*base).clone();
		record.set_invalidated_at(epoch);
		target.set(Arc::new(record));
		touched.invalidated.insert(id);
	}

	for (id, incoming) in batch.iter() {
		let write = match (incoming, target.get(id)) {
			(Lookup::Present(incoming), Lookup::Present(existing)) => match existing.update(incoming) {
				Some(merged) => Write::Set(Arc::new(merged)),
				None => Write::Skip,
			},
			(Lookup::Present(incoming), _) => Write::Set(incoming.clone()),
			(Lookup::Null, existing) => Write::Delete {
				changed: !matches!(existing, Lookup::Null),
			},
			(Lookup::Unknown, _) => Write::Skip,
		};
		match write {
			Write::Set(record) => {
				target.set(record);
				touched.updated.insert(id.clone());
			}
			Write::Delete { changed } => {
				target.delete(id);
				if changed {
					touched.updated.insert(id.clone());
				}
			}
			Write::Skip => {}
		}
	}
}

enum Write {
	Set(Arc<Record>),
	Delete { changed: bool },
	Skip,
}
