//! Incremental mark-and-sweep over the canonical record map.
//!
//! A run marks one retained root per step, then sweeps the slab in chunks.
//! The store discards a run whose start epoch no longer matches its own and
//! starts over, so records written mid-run are never swept on stale marks.

use rustc_hash::FxHashSet;
use tessera_primitives::{DataId, NormalizationSelector, ROOT_ID, RecordMap};

use crate::walk::walk;

#[cfg(test)]
mod tests;

#[derive(Debug)]
enum Phase {
	Mark { next_root: usize },
	Sweep { cursor: usize },
}

/// Result of one [`GcRun::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
	Pending,
	Finished { removed: usize },
}

#[derive(Debug)]
pub(crate) struct GcRun {
	/// Identifies this run to its scheduled steps.
	pub id: u64,
	/// Store mutation epoch the marks were taken at.
	pub epoch: u64,
	roots: Vec<NormalizationSelector>,
	references: FxHashSet<DataId>,
	phase: Phase,
	removed: usize,
}

impl GcRun {
	pub fn new(id: u64, epoch: u64, roots: Vec<NormalizationSelector>) -> Self {
		Self {
			id,
			epoch,
			roots,
			references: FxHashSet::default(),
			phase: Phase::Mark { next_root: 0 },
			removed: 0,
		}
	}

	pub fn step(&mut self, records: &mut RecordMap, chunk: usize) -> Step {
		match self.phase {
			Phase::Mark { next_root } => {
				match self.roots.get(next_root) {
					Some(root) => {
						self.references.extend(walk(records, root).references);
						self.phase = Phase::Mark { next_root: next_root + 1 };
					}
					None => self.phase = Phase::Sweep { cursor: 0 },
				}
				Step::Pending
			}
			Phase::Sweep { cursor } => {
				let references = &self.references;
				let progress = records.sweep_chunk(cursor, chunk, |id| id.as_str() == ROOT_ID || references.contains(id));
				self.removed += progress.removed.len();
				match progress.next {
					Some(cursor) => {
						self.phase = Phase::Sweep { cursor };
						Step::Pending
					}
					None => Step::Finished { removed: self.removed },
				}
			}
		}
	}

	/// Runs every remaining step. Returns the number of records removed.
	pub fn run_to_completion(mut self, records: &mut RecordMap, chunk: usize) -> usize {
		loop {
			if let Step::Finished { removed } = self.step(records, chunk) {
				return removed;
			}
		}
	}
}
