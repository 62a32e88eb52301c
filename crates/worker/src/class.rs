/// Shared job classes used for scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobClass {
	/// Incremental garbage collection steps.
	Collection,
	/// Deferred release of retained data (temporary retains, release buffer).
	Release,
}

impl JobClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Collection => "collection",
			Self::Release => "release",
		}
	}
}
