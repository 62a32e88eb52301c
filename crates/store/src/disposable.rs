use std::fmt;

/// Handle that undoes a registration when disposed or dropped.
///
/// Disposing twice is a no-op.
#[must_use = "dropping a Disposable disposes it immediately"]
pub struct Disposable {
	dispose: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Disposable {
	pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
		Self {
			dispose: Some(Box::new(dispose)),
		}
	}

	/// A handle with nothing to undo.
	pub fn noop() -> Self {
		Self { dispose: None }
	}

	pub fn dispose(&mut self) {
		if let Some(dispose) = self.dispose.take() {
			dispose();
		}
	}

	pub fn is_disposed(&self) -> bool {
		self.dispose.is_none()
	}
}

impl Drop for Disposable {
	fn drop(&mut self) {
		self.dispose();
	}
}

impl fmt::Debug for Disposable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Disposable").field("disposed", &self.is_disposed()).finish()
	}
}
