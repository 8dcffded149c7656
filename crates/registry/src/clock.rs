use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source starting at 1. Ids are never reused.
#[derive(Debug, Default)]
pub struct IdClock {
	issued: AtomicU64,
}

impl IdClock {
	pub const fn new() -> Self {
		Self {
			issued: AtomicU64::new(0),
		}
	}

	/// Returns the next id.
	pub fn next(&self) -> u64 {
		self.issued.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Last id handed out, or 0.
	pub fn last(&self) -> u64 {
		self.issued.load(Ordering::Acquire)
	}
}
