//! Single-invocation tasks with a reentrancy-safe wait.
//!
//! # Mental model
//!
//! A [`TaskHandle`] wraps a deferred body plus a completion slot. Any number of
//! clones may exist; the body runs at most once, on whichever thread claims the
//! `started` flag first. That may be a pool worker or a waiter.
//!
//! # Invariants
//!
//! * The body executes at most once (`started` is claimed with an atomic swap).
//! * Every waiter observes the same outcome once the body finishes.
//! * A waiter never blocks on a task its own thread is currently executing.
//!
//! # Reentrancy
//!
//! [`TaskHandle::wait`] blocks on the completion signal for the grace period.
//! When the grace period elapses and nobody has started the body, the waiter
//! assumes the pool cannot reach it (typically because the only worker is
//! blocked further up its own stack on this very task) and runs the body
//! inline. A thread-local stack of running tasks catches the degenerate case
//! where a body waits on its own handle.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::panic_message;


/// Grace period a waiter allows the pool before running a task inline.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(50);

thread_local! {
	/// Identity of every task whose body is executing on this thread, innermost last.
	static RUNNING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Failure observed by waiters of a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
	/// The body panicked; carries the panic message.
	#[error("task panicked: {0}")]
	Panicked(String),
	/// The result was requested from inside the task's own body.
	#[error("task waited on its own result")]
	Reentrant,
}

type Body<T> = Box<dyn FnOnce() -> T + Send>;

struct TaskCell<T> {
	label: Box<str>,
	grace: Duration,
	started: AtomicBool,
	body: Mutex<Option<Body<T>>>,
	outcome: Mutex<Option<Result<T, TaskError>>>,
	done: Condvar,
}

/// Shared handle to a single-invocation task.
pub struct TaskHandle<T> {
	inner: Arc<TaskCell<T>>,
}

impl<T> Clone for TaskHandle<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> fmt::Debug for TaskHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskHandle")
			.field("label", &self.inner.label)
			.field("started", &self.is_started())
			.field("complete", &self.is_complete())
			.finish()
	}
}

impl<T: Send + 'static> TaskHandle<T> {
	/// Creates an unsubmitted task with the default grace period.
	pub fn new<F>(label: impl Into<Box<str>>, f: F) -> Self
	where
		F: FnOnce() -> T + Send + 'static,
	{
		Self::with_grace(label, DEFAULT_GRACE_PERIOD, f)
	}

	/// Creates an unsubmitted task with an explicit grace period.
	pub fn with_grace<F>(label: impl Into<Box<str>>, grace: Duration, f: F) -> Self
	where
		F: FnOnce() -> T + Send + 'static,
	{
		Self {
			inner: Arc::new(TaskCell {
				label: label.into(),
				grace,
				started: AtomicBool::new(false),
				body: Mutex::new(Some(Box::new(f))),
				outcome: Mutex::new(None),
				done: Condvar::new(),
			}),
		}
	}

	/// Creates a task that is already complete with `value`.
	pub fn completed(label: impl Into<Box<str>>, value: T) -> Self {
		Self {
			inner: Arc::new(TaskCell {
				label: label.into(),
				grace: DEFAULT_GRACE_PERIOD,
				started: AtomicBool::new(true),
				body: Mutex::new(None),
				outcome: Mutex::new(Some(Ok(value))),
				done: Condvar::new(),
			}),
		}
	}
}

impl<T> TaskHandle<T> {
	/// Diagnostic label.
	pub fn label(&self) -> &str {
		&self.inner.label
	}

	/// Returns true once some thread has claimed the body.
	pub fn is_started(&self) -> bool {
		self.inner.started.load(Ordering::Acquire)
	}

	/// Returns true once the outcome is available.
	pub fn is_complete(&self) -> bool {
		self.inner.outcome.lock().is_some()
	}

	/// Returns true when both handles refer to the same task.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Runs the body on the calling thread if nobody has claimed it yet.
	///
	/// Returns `false` when another caller already ran (or is running) it.
	pub fn run(&self) -> bool {
		if self.inner.started.swap(true, Ordering::AcqRel) {
			return false;
		}
		let Some(body) = self.inner.body.lock().take() else {
			return false;
		};

		let key = self.key();
		RUNNING.with(|running| running.borrow_mut().push(key));
		let result = catch_unwind(AssertUnwindSafe(body));
		RUNNING.with(|running| {
			let mut running = running.borrow_mut();
			if let Some(pos) = running.iter().rposition(|k| *k == key) {
				running.remove(pos);
			}
		});

		let outcome = result.map_err(|payload| {
			let msg = panic_message(payload.as_ref());
			tracing::error!(task = %self.inner.label, panic = %msg, "task body panicked");
			TaskError::Panicked(msg)
		});
		*self.inner.outcome.lock() = Some(outcome);
		self.inner.done.notify_all();
		true
	}

	/// Blocks until the task completes.
	///
	/// Runs the body inline when the grace period elapses before any thread
	/// started it. Returns immediately when called from inside the body itself.
	pub fn wait(&self) {
		if self.is_running_here() {
			tracing::warn!(task = %self.inner.label, "task waited on itself; not blocking");
			return;
		}

		let mut outcome = self.inner.outcome.lock();
		while outcome.is_none() {
			let timed_out = self.inner.done.wait_for(&mut outcome, self.inner.grace).timed_out();
			if timed_out && outcome.is_none() && !self.is_started() {
				MutexGuard::unlocked(&mut outcome, || self.run_inline());
			}
		}
	}

	/// Blocks until the task completes or `timeout` elapses.
	///
	/// The inline fallback applies once the grace period has passed inside the
	/// timeout; an inline run is never cut short. Returns whether the task is
	/// complete.
	pub fn wait_for(&self, timeout: Duration) -> bool {
		if self.is_running_here() {
			return false;
		}

		let start = Instant::now();
		let deadline = start + timeout;
		let grace_deadline = start + self.inner.grace;
		let mut outcome = self.inner.outcome.lock();
		while outcome.is_none() {
			let now = Instant::now();
			if now >= deadline {
				return false;
			}
			if now >= grace_deadline && !self.is_started() {
				MutexGuard::unlocked(&mut outcome, || self.run_inline());
				continue;
			}
			let until = if self.is_started() { deadline } else { deadline.min(grace_deadline) };
			self.inner.done.wait_until(&mut outcome, until);
		}
		true
	}

	fn run_inline(&self) {
		if self.run() {
			tracing::debug!(task = %self.inner.label, "worker.task.inline");
		}
	}

	fn key(&self) -> usize {
		Arc::as_ptr(&self.inner) as *const () as usize
	}

	fn is_running_here(&self) -> bool {
		let key = self.key();
		RUNNING.with(|running| running.borrow().contains(&key))
	}
}

impl<T: Clone> TaskHandle<T> {
	/// Waits for completion and returns a clone of the outcome.
	pub fn get(&self) -> Result<T, TaskError> {
		if self.is_running_here() {
			return Err(TaskError::Reentrant);
		}
		self.wait();
		self.try_get().unwrap_or(Err(TaskError::Reentrant))
	}

	/// Returns the outcome if the task already completed.
	pub fn try_get(&self) -> Option<Result<T, TaskError>> {
		self.inner.outcome.lock().clone()
	}
}
