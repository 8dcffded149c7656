//! Fixed-size worker pool draining a FIFO of posted tasks.
//!
//! Workers are plain named OS threads. A pool configured with zero threads (or
//! one whose threads all failed to spawn, or one that has been shut down) runs
//! posted tasks inline on the posting thread.
//!
//! Shutdown does not drain the queue. Tasks still queued are dropped from the
//! queue, but their handles keep the body, so any later waiter runs it inline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{DEFAULT_GRACE_PERIOD, TaskHandle, spawn_named_thread};

#[cfg(test)]
mod tests;

/// Worker pool sizing and naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
	/// Number of worker threads. Zero runs every task inline.
	pub threads: usize,
	/// Grace period given to tasks created through [`WorkerPool::task`].
	pub grace_period: Duration,
	/// Thread name prefix; workers are named `{prefix}-{index}`.
	pub thread_name: String,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			threads: 2,
			grace_period: DEFAULT_GRACE_PERIOD,
			thread_name: "trellis-worker".to_string(),
		}
	}
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
	pub threads: usize,
	pub queued: usize,
	pub shut_down: bool,
}

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Queue {
	jobs: VecDeque<Job>,
	shutdown: bool,
}

#[derive(Default)]
struct Shared {
	queue: Mutex<Queue>,
	available: Condvar,
}

/// Fixed set of worker threads executing [`TaskHandle`]s.
pub struct WorkerPool {
	config: PoolConfig,
	live_workers: usize,
	shared: Arc<Shared>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerPool")
			.field("config", &self.config)
			.field("stats", &self.stats())
			.finish()
	}
}

impl WorkerPool {
	pub fn new(config: PoolConfig) -> Self {
		let shared = Arc::new(Shared::default());
		let mut workers = Vec::with_capacity(config.threads);
		for index in 0..config.threads {
			let worker_shared = Arc::clone(&shared);
			match spawn_named_thread(format!("{}-{index}", config.thread_name), move || worker_loop(&worker_shared)) {
				Ok(handle) => workers.push(handle),
				Err(error) => tracing::warn!(%error, index, "failed to spawn worker thread"),
			}
		}
		tracing::debug!(requested = config.threads, spawned = workers.len(), "worker.pool.start");

		Self {
			live_workers: workers.len(),
			config,
			shared,
			workers: Mutex::new(workers),
		}
	}

	/// Pool without threads: every posted task runs on the posting thread.
	pub fn inline() -> Self {
		Self::new(PoolConfig {
			threads: 0,
			..PoolConfig::default()
		})
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	/// Creates an unposted task carrying this pool's grace period.
	pub fn task<T, F>(&self, label: impl Into<Box<str>>, f: F) -> TaskHandle<T>
	where
		T: Send + 'static,
		F: FnOnce() -> T + Send + 'static,
	{
		TaskHandle::with_grace(label, self.config.grace_period, f)
	}

	/// Queues `task` for a worker. Posting an already started task is harmless.
	pub fn post<T: Send + 'static>(&self, task: &TaskHandle<T>) {
		let mut queue = self.shared.queue.lock();
		if queue.shutdown || self.live_workers == 0 {
			drop(queue);
			tracing::trace!(task = task.label(), "worker.pool.run_inline");
			task.run();
			return;
		}

		let task = task.clone();
		queue.jobs.push_back(Box::new(move || {
			task.run();
		}));
		drop(queue);
		self.shared.available.notify_one();
	}

	/// Creates and posts a task in one step.
	pub fn submit<T, F>(&self, label: impl Into<Box<str>>, f: F) -> TaskHandle<T>
	where
		T: Send + 'static,
		F: FnOnce() -> T + Send + 'static,
	{
		let task = self.task(label, f);
		self.post(&task);
		task
	}

	pub fn stats(&self) -> PoolStats {
		let queue = self.shared.queue.lock();
		PoolStats {
			threads: self.live_workers,
			queued: queue.jobs.len(),
			shut_down: queue.shutdown,
		}
	}

	/// Stops the workers and joins them. Idempotent.
	///
	/// A worker calling this skips joining itself.
	pub fn shutdown(&self) {
		let abandoned = {
			let mut queue = self.shared.queue.lock();
			if queue.shutdown {
				return;
			}
			queue.shutdown = true;
			let abandoned = queue.jobs.len();
			queue.jobs.clear();
			abandoned
		};
		self.shared.available.notify_all();

		let current = std::thread::current().id();
		let workers = std::mem::take(&mut *self.workers.lock());
		for handle in workers {
			if handle.thread().id() == current {
				continue;
			}
			if handle.join().is_err() {
				tracing::warn!("worker thread exited by panic");
			}
		}
		tracing::debug!(abandoned, "worker.pool.shutdown");
	}
}

impl Drop for WorkerPool {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn worker_loop(shared: &Shared) {
	loop {
		let job = {
			let mut queue = shared.queue.lock();
			loop {
				if queue.shutdown {
					return;
				}
				if let Some(job) = queue.jobs.pop_front() {
					break job;
				}
				shared.available.wait(&mut queue);
			}
		};
		job();
	}
}
