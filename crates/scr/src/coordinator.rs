//! Fan-out of registry events to the configurations that depend on them.
//!
//! The coordinator is the runtime's only registry listener. It keeps an index
//! from interface name to the reference managers tracking it, folds each event
//! into those managers, queues the resulting changes on their configurations
//! and then drives every affected configuration.
//!
//! Driving means scheduling the configuration's transition task. Top-level
//! callers post it to the pool and wait; a thread that is already inside a
//! transition runs it inline, which keeps a cascade on one thread so a cycle
//! back onto a configuration is seen as such instead of as a cross-thread
//! wait.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use trellis_registry::{ListenerToken, ServiceEvent, ServiceListener, ServiceRegistry};
use trellis_worker::{TaskHandle, WorkerPool};

use crate::configuration::{self, ComponentConfiguration, Request, Scheduled};

struct Tracked {
	config: Weak<ComponentConfiguration>,
	config_id: u64,
	reference: usize,
}

pub(crate) struct Coordinator {
	registry: Arc<ServiceRegistry>,
	pool: Arc<WorkerPool>,
	index: RwLock<FxHashMap<Box<str>, Vec<Tracked>>>,
	listener: Mutex<Option<ListenerToken>>,
}

/// Registry listener forwarding to a coordinator without keeping it alive.
struct CoordinatorListener(Weak<Coordinator>);

impl ServiceListener for CoordinatorListener {
	fn service_changed(&self, event: &ServiceEvent) {
		if let Some(coordinator) = self.0.upgrade() {
			coordinator.on_service_event(event);
		}
	}
}

impl Coordinator {
	pub(crate) fn new(registry: Arc<ServiceRegistry>, pool: Arc<WorkerPool>) -> Arc<Self> {
		let coordinator = Arc::new(Self {
			registry,
			pool,
			index: RwLock::new(FxHashMap::default()),
			listener: Mutex::new(None),
		});
		let token = coordinator
			.registry
			.add_listener(Arc::new(CoordinatorListener(Arc::downgrade(&coordinator))), None);
		*coordinator.listener.lock() = Some(token);
		coordinator
	}

	pub(crate) fn registry(&self) -> &Arc<ServiceRegistry> {
		&self.registry
	}

	pub(crate) fn pool(&self) -> &Arc<WorkerPool> {
		&self.pool
	}

	/// Starts routing events to `config` and seeds its reference managers.
	pub(crate) fn attach(&self, config: &Arc<ComponentConfiguration>) {
		{
			let mut index = self.index.write();
			for (reference, rm) in config.references().iter().enumerate() {
				index.entry(Box::from(rm.interface())).or_default().push(Tracked {
					config: Arc::downgrade(config),
					config_id: config.id(),
					reference,
				});
			}
		}
		for rm in config.references() {
			rm.seed(&self.registry);
		}
		tracing::trace!(component = config.name(), config_id = config.id(), "scr.coordinator.attach");
	}

	pub(crate) fn detach(&self, config_id: u64) {
		let mut index = self.index.write();
		index.retain(|_, tracked| {
			tracked.retain(|t| t.config_id != config_id);
			!tracked.is_empty()
		});
	}

	fn on_service_event(&self, event: &ServiceEvent) {
		let mut affected: SmallVec<[Arc<ComponentConfiguration>; 4]> = SmallVec::new();
		{
			let index = self.index.read();
			for interface in event.reference.interfaces() {
				let Some(tracked) = index.get(interface) else {
					continue;
				};
				for entry in tracked {
					let Some(config) = entry.config.upgrade() else {
						continue;
					};
					if !config.track(entry.reference, event) {
						continue;
					}
					if !affected.iter().any(|c| Arc::ptr_eq(c, &config)) {
						affected.push(config);
					}
				}
			}
		}

		if !affected.is_empty() {
			tracing::trace!(
				service_id = %event.reference.id(),
				kind = ?event.kind,
				affected = affected.len(),
				"scr.coordinator.fanout"
			);
		}
		for config in affected {
			self.drive(&config);
		}
	}

	/// Runs `config`'s queue and waits for it, so the caller's registry
	/// mutation returns only after dependents have reacted.
	///
	/// A thread that is itself inside a transition does not wait on a run in
	/// flight elsewhere: that run may be waiting on this thread's transition,
	/// and it drains the queued event anyway.
	pub(crate) fn drive(&self, config: &Arc<ComponentConfiguration>) {
		loop {
			match config.schedule(&self.pool) {
				Scheduled::Started(task) => {
					self.dispatch(&task);
					task.wait();
					return;
				}
				Scheduled::InFlight(_) if configuration::in_transition_here() => return,
				// the run may finish just before picking up later work; reschedule after it
				Scheduled::InFlight(task) => task.wait(),
				Scheduled::Idle => return,
			}
		}
	}

	/// Queues `request` and returns the task that will process it. Posts to
	/// the pool and never blocks the caller.
	pub(crate) fn submit(&self, config: &Arc<ComponentConfiguration>, request: Request) -> TaskHandle<()> {
		config.enqueue(request);
		match config.schedule(&self.pool) {
			Scheduled::Started(task) => {
				self.pool.post(&task);
				task
			}
			Scheduled::InFlight(task) => task,
			Scheduled::Idle => TaskHandle::completed("scr.idle", ()),
		}
	}

	/// Like [`Self::submit`], but dispatched inline when called from inside a
	/// transition. Used for service lookups that must activate.
	pub(crate) fn request_for_use(&self, config: &Arc<ComponentConfiguration>, request: Request) -> TaskHandle<()> {
		config.enqueue(request);
		match config.schedule(&self.pool) {
			Scheduled::Started(task) => {
				self.dispatch(&task);
				task
			}
			Scheduled::InFlight(task) => task,
			Scheduled::Idle => TaskHandle::completed("scr.idle", ()),
		}
	}

	fn dispatch(&self, task: &TaskHandle<()>) {
		if configuration::in_transition_here() {
			task.run();
		} else {
			self.pool.post(task);
		}
	}

	/// Single handle completing once every task in `tasks` has.
	pub(crate) fn join(&self, label: &str, tasks: Vec<TaskHandle<()>>) -> TaskHandle<()> {
		match <[TaskHandle<()>; 1]>::try_from(tasks) {
			Ok([task]) => task,
			Err(tasks) if tasks.iter().all(TaskHandle::is_complete) => TaskHandle::completed(label, ()),
			Err(tasks) => self.pool.submit(label, move || {
				for task in tasks {
					task.wait();
				}
			}),
		}
	}

	/// Stops listening to the registry. Idempotent.
	pub(crate) fn shutdown(&self) {
		if let Some(token) = self.listener.lock().take() {
			self.registry.remove_listener(token);
		}
		self.index.write().clear();
	}
}
