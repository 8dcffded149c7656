//! Component configurations: one live instance of a component for one
//! property set.
//!
//! # Mental model
//!
//! A configuration never changes state on the thread that asked for the
//! change. Callers enqueue a [`Request`] and the [`Coordinator`] schedules a
//! single transition task that drains the queue in batches until it is empty.
//! While that task exists the configuration is "in transition": further
//! requests only queue, so a cascade that loops back onto a configuration can
//! never re-enter it synchronously.
//!
//! # Locking
//!
//! `state` is held only for bookkeeping. Every user callback, registry
//! mutation and nested [`ServiceRegistry::get_service`] runs with it released.
//!
//! # Deferred announcement
//!
//! Provided services are registered deferred while the transition runs and
//! announced after the in-transition flag clears. Listeners reacting to the
//! `Registered` event therefore find this configuration idle and can request
//! its activation without waiting on the task that registered it.
//!
//! # Scoped services
//!
//! A bundle or prototype scoped component still has one primary instance,
//! which tracks the reference managers and is handed to the first client.
//! Further clients get instances built inside a transition from the bound
//! set of the moment; they follow every later rebind, modification and
//! deactivation of the primary.

mod state;

use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use trellis_registry::{
	BundleId, InterfaceMap, Properties, ServiceEvent, ServiceFactory, ServiceId, ServiceReference, ServiceRegistry,
	keys,
};
use trellis_worker::{TaskHandle, WorkerPool, panic_message};

pub use self::state::ComponentState;
use crate::component::{Component, ComponentInstance, ComponentResult, Constructor, ConstructorContext};
use crate::coordinator::Coordinator;
use crate::description::{Cardinality, ComponentDescription, ConfigurationPolicy, ServiceScope};
use crate::dto::{ComponentConfigurationDto, SatisfiedReferenceDto, UnsatisfiedReferenceDto};
use crate::reference::{ActiveOutcome, RefEvent, ReferenceManager, WireOp};
use crate::{BoundService, Bundle, ComponentContext, Result, ScrError, ServiceComponentRuntime};

thread_local! {
	/// Depth of configuration transitions running on this thread.
	static TRANSITION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Returns true when the calling thread is inside a configuration transition.
pub(crate) fn in_transition_here() -> bool {
	TRANSITION_DEPTH.with(Cell::get) > 0
}

struct DepthGuard;

impl DepthGuard {
	fn enter() -> Self {
		TRANSITION_DEPTH.with(|depth| depth.set(depth.get() + 1));
		Self
	}
}

impl Drop for DepthGuard {
	fn drop(&mut self) {
		TRANSITION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
	}
}

/// Work queued on a configuration.
#[derive(Debug)]
pub(crate) enum Request {
	/// Re-check satisfaction.
	Evaluate,
	/// A reference manager's candidate set changed.
	Reference { index: usize, event: RefEvent },
	/// Activate now if satisfied, regardless of activation policy.
	Activate,
	/// New configuration properties; `None` reverts to the defaults.
	Configure(Option<Properties>),
	/// Service objects for `bundle` under a bundle or prototype scope,
	/// activating first. `reply` stays empty when that fails.
	Instantiate { bundle: BundleId, reply: ServiceSlot },
	Dispose,
}

pub(crate) type ServiceSlot = Arc<Mutex<Option<InterfaceMap>>>;

/// Outcome of asking a configuration to schedule its queue.
pub(crate) enum Scheduled {
	/// A new transition task was created; the caller must dispatch it.
	Started(TaskHandle<()>),
	/// A transition is already running and will pick the queue up.
	InFlight(TaskHandle<()>),
	/// Nothing to do.
	Idle,
}

struct LiveInstance {
	component: Arc<dyn Component>,
	services: InterfaceMap,
	context: ComponentContext,
	/// First client of a scoped service, which receives this instance.
	owner: Option<BundleId>,
}

/// Extra instance of a bundle or prototype scoped component.
struct ScopedInstance {
	bundle: BundleId,
	component: Arc<dyn Component>,
	services: InterfaceMap,
	context: ComponentContext,
}

struct ConfigState {
	lifecycle: ComponentState,
	properties: Arc<Properties>,
	configuration: Option<Properties>,
	instance: Option<LiveInstance>,
	scoped: Vec<ScopedInstance>,
	registration: Option<ServiceReference>,
	in_transition: bool,
	transition_thread: Option<ThreadId>,
	current: Option<TaskHandle<()>>,
	queue: VecDeque<Request>,
	pending_announce: Vec<ServiceId>,
}

pub(crate) struct ComponentConfiguration {
	id: u64,
	description: Arc<ComponentDescription>,
	bundle: Bundle,
	constructor: Constructor,
	references: Vec<ReferenceManager>,
	coordinator: Arc<Coordinator>,
	runtime: Weak<ServiceComponentRuntime>,
	self_ref: Weak<ComponentConfiguration>,
	state: Mutex<ConfigState>,
}

/// Component properties: description defaults, then configuration (unless
/// ignored), then the component identity keys.
pub(crate) fn merged_properties(
	description: &ComponentDescription,
	configuration: Option<&Properties>,
	id: u64,
) -> Properties {
	let mut properties = description.properties.clone();
	if description.configuration_policy != ConfigurationPolicy::Ignore
		&& let Some(configuration) = configuration
	{
		properties.merge(configuration);
	}
	properties.insert(keys::COMPONENT_NAME, description.name.as_str());
	properties.insert(keys::COMPONENT_ID, i64::try_from(id).unwrap_or(i64::MAX));
	properties.insert(keys::SERVICE_SCOPE, description.scope.as_str());
	properties
}

/// Effective target filter of each reference under `configuration`.
pub(crate) fn reference_targets(
	description: &ComponentDescription,
	configuration: Option<&Properties>,
) -> Vec<Option<String>> {
	let properties = merged_properties(description, configuration, 0);
	description
		.references
		.iter()
		.map(|reference| reference.retargeted(&properties).target)
		.collect()
}

impl ComponentConfiguration {
	pub(crate) fn new(
		id: u64,
		description: Arc<ComponentDescription>,
		bundle: Bundle,
		constructor: Constructor,
		coordinator: Arc<Coordinator>,
		runtime: Weak<ServiceComponentRuntime>,
		configuration: Option<Properties>,
	) -> Result<Arc<Self>> {
		let configuration = match description.configuration_policy {
			ConfigurationPolicy::Ignore => None,
			_ => configuration,
		};
		let properties = Arc::new(merged_properties(&description, configuration.as_ref(), id));

		let references = description
			.references
			.iter()
			.map(|reference| {
				ReferenceManager::new(reference, id, &properties).map_err(|err| ScrError::InvalidDescription {
					component: description.name.clone(),
					reason: format!("reference {} has a bad target: {err}", reference.name),
				})
			})
			.collect::<Result<Vec<_>>>()?;

		Ok(Arc::new_cyclic(|self_ref| Self {
			id,
			bundle,
			constructor,
			references,
			coordinator,
			runtime,
			self_ref: self_ref.clone(),
			state: Mutex::new(ConfigState {
				lifecycle: ComponentState::Disabled,
				properties,
				configuration,
				instance: None,
				scoped: Vec::new(),
				registration: None,
				in_transition: false,
				transition_thread: None,
				current: None,
				queue: VecDeque::new(),
				pending_announce: Vec::new(),
			}),
			description,
		}))
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn name(&self) -> &str {
		&self.description.name
	}

	pub(crate) fn references(&self) -> &[ReferenceManager] {
		&self.references
	}

	pub(crate) fn reference(&self, name: &str) -> Option<&ReferenceManager> {
		self.references.iter().find(|rm| rm.name() == name)
	}

	pub(crate) fn lifecycle(&self) -> ComponentState {
		self.state.lock().lifecycle
	}

	pub(crate) fn properties(&self) -> Arc<Properties> {
		Arc::clone(&self.state.lock().properties)
	}

	pub(crate) fn registration(&self) -> Option<ServiceReference> {
		self.state.lock().registration.clone()
	}

	fn registry(&self) -> &ServiceRegistry {
		self.coordinator.registry()
	}

	/// Folds `event` into reference manager `index` and queues the change.
	/// Both happen under the state lock so the queue keeps registry order.
	pub(crate) fn track(&self, index: usize, event: &ServiceEvent) -> bool {
		let mut state = self.state.lock();
		let Some(change) = self.references[index].track(event, self.registry()) else {
			return false;
		};
		state.queue.push_back(Request::Reference { index, event: change });
		true
	}

	pub(crate) fn enqueue(&self, request: Request) {
		self.state.lock().queue.push_back(request);
	}

	/// Claims the transition slot if the queue has work and nobody holds it.
	pub(crate) fn schedule(self: &Arc<Self>, pool: &WorkerPool) -> Scheduled {
		let mut state = self.state.lock();
		if state.in_transition {
			return state.current.clone().map_or(Scheduled::Idle, Scheduled::InFlight);
		}
		if state.queue.is_empty() {
			return Scheduled::Idle;
		}
		state.in_transition = true;
		let config = Arc::clone(self);
		let task = pool.task(format!("scr.transition.{}", self.description.name), move || config.run_transitions());
		state.current = Some(task.clone());
		Scheduled::Started(task)
	}

	/// Body of a transition task: drains the queue, then announces the
	/// services registered along the way.
	fn run_transitions(self: &Arc<Self>) {
		let _depth = DepthGuard::enter();
		let _span = tracing::debug_span!("scr.transition", component = %self.description.name, config_id = self.id)
			.entered();
		self.state.lock().transition_thread = Some(thread::current().id());

		let announce = loop {
			let batch: Vec<Request> = {
				let mut state = self.state.lock();
				if state.queue.is_empty() {
					state.in_transition = false;
					state.transition_thread = None;
					state.current = None;
					break std::mem::take(&mut state.pending_announce);
				}
				state.queue.drain(..).collect()
			};
			self.process(batch);
		};

		for id in announce {
			self.registry().announce(id);
		}
	}

	fn process(self: &Arc<Self>, batch: Vec<Request>) {
		if self.lifecycle() == ComponentState::Disposed {
			tracing::trace!(dropped = batch.len(), "scr.transition.disposed");
			return;
		}

		let mut activate_now = false;
		let mut restart = false;
		let mut wanted: Vec<(BundleId, ServiceSlot)> = Vec::new();
		for request in batch {
			match request {
				Request::Dispose => {
					self.dispose();
					return;
				}
				Request::Evaluate => {}
				Request::Activate => activate_now = true,
				Request::Instantiate { bundle, reply } => {
					activate_now = true;
					wanted.push((bundle, reply));
				}
				Request::Reference { index, event } => {
					if restart {
						continue;
					}
					match self.references[index].on_active(&event) {
						ActiveOutcome::Unchanged => {}
						ActiveOutcome::Rewire(ops) => {
							if !self.rewire(index, ops) {
								restart = true;
							}
						}
						ActiveOutcome::Reactivate => {
							restart = true;
							activate_now = true;
						}
						ActiveOutcome::Deactivate => restart = true,
					}
				}
				Request::Configure(configuration) => {
					if self.apply_configuration(configuration) {
						restart = true;
						activate_now = true;
					}
				}
			}
		}

		if restart && self.lifecycle() == ComponentState::Active {
			self.deactivate(ComponentState::UnsatisfiedReference);
		}
		self.evaluate(activate_now);

		for (bundle, reply) in wanted {
			*reply.lock() = self.instance_for(bundle);
		}
	}

	fn set_state(&self, next: ComponentState) {
		let previous = std::mem::replace(&mut self.state.lock().lifecycle, next);
		if !previous.can_transition(next) {
			tracing::warn!(component = %self.description.name, config_id = self.id, %previous, %next, "unexpected state transition");
		}
		tracing::debug!(component = %self.description.name, config_id = self.id, %previous, %next, "scr.state");
	}

	fn is_satisfied(&self) -> bool {
		let configured = self.description.configuration_policy != ConfigurationPolicy::Require
			|| self.state.lock().configuration.is_some();
		configured && self.references.iter().all(ReferenceManager::is_satisfied)
	}

	fn evaluate(&self, activate_now: bool) {
		if self.lifecycle() == ComponentState::Disabled {
			self.set_state(ComponentState::UnsatisfiedReference);
		}
		let satisfied = self.is_satisfied();
		let wants_activation = activate_now || self.description.activates_eagerly();

		match self.lifecycle() {
			ComponentState::UnsatisfiedReference if satisfied => {
				self.set_state(ComponentState::Satisfied);
				self.register_service();
				if wants_activation {
					self.activate();
				}
			}
			ComponentState::Satisfied if !satisfied => {
				self.unregister_service();
				self.set_state(ComponentState::UnsatisfiedReference);
			}
			ComponentState::Satisfied if wants_activation => self.activate(),
			ComponentState::Active if !satisfied => self.deactivate(ComponentState::UnsatisfiedReference),
			_ => {}
		}
	}

	fn register_service(&self) {
		if self.description.provides.is_empty() {
			return;
		}
		let properties = Properties::clone(&self.properties());
		let factory: Arc<dyn ServiceFactory> = Arc::new(ConfigurationServiceFactory {
			config: self.self_ref.clone(),
		});
		let registered = self.registry().register_deferred(
			self.bundle.id(),
			self.description.provides.iter().map(String::as_str),
			properties,
			factory,
		);
		match registered {
			Ok(reference) => {
				tracing::debug!(component = %self.description.name, service_id = %reference.id(), "scr.register");
				let mut state = self.state.lock();
				state.pending_announce.push(reference.id());
				state.registration = Some(reference);
			}
			Err(error) => {
				tracing::error!(component = %self.description.name, %error, "failed to register component service");
			}
		}
	}

	fn unregister_service(&self) {
		let registration = self.state.lock().registration.take();
		if let Some(reference) = registration {
			tracing::debug!(component = %self.description.name, service_id = %reference.id(), "scr.unregister");
			self.registry().unregister(reference.id());
		}
	}

	fn resolve(&self, rm: &ReferenceManager, reference: &ServiceReference) -> Option<BoundService> {
		match self.registry().get_service(reference, self.bundle.id()) {
			Some(services) => Some(rm.binding(reference.clone(), services)),
			None => {
				tracing::warn!(
					component = %self.description.name,
					reference = rm.name(),
					service_id = %reference.id(),
					"bound service could not be resolved"
				);
				None
			}
		}
	}

	fn context(&self) -> ComponentContext {
		ComponentContext::new(self.self_ref.clone(), self.runtime.clone(), self.bundle.clone(), self.id)
	}

	/// Runs user code, mapping errors and panics to `None`.
	fn guarded<T>(&self, callback: &'static str, f: impl FnOnce() -> ComponentResult<T>) -> Option<T> {
		match catch_unwind(AssertUnwindSafe(f)) {
			Ok(Ok(value)) => Some(value),
			Ok(Err(error)) => {
				tracing::error!(
					component = %self.description.name,
					config_id = self.id,
					callback,
					error = %error,
					"component callback failed"
				);
				None
			}
			Err(payload) => {
				tracing::error!(
					component = %self.description.name,
					config_id = self.id,
					callback,
					panic = %panic_message(payload.as_ref()),
					"component callback panicked"
				);
				None
			}
		}
	}

	fn call_user(&self, callback: &'static str, f: impl FnOnce() -> ComponentResult) -> bool {
		self.guarded(callback, f).is_some()
	}

	fn live(&self) -> Option<(Arc<dyn Component>, ComponentContext)> {
		let state = self.state.lock();
		let live = state.instance.as_ref()?;
		Some((Arc::clone(&live.component), live.context.clone()))
	}

	fn activate(&self) {
		self.set_state(ComponentState::Activating);

		let mut resolved: Vec<Vec<BoundService>> = Vec::with_capacity(self.references.len());
		for rm in &self.references {
			let bound: Vec<BoundService> = rm.candidates().iter().filter_map(|r| self.resolve(rm, r)).collect();
			if bound.len() < rm.description().cardinality.min() {
				tracing::warn!(
					component = %self.description.name,
					reference = rm.name(),
					"mandatory reference unresolvable; activation abandoned"
				);
				self.fail_activation();
				return;
			}
			resolved.push(bound);
		}

		let Some(instance) = self.construct(&resolved) else {
			tracing::warn!(component = %self.description.name, "construction failed; falling back to unsatisfied");
			self.fail_activation();
			return;
		};

		for (rm, bound) in self.references.iter().zip(resolved) {
			rm.activate_bindings(bound);
		}
		let component = Arc::clone(&instance.component);
		let context = self.context();
		self.state.lock().instance = Some(LiveInstance {
			component: Arc::clone(&component),
			services: instance.services,
			context: context.clone(),
			owner: None,
		});

		for rm in &self.references {
			for bound in rm.bound() {
				self.call_user("bind", || component.bind(rm.name(), &bound));
			}
		}

		if !self.call_user("activate", || component.activate(&context)) {
			tracing::warn!(component = %self.description.name, "activate failed; falling back to unsatisfied");
			self.unbind_all(component.as_ref());
			self.state.lock().instance = None;
			self.fail_activation();
			return;
		}
		self.set_state(ComponentState::Active);
		tracing::debug!(component = %self.description.name, config_id = self.id, "scr.activate");
	}

	/// Runs the constructor with `resolved` bindings, one list per reference.
	fn construct(&self, resolved: &[Vec<BoundService>]) -> Option<ComponentInstance> {
		let properties = self.properties();
		let injected: Vec<(String, BoundService)> = if self.description.inject_references {
			self.references
				.iter()
				.zip(resolved)
				.filter(|(rm, _)| rm.description().cardinality == Cardinality::Mandatory)
				.filter_map(|(rm, bound)| Some((rm.name().to_string(), bound.first()?.clone())))
				.collect()
		} else {
			Vec::new()
		};
		let cx = ConstructorContext {
			properties: &properties,
			injected: &injected,
		};
		let instance = self.guarded("construct", || (self.constructor)(&cx))?;
		for interface in &self.description.provides {
			if !instance.services.contains(interface) {
				tracing::warn!(component = %self.description.name, interface, "instance does not provide a declared interface");
			}
		}
		Some(instance)
	}

	/// Service objects handed to `bundle`. Only meaningful inside a
	/// transition, once the configuration is active.
	fn instance_for(&self, bundle: BundleId) -> Option<InterfaceMap> {
		let scope = self.description.scope;
		{
			let mut state = self.state.lock();
			if state.lifecycle != ComponentState::Active {
				return None;
			}
			if scope == ServiceScope::Bundle
				&& let Some(found) = state.scoped.iter().find(|s| s.bundle == bundle)
			{
				return Some(found.services.clone());
			}
			let live = state.instance.as_mut()?;
			match live.owner {
				None => {
					live.owner = Some(bundle);
					return Some(live.services.clone());
				}
				Some(owner) if scope == ServiceScope::Singleton || (scope == ServiceScope::Bundle && owner == bundle) => {
					return Some(live.services.clone());
				}
				Some(_) => {}
			}
		}
		self.spawn_scoped(bundle)
	}

	/// Builds, binds and activates one more instance for `bundle`.
	fn spawn_scoped(&self, bundle: BundleId) -> Option<InterfaceMap> {
		let bound: Vec<Vec<BoundService>> = self.references.iter().map(ReferenceManager::bound).collect();
		let instance = self.construct(&bound)?;
		let component = Arc::clone(&instance.component);
		let context = self.context();
		for (rm, services) in self.references.iter().zip(&bound) {
			for service in services {
				self.call_user("bind", || component.bind(rm.name(), service));
			}
		}
		if !self.call_user("activate", || component.activate(&context)) {
			self.unbind_from(component.as_ref(), &bound);
			return None;
		}
		tracing::debug!(
			component = %self.description.name,
			config_id = self.id,
			%bundle,
			scope = self.description.scope.as_str(),
			"scr.instance"
		);
		self.state.lock().scoped.push(ScopedInstance {
			bundle,
			component,
			services: instance.services.clone(),
			context,
		});
		Some(instance.services)
	}

	/// Deactivates and unbinds every extra scoped instance, newest first.
	fn release_scoped(&self) {
		let scoped = std::mem::take(&mut self.state.lock().scoped);
		if scoped.is_empty() {
			return;
		}
		let bound: Vec<Vec<BoundService>> = self.references.iter().map(ReferenceManager::bound).collect();
		for instance in scoped.iter().rev() {
			self.call_user("deactivate", || instance.component.deactivate(&instance.context));
			self.unbind_from(instance.component.as_ref(), &bound);
		}
		tracing::debug!(component = %self.description.name, released = scoped.len(), "scr.instance.release");
	}

	fn scoped_instances(&self) -> Vec<(Arc<dyn Component>, ComponentContext)> {
		let state = self.state.lock();
		state
			.scoped
			.iter()
			.map(|s| (Arc::clone(&s.component), s.context.clone()))
			.collect()
	}

	fn fail_activation(&self) {
		self.unregister_service();
		self.set_state(ComponentState::UnsatisfiedReference);
	}

	/// Unbinds a snapshot of the bound sets without touching the managers.
	fn unbind_from(&self, component: &dyn Component, bound: &[Vec<BoundService>]) {
		for (rm, services) in self.references.iter().zip(bound).rev() {
			for service in services.iter().rev() {
				self.call_user("unbind", || component.unbind(rm.name(), service));
			}
		}
	}

	/// Unbinds in reverse declaration order, each reference LIFO.
	fn unbind_all(&self, component: &dyn Component) {
		for rm in self.references.iter().rev() {
			for bound in rm.deactivate_bindings() {
				self.call_user("unbind", || component.unbind(rm.name(), &bound));
			}
		}
	}

	/// Tears down the live instance and leaves the configuration in `next`:
	/// `UnsatisfiedReference` when it may come back, `Disabled` on the way
	/// to disposal.
	fn deactivate(&self, next: ComponentState) {
		let Some((component, context)) = self.live() else {
			return;
		};
		self.set_state(ComponentState::Deactivating);
		self.unregister_service();
		self.release_scoped();
		self.call_user("deactivate", || component.deactivate(&context));
		self.unbind_all(component.as_ref());
		self.state.lock().instance = None;
		self.set_state(next);
		tracing::debug!(component = %self.description.name, config_id = self.id, "scr.deactivate");
	}

	/// Applies binding changes to the live instance. Returns false when a
	/// mandatory reference ended up below its floor.
	fn rewire(&self, index: usize, ops: Vec<WireOp>) -> bool {
		let rm = &self.references[index];
		let Some((component, _)) = self.live() else {
			return rm.is_satisfied();
		};
		let scoped = self.scoped_instances();
		for op in ops {
			match op {
				WireOp::Bind(reference) => {
					let Some(bound) = self.resolve(rm, &reference) else {
						continue;
					};
					rm.push_binding(bound.clone());
					tracing::trace!(reference = rm.name(), service_id = %bound.id(), "scr.bind");
					self.call_user("bind", || component.bind(rm.name(), &bound));
					for (extra, _) in &scoped {
						self.call_user("bind", || extra.bind(rm.name(), &bound));
					}
				}
				WireOp::Unbind(reference) => {
					if let Some(bound) = rm.remove_binding(reference.id()) {
						tracing::trace!(reference = rm.name(), service_id = %bound.id(), "scr.unbind");
						self.call_user("unbind", || component.unbind(rm.name(), &bound));
						for (extra, _) in &scoped {
							self.call_user("unbind", || extra.unbind(rm.name(), &bound));
						}
					}
				}
			}
		}
		rm.is_satisfied()
	}

	/// Stores new configuration properties. Returns true when the instance
	/// must be deactivated and activated again.
	fn apply_configuration(&self, configuration: Option<Properties>) -> bool {
		let properties = Arc::new(merged_properties(&self.description, configuration.as_ref(), self.id));
		let registration = {
			let mut state = self.state.lock();
			state.configuration = configuration;
			state.properties = Arc::clone(&properties);
			state.registration.clone()
		};

		let Some((component, context)) = self.live() else {
			self.update_registration(registration, &properties);
			return false;
		};
		if !self.description.modified {
			return true;
		}
		let modified = self.call_user("modified", || component.modified(&context, &properties))
			&& self
				.scoped_instances()
				.iter()
				.all(|(extra, cx)| self.call_user("modified", || extra.modified(cx, &properties)));
		if modified {
			self.update_registration(registration, &properties);
			false
		} else {
			tracing::warn!(component = %self.description.name, "modified failed; reactivating");
			true
		}
	}

	fn update_registration(&self, registration: Option<ServiceReference>, properties: &Properties) {
		if let Some(reference) = registration {
			self.registry().set_properties(reference.id(), properties.clone());
		}
	}

	/// Disposal always passes through `Disabled`.
	fn dispose(&self) {
		match self.lifecycle() {
			ComponentState::Active => self.deactivate(ComponentState::Disabled),
			ComponentState::Disabled => {}
			_ => {
				self.unregister_service();
				self.set_state(ComponentState::Disabled);
			}
		}
		self.set_state(ComponentState::Disposed);
		for rm in &self.references {
			rm.clear();
		}
		let mut state = self.state.lock();
		state.queue.clear();
		state.configuration = None;
	}

	/// Service objects for a client of the provided service, activating the
	/// configuration on first use.
	///
	/// Returns `None` when the configuration cannot be activated, or when the
	/// calling thread is already transitioning it (a circular dependency).
	fn services_for_use(self: &Arc<Self>, bundle: BundleId) -> Option<InterfaceMap> {
		const ATTEMPTS: usize = 3;
		if self.description.scope != ServiceScope::Singleton {
			return self.scoped_for_use(bundle);
		}
		for _ in 0..ATTEMPTS {
			let pending = {
				let state = self.state.lock();
				if let (ComponentState::Active, Some(live)) = (state.lifecycle, &state.instance) {
					return Some(live.services.clone());
				}
				if self.refuses_use(&state) {
					return None;
				}
				state.current.clone()
			};
			match pending {
				Some(task) => task.wait(),
				None => self.coordinator.request_for_use(self, Request::Activate).wait(),
			}
		}

		let state = self.state.lock();
		match (state.lifecycle, &state.instance) {
			(ComponentState::Active, Some(live)) => Some(live.services.clone()),
			_ => None,
		}
	}

	/// Bundle and prototype scope. Every lookup is a transition, so a new
	/// instance is built against a bound set no rebind is changing.
	fn scoped_for_use(self: &Arc<Self>, bundle: BundleId) -> Option<InterfaceMap> {
		if self.refuses_use(&self.state.lock()) {
			return None;
		}
		let reply = ServiceSlot::default();
		let request = Request::Instantiate {
			bundle,
			reply: Arc::clone(&reply),
		};
		self.coordinator.request_for_use(self, request).wait();
		reply.lock().take()
	}

	/// True when a lookup cannot activate this configuration right now.
	fn refuses_use(&self, state: &ConfigState) -> bool {
		if matches!(
			state.lifecycle,
			ComponentState::Disabled | ComponentState::UnsatisfiedReference | ComponentState::Disposed
		) {
			return true;
		}
		if state.in_transition && state.transition_thread == Some(thread::current().id()) {
			tracing::warn!(
				component = %self.description.name,
				config_id = self.id,
				"circular dependency: service requested while its component is activating on this thread"
			);
			return true;
		}
		false
	}

	pub(crate) fn dto(&self) -> ComponentConfigurationDto {
		let (lifecycle, properties, service) = {
			let state = self.state.lock();
			(
				state.lifecycle,
				Properties::clone(&state.properties),
				state.registration.as_ref().map(ServiceReference::id),
			)
		};

		let mut satisfied_references = Vec::new();
		let mut unsatisfied_references = Vec::new();
		for rm in &self.references {
			let target = rm.filter().to_string();
			if rm.is_satisfied() {
				let bound = rm.bound();
				let bound_services = if bound.is_empty() {
					rm.candidates().iter().map(ServiceReference::id).collect()
				} else {
					bound.iter().map(BoundService::id).collect()
				};
				satisfied_references.push(SatisfiedReferenceDto {
					name: rm.name().to_string(),
					target,
					bound_services,
				});
			} else {
				unsatisfied_references.push(UnsatisfiedReferenceDto {
					name: rm.name().to_string(),
					target,
					target_services: rm.matched().iter().map(ServiceReference::id).collect(),
				});
			}
		}

		ComponentConfigurationDto {
			id: self.id,
			name: self.description.name.clone(),
			state: lifecycle,
			properties,
			service,
			satisfied_references,
			unsatisfied_references,
		}
	}
}

impl std::fmt::Debug for ComponentConfiguration {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComponentConfiguration")
			.field("id", &self.id)
			.field("name", &self.description.name)
			.field("state", &self.lifecycle())
			.finish_non_exhaustive()
	}
}

/// Registered in place of a delayed component's service object; the first
/// lookup activates the configuration.
struct ConfigurationServiceFactory {
	config: Weak<ComponentConfiguration>,
}

impl ServiceFactory for ConfigurationServiceFactory {
	fn get_service(&self, bundle: BundleId, reference: &ServiceReference) -> Option<InterfaceMap> {
		let config = self.config.upgrade()?;
		tracing::trace!(component = %config.description.name, service_id = %reference.id(), %bundle, "scr.get_service");
		config.services_for_use(bundle)
	}
}
