//! The service component runtime facade.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use trellis_registry::{BundleId, IdClock, Properties, ServiceRegistry};
use trellis_worker::{TaskHandle, WorkerPool};

use crate::coordinator::Coordinator;
use crate::dto::{ComponentConfigurationDto, ComponentDescriptionDto};
use crate::manager::ComponentManager;
use crate::{
	Bundle, ComponentDescription, ComponentInstance, ComponentResult, ConstructorContext, Result, ScrError,
};

/// Declares components and drives their lifecycle against a registry.
///
/// Components are keyed by name, in declaration order.
pub struct ServiceComponentRuntime {
	coordinator: Arc<Coordinator>,
	components: RwLock<IndexMap<String, Arc<ComponentManager>>>,
	ids: Arc<IdClock>,
	self_ref: Weak<ServiceComponentRuntime>,
}

impl ServiceComponentRuntime {
	pub fn new(registry: Arc<ServiceRegistry>, pool: Arc<WorkerPool>) -> Arc<Self> {
		let coordinator = Coordinator::new(registry, pool);
		Arc::new_cyclic(|self_ref| Self {
			coordinator,
			components: RwLock::new(IndexMap::new()),
			ids: Arc::new(IdClock::new()),
			self_ref: self_ref.clone(),
		})
	}

	pub fn registry(&self) -> &Arc<ServiceRegistry> {
		self.coordinator.registry()
	}

	pub fn pool(&self) -> &Arc<WorkerPool> {
		self.coordinator.pool()
	}

	/// Declares a component owned by `bundle` and, when the description is
	/// enabled by default, enables it and waits for the first evaluation.
	pub fn declare_component<F>(&self, bundle: &Bundle, description: ComponentDescription, constructor: F) -> Result<()>
	where
		F: Fn(&ConstructorContext<'_>) -> ComponentResult<ComponentInstance> + Send + Sync + 'static,
	{
		description.validate()?;
		let name = description.name.clone();
		let enabled = description.enabled;

		let manager = {
			let mut components = self.components.write();
			if components.contains_key(&name) {
				return Err(ScrError::DuplicateComponent(name));
			}
			let manager = Arc::new(ComponentManager::new(
				description,
				bundle.clone(),
				Arc::new(constructor),
				Arc::clone(&self.coordinator),
				self.self_ref.clone(),
				Arc::clone(&self.ids),
			));
			components.insert(name.clone(), Arc::clone(&manager));
			manager
		};
		tracing::debug!(component = %name, bundle = %bundle.id(), "scr.declare");

		if enabled {
			manager.enable()?.wait();
		}
		Ok(())
	}

	fn manager(&self, name: &str) -> Result<Arc<ComponentManager>> {
		self.components
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| ScrError::UnknownComponent(name.to_string()))
	}

	pub fn enable_component(&self, name: &str) -> Result<TaskHandle<()>> {
		self.manager(name)?.enable()
	}

	pub fn disable_component(&self, name: &str) -> Result<TaskHandle<()>> {
		Ok(self.manager(name)?.disable())
	}

	pub fn is_component_enabled(&self, name: &str) -> Result<bool> {
		Ok(self.manager(name)?.is_enabled())
	}

	/// Delivers a new (`Some`) or deleted (`None`) configuration.
	///
	/// `key` is a component name or a configuration pid; every component
	/// listening to that pid receives it.
	pub fn component_configuration_updated(&self, key: &str, configuration: Option<Properties>) -> Result<TaskHandle<()>> {
		let targets: Vec<Arc<ComponentManager>> = {
			let components = self.components.read();
			match components.get(key) {
				Some(manager) => vec![Arc::clone(manager)],
				None => components
					.values()
					.filter(|m| m.description().pid() == key)
					.cloned()
					.collect(),
			}
		};
		if targets.is_empty() {
			return Err(ScrError::UnknownComponent(key.to_string()));
		}

		let tasks = targets
			.iter()
			.map(|manager| manager.configuration_updated(configuration.clone()))
			.collect::<Result<Vec<_>>>()?;
		Ok(self.coordinator.join("scr.configuration.update", tasks))
	}

	pub fn component_description_dtos(&self) -> Vec<ComponentDescriptionDto> {
		self.components
			.read()
			.values()
			.map(|m| ComponentDescriptionDto::new(m.description(), m.bundle().id(), m.is_enabled()))
			.collect()
	}

	pub fn component_configuration_dtos(&self, name: &str) -> Result<Vec<ComponentConfigurationDto>> {
		Ok(self.manager(name)?.configuration_dtos())
	}

	/// Disposes and forgets every component declared by `bundle`, newest first.
	/// Returns how many were removed.
	pub fn stop_bundle(&self, bundle: BundleId) -> usize {
		let removed: Vec<Arc<ComponentManager>> = {
			let mut components = self.components.write();
			let names: Vec<String> = components
				.iter()
				.filter(|(_, m)| m.bundle().id() == bundle)
				.map(|(name, _)| name.clone())
				.collect();
			names.iter().filter_map(|name| components.shift_remove(name)).collect()
		};
		for manager in removed.iter().rev() {
			manager.disable().wait();
		}
		tracing::debug!(%bundle, components = removed.len(), "scr.bundle.stop");
		removed.len()
	}

	/// Disposes every component and detaches from the registry. Idempotent.
	pub fn shutdown(&self) {
		let removed: Vec<Arc<ComponentManager>> = std::mem::take(&mut *self.components.write()).into_values().collect();
		for manager in removed.iter().rev() {
			manager.disable().wait();
		}
		self.coordinator.shutdown();
		tracing::debug!(components = removed.len(), "scr.shutdown");
	}
}

impl std::fmt::Debug for ServiceComponentRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceComponentRuntime")
			.field("components", &self.components.read().keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}
