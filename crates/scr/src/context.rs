use std::any::Any;
use std::sync::{Arc, Weak};

use trellis_registry::{Properties, ServiceReference};
use trellis_worker::TaskHandle;

use crate::configuration::ComponentConfiguration;
use crate::{BoundService, Bundle, Result, ScrError, ServiceComponentRuntime};

/// Handle given to component callbacks.
///
/// Holds weak links only; once the configuration is disposed the accessors
/// return empty results.
#[derive(Clone)]
pub struct ComponentContext {
	config: Weak<ComponentConfiguration>,
	runtime: Weak<ServiceComponentRuntime>,
	bundle: Bundle,
	component_id: u64,
}

impl ComponentContext {
	pub(crate) fn new(
		config: Weak<ComponentConfiguration>,
		runtime: Weak<ServiceComponentRuntime>,
		bundle: Bundle,
		component_id: u64,
	) -> Self {
		Self {
			config,
			runtime,
			bundle,
			component_id,
		}
	}

	/// Current component properties.
	pub fn properties(&self) -> Arc<Properties> {
		self.config
			.upgrade()
			.map_or_else(|| Arc::new(Properties::new()), |config| config.properties())
	}

	/// First service bound to `reference`.
	pub fn locate_service<T: Any + Clone>(&self, reference: &str) -> Option<T> {
		self.locate_bound(reference).first()?.service()
	}

	/// Every service bound to `reference`, in binding order.
	pub fn locate_services<T: Any + Clone>(&self, reference: &str) -> Vec<T> {
		self.locate_bound(reference).iter().filter_map(|bound| bound.service()).collect()
	}

	/// Bindings of `reference`; empty for unknown names.
	pub fn locate_bound(&self, reference: &str) -> Vec<BoundService> {
		self.config
			.upgrade()
			.and_then(|config| config.reference(reference).map(|rm| rm.bound()))
			.unwrap_or_default()
	}

	/// The service this configuration provides, once registered.
	pub fn service_reference(&self) -> Option<ServiceReference> {
		self.config.upgrade()?.registration()
	}

	/// Enables another component. Does not wait for it.
	pub fn enable_component(&self, name: &str) -> Result<TaskHandle<()>> {
		self.runtime()?.enable_component(name)
	}

	/// Disables a component, possibly this one. Does not wait for it.
	pub fn disable_component(&self, name: &str) -> Result<TaskHandle<()>> {
		self.runtime()?.disable_component(name)
	}

	pub fn bundle(&self) -> &Bundle {
		&self.bundle
	}

	pub fn component_id(&self) -> u64 {
		self.component_id
	}

	fn runtime(&self) -> Result<Arc<ServiceComponentRuntime>> {
		self.runtime.upgrade().ok_or(ScrError::ShutDown)
	}
}

impl std::fmt::Debug for ComponentContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComponentContext")
			.field("bundle", &self.bundle)
			.field("component_id", &self.component_id)
			.finish_non_exhaustive()
	}
}
