//! The user-code side of a component.

use std::any::Any;
use std::sync::Arc;

use trellis_registry::{InterfaceMap, Properties, ServiceId, ServiceReference};

use crate::ComponentContext;

/// Failure reported by user code. Logged by the runtime, never propagated.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ComponentError {
	message: String,
	#[source]
	source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ComponentError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			source: None,
		}
	}

	pub fn with_source(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
		Self {
			message: message.into(),
			source: Some(Box::new(source)),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

pub type ComponentResult<T = ()> = Result<T, ComponentError>;

/// Lifecycle callbacks of a component instance. Every callback defaults to a
/// no-op.
///
/// Callbacks run without any runtime lock held, so they may use the registry
/// and the runtime re-entrantly. Errors and panics are logged and mapped to
/// state transitions.
pub trait Component: Send + Sync {
	fn activate(&self, _ctx: &ComponentContext) -> ComponentResult {
		Ok(())
	}

	fn deactivate(&self, _ctx: &ComponentContext) -> ComponentResult {
		Ok(())
	}

	/// Properties changed while active. Only called when the description
	/// declares a modified callback; an error forces reactivation.
	fn modified(&self, _ctx: &ComponentContext, _properties: &Properties) -> ComponentResult {
		Ok(())
	}

	fn bind(&self, _reference: &str, _service: &BoundService) -> ComponentResult {
		Ok(())
	}

	fn unbind(&self, _reference: &str, _service: &BoundService) -> ComponentResult {
		Ok(())
	}
}

/// A constructed component together with the service objects it provides.
pub struct ComponentInstance {
	pub(crate) component: Arc<dyn Component>,
	pub(crate) services: InterfaceMap,
}

impl ComponentInstance {
	pub fn new<C: Component + 'static>(component: C) -> Self {
		Self::from_arc(Arc::new(component))
	}

	pub fn from_arc(component: Arc<dyn Component>) -> Self {
		Self {
			component,
			services: InterfaceMap::new(),
		}
	}

	/// Adds the object handed out for `interface`.
	pub fn provide<T: Any + Send + Sync>(mut self, interface: impl Into<Box<str>>, object: T) -> Self {
		self.services.insert(interface, object);
		self
	}
}

impl std::fmt::Debug for ComponentInstance {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComponentInstance").field("services", &self.services).finish_non_exhaustive()
	}
}

/// Builds a component instance. Stands in for symbol resolution of the
/// implementation class.
pub type Constructor = Arc<dyn Fn(&ConstructorContext<'_>) -> ComponentResult<ComponentInstance> + Send + Sync>;

/// What a constructor sees.
pub struct ConstructorContext<'a> {
	pub(crate) properties: &'a Properties,
	pub(crate) injected: &'a [(String, BoundService)],
}

impl ConstructorContext<'_> {
	/// Merged component properties.
	pub fn properties(&self) -> &Properties {
		self.properties
	}

	/// Service injected for a mandatory unary reference. Empty unless the
	/// description asks for constructor injection.
	pub fn service<T: Any + Clone>(&self, reference: &str) -> Option<T> {
		self.bound(reference)?.service()
	}

	pub fn bound(&self, reference: &str) -> Option<&BoundService> {
		self.injected.iter().find(|(name, _)| name == reference).map(|(_, b)| b)
	}
}

/// A service bound to one reference of a component.
#[derive(Clone, Debug)]
pub struct BoundService {
	interface: Arc<str>,
	reference: ServiceReference,
	services: InterfaceMap,
}

impl BoundService {
	pub(crate) fn new(interface: Arc<str>, reference: ServiceReference, services: InterfaceMap) -> Self {
		Self {
			interface,
			reference,
			services,
		}
	}

	pub(crate) fn refresh(&mut self, reference: ServiceReference) {
		self.reference = reference;
	}

	/// Service object for the reference's interface.
	pub fn service<T: Any + Clone>(&self) -> Option<T> {
		self.services.get(&self.interface)
	}

	pub fn services(&self) -> &InterfaceMap {
		&self.services
	}

	pub fn interface(&self) -> &str {
		&self.interface
	}

	pub fn reference(&self) -> &ServiceReference {
		&self.reference
	}

	pub fn id(&self) -> ServiceId {
		self.reference.id()
	}

	pub fn properties(&self) -> &Properties {
		self.reference.properties()
	}
}
