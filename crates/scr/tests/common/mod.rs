#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_registry::{InterfaceMap, Properties, PropertyValue, ServiceReference, keys};
use trellis_scr::{
	BoundService, Bundle, Component, ComponentContext, ComponentError, ComponentInstance, ComponentResult,
	ComponentState, ConstructorContext, Framework, RuntimeConfig,
};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn framework() -> Framework {
	framework_with_threads(2)
}

pub fn framework_with_threads(worker_threads: usize) -> Framework {
	init_tracing();
	Framework::new(RuntimeConfig {
		worker_threads,
		grace_period_ms: 20,
		..RuntimeConfig::default()
	})
}

pub trait Greet: Send + Sync {
	fn greet(&self) -> String;
}

pub type GreetService = Arc<dyn Greet>;

pub struct Named(pub String);

impl Greet for Named {
	fn greet(&self) -> String {
		format!("hello from {}", self.0)
	}
}

pub fn greeter(name: &str) -> GreetService {
	Arc::new(Named(name.to_string()))
}

/// Registers `name` under `interface` with the given ranking.
pub fn register(fw: &Framework, bundle: &Bundle, interface: &str, name: &str, ranking: i64) -> ServiceReference {
	fw.registry()
		.register(
			bundle.id(),
			[interface],
			Properties::new().with("name", name).with(keys::SERVICE_RANKING, ranking),
			InterfaceMap::new().with(interface, greeter(name)),
		)
		.unwrap()
}

/// Ordered log of component callbacks shared between a test and its
/// components.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
	pub fn push(&self, entry: impl Into<String>) {
		self.0.lock().push(entry.into());
	}

	pub fn entries(&self) -> Vec<String> {
		self.0.lock().clone()
	}

	/// Returns and clears the log.
	pub fn take(&self) -> Vec<String> {
		std::mem::take(&mut *self.0.lock())
	}
}

pub fn service_name(service: &BoundService) -> String {
	service.properties().get("name").and_then(PropertyValue::as_str).unwrap_or("?").to_string()
}

/// Component writing every callback to a [`Journal`].
#[derive(Clone, Default)]
pub struct Recorder {
	pub journal: Journal,
	pub fail_activate: bool,
	pub fail_bind: bool,
	pub fail_modified: bool,
	pub panic_deactivate: bool,
}

impl Recorder {
	pub fn new(journal: &Journal) -> Self {
		Self {
			journal: journal.clone(),
			..Self::default()
		}
	}
}

impl Component for Recorder {
	fn activate(&self, _ctx: &ComponentContext) -> ComponentResult {
		self.journal.push("activate");
		if self.fail_activate {
			return Err(ComponentError::new("refusing to activate"));
		}
		Ok(())
	}

	fn deactivate(&self, _ctx: &ComponentContext) -> ComponentResult {
		self.journal.push("deactivate");
		if self.panic_deactivate {
			panic!("deactivate blew up");
		}
		Ok(())
	}

	fn modified(&self, _ctx: &ComponentContext, properties: &Properties) -> ComponentResult {
		let lang = properties.get("lang").and_then(PropertyValue::as_str).unwrap_or("-");
		self.journal.push(format!("modified:{lang}"));
		if self.fail_modified {
			return Err(ComponentError::new("cannot take that"));
		}
		Ok(())
	}

	fn bind(&self, reference: &str, service: &BoundService) -> ComponentResult {
		self.journal.push(format!("bind:{reference}:{}", service_name(service)));
		if self.fail_bind {
			return Err(ComponentError::new("bind refused"));
		}
		Ok(())
	}

	fn unbind(&self, reference: &str, service: &BoundService) -> ComponentResult {
		self.journal.push(format!("unbind:{reference}:{}", service_name(service)));
		Ok(())
	}
}

/// Constructor building a fresh clone of `recorder`.
pub fn recording(recorder: Recorder) -> impl Fn(&ConstructorContext<'_>) -> ComponentResult<ComponentInstance> + Send + Sync {
	move |_| Ok(ComponentInstance::new(recorder.clone()))
}

/// Constructor building `recorder` and providing a greeter named `name`
/// under `interface`.
pub fn recording_provider(
	recorder: Recorder,
	interface: &'static str,
	name: &'static str,
) -> impl Fn(&ConstructorContext<'_>) -> ComponentResult<ComponentInstance> + Send + Sync {
	move |_| Ok(ComponentInstance::new(recorder.clone()).provide(interface, greeter(name)))
}

pub fn state_of(fw: &Framework, component: &str) -> Option<ComponentState> {
	fw.runtime()
		.component_configuration_dtos(component)
		.unwrap()
		.first()
		.map(|dto| dto.state)
}

pub fn property_of(fw: &Framework, component: &str, key: &str) -> Option<PropertyValue> {
	fw.runtime()
		.component_configuration_dtos(component)
		.unwrap()
		.first()
		.and_then(|dto| dto.properties.get(key).cloned())
}
