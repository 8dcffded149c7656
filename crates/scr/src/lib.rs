//! Declarative service component runtime.
//!
//! Components are described by data ([`ComponentDescription`]) and built by a
//! [`Constructor`]. The runtime tracks each component's references against the
//! service registry, activates it once they are satisfied, registers the
//! services it provides and tears everything down again, in order, when a
//! dependency disappears.
//!
//! ```ignore
//! let framework = Framework::default();
//! let bundle = framework.install_bundle("greeter");
//! framework.runtime().declare_component(
//! 	&bundle,
//! 	ComponentDescription::new("greeter").provide("Greeter").reference(ReferenceDescription::new("log", "Log")),
//! 	|_| Ok(ComponentInstance::new(Greeter).provide("Greeter", Arc::new(Greeter) as Arc<dyn Greet>)),
//! )?;
//! ```
//!
//! All state changes of one configuration run as single-invocation tasks on a
//! [`trellis_worker::WorkerPool`], so callbacks may use the registry and the
//! runtime re-entrantly.

mod component;
mod config;
mod configuration;
mod context;
mod coordinator;
mod description;
mod dto;
mod error;
mod framework;
mod manager;
mod reference;
mod runtime;

pub use component::{
	BoundService, Component, ComponentError, ComponentInstance, ComponentResult, Constructor, ConstructorContext,
};
pub use config::RuntimeConfig;
pub use configuration::ComponentState;
pub use context::ComponentContext;
pub use description::{
	ActivationPolicy, Cardinality, ComponentDescription, ConfigurationPolicy, PolicyOption, ReferenceDescription,
	ReferencePolicy, ServiceScope,
};
pub use dto::{
	ComponentConfigurationDto, ComponentDescriptionDto, ReferenceDto, SatisfiedReferenceDto, UnsatisfiedReferenceDto,
};
pub use error::{Result, ScrError};
pub use framework::{Bundle, Framework};
pub use runtime::ServiceComponentRuntime;
pub use trellis_worker::{TaskError, TaskHandle};
