//! Per-description bookkeeping: enabled flag, current configuration
//! properties and the live [`ComponentConfiguration`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use trellis_registry::{IdClock, Properties};
use trellis_worker::TaskHandle;

use crate::configuration::{ComponentConfiguration, Request, reference_targets};
use crate::coordinator::Coordinator;
use crate::description::{ComponentDescription, ConfigurationPolicy};
use crate::dto::ComponentConfigurationDto;
use crate::{Bundle, Constructor, Result, ServiceComponentRuntime};

struct ManagerState {
	enabled: bool,
	configuration: Option<Properties>,
	current: Option<Arc<ComponentConfiguration>>,
}

pub(crate) struct ComponentManager {
	description: Arc<ComponentDescription>,
	bundle: Bundle,
	constructor: Constructor,
	coordinator: Arc<Coordinator>,
	runtime: Weak<ServiceComponentRuntime>,
	ids: Arc<IdClock>,
	state: Mutex<ManagerState>,
}

impl ComponentManager {
	pub(crate) fn new(
		description: ComponentDescription,
		bundle: Bundle,
		constructor: Constructor,
		coordinator: Arc<Coordinator>,
		runtime: Weak<ServiceComponentRuntime>,
		ids: Arc<IdClock>,
	) -> Self {
		Self {
			description: Arc::new(description),
			bundle,
			constructor,
			coordinator,
			runtime,
			ids,
			state: Mutex::new(ManagerState {
				enabled: false,
				configuration: None,
				current: None,
			}),
		}
	}

	pub(crate) fn description(&self) -> &ComponentDescription {
		&self.description
	}

	pub(crate) fn bundle(&self) -> &Bundle {
		&self.bundle
	}

	pub(crate) fn is_enabled(&self) -> bool {
		self.state.lock().enabled
	}

	fn idle(&self) -> TaskHandle<()> {
		TaskHandle::completed(format!("scr.idle.{}", self.description.name), ())
	}

	/// Builds and attaches a fresh configuration. Called with the state lock
	/// held so enable and disable cannot interleave their index updates.
	fn create_configuration(&self, configuration: Option<Properties>) -> Result<Arc<ComponentConfiguration>> {
		let config = ComponentConfiguration::new(
			self.ids.next(),
			Arc::clone(&self.description),
			self.bundle.clone(),
			Arc::clone(&self.constructor),
			Arc::clone(&self.coordinator),
			self.runtime.clone(),
			configuration,
		)?;
		self.coordinator.attach(&config);
		tracing::debug!(component = %self.description.name, config_id = config.id(), "scr.configuration.create");
		Ok(config)
	}

	pub(crate) fn enable(&self) -> Result<TaskHandle<()>> {
		let config = {
			let mut state = self.state.lock();
			if state.enabled {
				return Ok(self.idle());
			}
			let config = self.create_configuration(state.configuration.clone())?;
			state.enabled = true;
			state.current = Some(Arc::clone(&config));
			config
		};
		tracing::info!(component = %self.description.name, "component enabled");
		Ok(self.coordinator.submit(&config, Request::Evaluate))
	}

	/// Disposes the current configuration. Also used for bundle stop.
	pub(crate) fn disable(&self) -> TaskHandle<()> {
		let config = {
			let mut state = self.state.lock();
			if !state.enabled {
				return self.idle();
			}
			state.enabled = false;
			state.current.take()
		};
		let Some(config) = config else {
			return self.idle();
		};
		self.coordinator.detach(config.id());
		tracing::info!(component = %self.description.name, "component disabled");
		self.coordinator.submit(&config, Request::Dispose)
	}

	/// New or deleted (`None`) configuration for this component.
	pub(crate) fn configuration_updated(&self, configuration: Option<Properties>) -> Result<TaskHandle<()>> {
		let policy = self.description.configuration_policy;
		if policy == ConfigurationPolicy::Ignore {
			tracing::debug!(component = %self.description.name, "configuration ignored");
			return Ok(self.idle());
		}

		let mut state = self.state.lock();
		let retargeted = reference_targets(&self.description, state.configuration.as_ref())
			!= reference_targets(&self.description, configuration.as_ref());
		state.configuration = configuration.clone();
		let Some(current) = state.current.clone() else {
			return Ok(self.idle());
		};

		// reference managers keep their filter for life; a new target needs a new configuration
		let deleted = policy == ConfigurationPolicy::Require && configuration.is_none();
		if deleted || retargeted {
			let fresh = self.create_configuration(configuration)?;
			self.coordinator.detach(current.id());
			state.current = Some(Arc::clone(&fresh));
			drop(state);

			tracing::debug!(
				component = %self.description.name,
				disposed = current.id(),
				replacement = fresh.id(),
				deleted,
				retargeted,
				"scr.configuration.replace"
			);
			let disposed = self.coordinator.submit(&current, Request::Dispose);
			let evaluated = self.coordinator.submit(&fresh, Request::Evaluate);
			return Ok(self.coordinator.join("scr.configuration.replace", vec![disposed, evaluated]));
		}

		drop(state);
		Ok(self.coordinator.submit(&current, Request::Configure(configuration)))
	}

	pub(crate) fn configuration_dtos(&self) -> Vec<ComponentConfigurationDto> {
		let current = self.state.lock().current.clone();
		current.iter().map(|config| config.dto()).collect()
	}
}
