//! Explicit context owning the registry, the worker pool and the runtime.

use std::fmt;
use std::sync::Arc;

use trellis_registry::{BundleId, IdClock, ServiceRegistry};
use trellis_worker::WorkerPool;

use crate::{Result, RuntimeConfig, ServiceComponentRuntime};

/// A unit of ownership for components and services.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bundle {
	id: BundleId,
	name: Arc<str>,
}

impl Bundle {
	pub fn id(&self) -> BundleId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

impl fmt::Display for Bundle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} [{}]", self.name, self.id)
	}
}

/// Registry, pool and component runtime wired together.
///
/// Dropping the framework shuts it down.
pub struct Framework {
	config: RuntimeConfig,
	registry: Arc<ServiceRegistry>,
	pool: Arc<WorkerPool>,
	runtime: Arc<ServiceComponentRuntime>,
	bundle_ids: IdClock,
	system: Bundle,
}

impl Framework {
	pub fn new(config: RuntimeConfig) -> Self {
		let registry = Arc::new(ServiceRegistry::new());
		let pool = Arc::new(WorkerPool::new(config.pool_config()));
		let runtime = ServiceComponentRuntime::new(Arc::clone(&registry), Arc::clone(&pool));
		tracing::info!(
			worker_threads = config.worker_threads,
			grace_period_ms = config.grace_period_ms,
			"framework started"
		);
		Self {
			config,
			registry,
			pool,
			runtime,
			bundle_ids: IdClock::new(),
			system: Bundle {
				id: BundleId(0),
				name: Arc::from("system"),
			},
		}
	}

	/// Builds a framework from TOML runtime configuration.
	pub fn from_toml_str(src: &str) -> Result<Self> {
		Ok(Self::new(RuntimeConfig::from_toml_str(src)?))
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	pub fn registry(&self) -> &Arc<ServiceRegistry> {
		&self.registry
	}

	pub fn runtime(&self) -> &Arc<ServiceComponentRuntime> {
		&self.runtime
	}

	pub fn pool(&self) -> &Arc<WorkerPool> {
		&self.pool
	}

	/// Bundle id 0, owner of framework-level registrations.
	pub fn system_bundle(&self) -> &Bundle {
		&self.system
	}

	pub fn install_bundle(&self, name: impl Into<Arc<str>>) -> Bundle {
		let bundle = Bundle {
			id: BundleId(self.bundle_ids.next()),
			name: name.into(),
		};
		tracing::debug!(bundle = %bundle, "framework.bundle.install");
		bundle
	}

	/// Disposes the bundle's components, then unregisters whatever services
	/// it still has.
	pub fn stop_bundle(&self, bundle: &Bundle) {
		let components = self.runtime.stop_bundle(bundle.id());
		let services = self.registry.unregister_all(bundle.id());
		tracing::info!(bundle = %bundle, components, services, "bundle stopped");
	}

	/// Disposes every component and stops the pool. Idempotent.
	pub fn shutdown(&self) {
		self.runtime.shutdown();
		self.pool.shutdown();
	}
}

impl Default for Framework {
	fn default() -> Self {
		Self::new(RuntimeConfig::default())
	}
}

impl Drop for Framework {
	fn drop(&mut self) {
		self.shutdown();
	}
}

impl fmt::Debug for Framework {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Framework")
			.field("config", &self.config)
			.field("services", &self.registry.len())
			.field("pool", &self.pool)
			.finish_non_exhaustive()
	}
}
