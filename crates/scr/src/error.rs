use trellis_registry::RegistryError;
use trellis_worker::TaskError;

/// Runtime-facing errors. User-code failures never surface here; they are
/// logged and turned into state transitions.
#[derive(Debug, thiserror::Error)]
pub enum ScrError {
	#[error("unknown component: {0}")]
	UnknownComponent(String),

	#[error("component already declared: {0}")]
	DuplicateComponent(String),

	#[error("invalid description for {component}: {reason}")]
	InvalidDescription { component: String, reason: String },

	#[error("component runtime has shut down")]
	ShutDown,

	#[error(transparent)]
	Registry(#[from] RegistryError),

	#[error(transparent)]
	Task(#[from] TaskError),

	#[error("invalid runtime configuration: {0}")]
	Config(#[from] toml::de::Error),
}

pub type Result<T, E = ScrError> = std::result::Result<T, E>;
