use crate::filter::FilterError;

/// Registry operation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	/// A registration named no interface.
	#[error("a service must be registered under at least one interface")]
	NoInterfaces,

	#[error("invalid filter: {0}")]
	Filter(#[from] FilterError),
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
