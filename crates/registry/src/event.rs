use std::sync::Arc;

use crate::{Properties, ServiceReference};

/// Kind of registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
	Registered,
	Modified,
	/// Properties changed and the listener's filter no longer matches.
	ModifiedEndMatch,
	/// Delivered before removal; the service is still resolvable.
	Unregistering,
}

/// A registry mutation as delivered to listeners.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
	pub kind: ServiceEventKind,
	pub reference: ServiceReference,
	/// Properties before a `Modified` update.
	pub previous: Option<Arc<Properties>>,
}

impl ServiceEvent {
	pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
		Self {
			kind,
			reference,
			previous: None,
		}
	}

	pub(crate) fn with_kind(&self, kind: ServiceEventKind) -> Self {
		Self { kind, ..self.clone() }
	}
}

/// Receives registry events synchronously on the mutating thread.
pub trait ServiceListener: Send + Sync {
	fn service_changed(&self, event: &ServiceEvent);
}

impl<F> ServiceListener for F
where
	F: Fn(&ServiceEvent) + Send + Sync,
{
	fn service_changed(&self, event: &ServiceEvent) {
		self(event);
	}
}

/// Handle returned by [`crate::ServiceRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub(crate) u64);
