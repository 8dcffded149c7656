//! The service registry proper.
//!
//! # Locking
//!
//! One mutex guards the record table. It is never held while listeners or
//! factories run. Queries read an immutable snapshot of the visible services,
//! republished under the lock after every mutation, and listener delivery
//! iterates an immutable listener snapshot, so listeners may register,
//! unregister or add listeners re-entrantly.
//!
//! # Visibility
//!
//! A record is visible to queries once announced and until its unregistration
//! starts. [`ServiceRegistry::register_deferred`] inserts a record without
//! announcing it; [`ServiceRegistry::announce`] publishes it and delivers
//! `Registered`.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use trellis_worker::panic_message;

use crate::{
	BundleId, Filter, IdClock, InterfaceMap, ListenerToken, Properties, PropertyValue, RegistryError, Result,
	ServiceEvent, ServiceEventKind, ServiceId, ServiceListener, ServiceReference, ServiceSource, keys,
};

#[cfg(test)]
mod tests;

struct Record {
	reference: ServiceReference,
	/// Owns the service object; references hold it weakly.
	_source: Arc<ServiceSource>,
	announced: bool,
	unregistering: bool,
}

impl Record {
	fn visible(&self) -> bool {
		self.announced && !self.unregistering
	}
}

#[derive(Default)]
struct RegistryState {
	records: BTreeMap<ServiceId, Record>,
}

/// Visible services in lookup order.
#[derive(Default)]
struct Snapshot {
	all: Vec<ServiceReference>,
	by_interface: FxHashMap<Box<str>, Vec<ServiceReference>>,
}

#[derive(Clone)]
struct ListenerEntry {
	token: ListenerToken,
	filter: Option<Filter>,
	listener: Arc<dyn ServiceListener>,
}

/// Registry of services keyed by interface name.
pub struct ServiceRegistry {
	service_ids: IdClock,
	listener_ids: IdClock,
	state: Mutex<RegistryState>,
	snap: ArcSwap<Snapshot>,
	listeners: ArcSwap<Vec<ListenerEntry>>,
}

impl Default for ServiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ServiceRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceRegistry")
			.field("services", &self.len())
			.field("listeners", &self.listeners.load().len())
			.finish()
	}
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self {
			service_ids: IdClock::new(),
			listener_ids: IdClock::new(),
			state: Mutex::new(RegistryState::default()),
			snap: ArcSwap::from_pointee(Snapshot::default()),
			listeners: ArcSwap::from_pointee(Vec::new()),
		}
	}

	/// Registers and announces a service.
	pub fn register<I, S>(
		&self,
		bundle: BundleId,
		interfaces: I,
		properties: Properties,
		source: impl Into<ServiceSource>,
	) -> Result<ServiceReference>
	where
		I: IntoIterator<Item = S>,
		S: Into<Box<str>>,
	{
		let reference = self.register_deferred(bundle, interfaces, properties, source)?;
		self.announce(reference.id());
		Ok(reference)
	}

	/// Registers an instance under every interface it provides.
	pub fn register_instance(
		&self,
		bundle: BundleId,
		services: InterfaceMap,
		properties: Properties,
	) -> Result<ServiceReference> {
		let mut interfaces: Vec<Box<str>> = services.interfaces().map(Box::from).collect();
		interfaces.sort_unstable();
		self.register(bundle, interfaces, properties, services)
	}

	/// Inserts a record without announcing it. Invisible to queries and
	/// listeners until [`Self::announce`].
	pub fn register_deferred<I, S>(
		&self,
		bundle: BundleId,
		interfaces: I,
		mut properties: Properties,
		source: impl Into<ServiceSource>,
	) -> Result<ServiceReference>
	where
		I: IntoIterator<Item = S>,
		S: Into<Box<str>>,
	{
		let mut names: SmallVec<[Box<str>; 4]> = SmallVec::new();
		for name in interfaces {
			let name = name.into();
			if !names.contains(&name) {
				names.push(name);
			}
		}
		if names.is_empty() {
			return Err(RegistryError::NoInterfaces);
		}
		let interfaces: Arc<[Box<str>]> = names.into_iter().collect();

		let id = ServiceId(self.service_ids.next());
		stamp(&mut properties, id, bundle, &interfaces);
		let source = Arc::new(source.into());
		let reference = ServiceReference::new(id, bundle, interfaces, Arc::new(properties), Arc::downgrade(&source));

		self.state.lock().records.insert(
			id,
			Record {
				reference: reference.clone(),
				_source: source,
				announced: false,
				unregistering: false,
			},
		);
		tracing::trace!(service_id = %id, bundle = %bundle, "registry.register");
		Ok(reference)
	}

	/// Publishes a deferred registration and delivers `Registered`.
	///
	/// Returns false when the record is gone, already announced, or being
	/// unregistered.
	pub fn announce(&self, id: ServiceId) -> bool {
		let reference = {
			let mut state = self.state.lock();
			let Some(record) = state.records.get_mut(&id) else {
				return false;
			};
			if record.announced || record.unregistering {
				return false;
			}
			record.announced = true;
			let reference = record.reference.clone();
			self.publish(&state);
			reference
		};
		tracing::debug!(service_id = %id, interfaces = ?reference.interfaces(), "registry.announce");
		self.deliver(&ServiceEvent::new(ServiceEventKind::Registered, reference));
		true
	}

	/// Unregisters a service.
	///
	/// Announced services get `Unregistering` first, while still resolvable.
	/// Unknown ids (and ids already being unregistered) log a warning and
	/// return false.
	pub fn unregister(&self, id: ServiceId) -> bool {
		let (reference, announced) = {
			let mut state = self.state.lock();
			let Some(record) = state.records.get_mut(&id) else {
				tracing::warn!(service_id = %id, "unregister of unknown service");
				return false;
			};
			if record.unregistering {
				tracing::warn!(service_id = %id, "service is already being unregistered");
				return false;
			}
			record.unregistering = true;
			let entry = (record.reference.clone(), record.announced);
			self.publish(&state);
			entry
		};

		if announced {
			self.deliver(&ServiceEvent::new(ServiceEventKind::Unregistering, reference));
		}

		let removed = self.state.lock().records.remove(&id);
		tracing::debug!(service_id = %id, "registry.unregister");
		drop(removed);
		true
	}

	/// Unregisters every service owned by `bundle`, newest first.
	pub fn unregister_all(&self, bundle: BundleId) -> usize {
		let ids: SmallVec<[ServiceId; 8]> = self
			.state
			.lock()
			.records
			.values()
			.rev()
			.filter(|r| r.reference.bundle() == bundle && !r.unregistering)
			.map(|r| r.reference.id())
			.collect();
		ids.into_iter().filter(|id| self.unregister(*id)).count()
	}

	/// Replaces a service's properties and delivers `Modified`.
	///
	/// Reserved keys are restamped by the registry.
	pub fn set_properties(&self, id: ServiceId, mut properties: Properties) -> bool {
		let (reference, previous, announced) = {
			let mut state = self.state.lock();
			let Some(record) = state.records.get_mut(&id) else {
				tracing::warn!(service_id = %id, "set_properties on unknown service");
				return false;
			};
			if record.unregistering {
				tracing::warn!(service_id = %id, "set_properties on a service being unregistered");
				return false;
			}
			let current = &record.reference;
			stamp(&mut properties, id, current.bundle(), current.interfaces());
			let previous = current.properties_arc();
			record.reference = current.with_properties(Arc::new(properties));
			let entry = (record.reference.clone(), previous, record.announced);
			self.publish(&state);
			entry
		};

		if announced {
			self.deliver(&ServiceEvent {
				kind: ServiceEventKind::Modified,
				reference,
				previous: Some(previous),
			});
		}
		true
	}

	/// Visible services ordered by ranking, filtered by interface and filter text.
	pub fn service_references(&self, interface: Option<&str>, filter: Option<&str>) -> Result<Vec<ServiceReference>> {
		let filter = filter.map(Filter::parse).transpose()?;
		Ok(self.service_references_matching(interface, filter.as_ref()))
	}

	pub fn service_references_matching(&self, interface: Option<&str>, filter: Option<&Filter>) -> Vec<ServiceReference> {
		let snap = self.snap.load();
		let candidates: &[ServiceReference] = match interface {
			Some(interface) => snap.by_interface.get(interface).map_or(&[], Vec::as_slice),
			None => &snap.all,
		};
		candidates
			.iter()
			.filter(|r| filter.is_none_or(|f| f.matches(r.properties())))
			.cloned()
			.collect()
	}

	/// Best-ranked visible service for `interface`.
	pub fn service_reference(&self, interface: &str) -> Option<ServiceReference> {
		self.snap.load().by_interface.get(interface)?.first().cloned()
	}

	/// Current reference for a registered, not-yet-unregistering service.
	pub fn reference(&self, id: ServiceId) -> Option<ServiceReference> {
		let state = self.state.lock();
		let record = state.records.get(&id)?;
		(!record.unregistering).then(|| record.reference.clone())
	}

	/// Resolves the service object behind `reference` for `bundle`.
	///
	/// Factories run outside the registry lock; a panicking factory yields
	/// `None`.
	pub fn get_service(&self, reference: &ServiceReference, bundle: BundleId) -> Option<InterfaceMap> {
		let source = reference.source()?;
		match &*source {
			ServiceSource::Instance(services) => Some(services.clone()),
			ServiceSource::Factory(factory) => {
				match catch_unwind(AssertUnwindSafe(|| factory.get_service(bundle, reference))) {
					Ok(services) => services,
					Err(payload) => {
						tracing::error!(
							service_id = %reference.id(),
							panic = %panic_message(payload.as_ref()),
							"service factory panicked"
						);
						None
					}
				}
			}
		}
	}

	/// Number of visible services.
	pub fn len(&self) -> usize {
		self.snap.load().all.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Adds a listener, optionally restricted to services matching `filter`.
	pub fn add_listener(&self, listener: Arc<dyn ServiceListener>, filter: Option<Filter>) -> ListenerToken {
		let token = ListenerToken(self.listener_ids.next());
		let entry = ListenerEntry { token, filter, listener };
		self.listeners.rcu(|current| {
			let mut next = Vec::clone(current);
			next.push(entry.clone());
			next
		});
		token
	}

	/// Removes a listener. Deliveries already iterating an older snapshot may
	/// still reach it once.
	pub fn remove_listener(&self, token: ListenerToken) -> bool {
		let previous = self
			.listeners
			.rcu(|current| current.iter().filter(|e| e.token != token).cloned().collect::<Vec<_>>());
		previous.iter().any(|e| e.token == token)
	}

	fn publish(&self, state: &RegistryState) {
		let mut all: Vec<ServiceReference> = state
			.records
			.values()
			.filter(|r| r.visible())
			.map(|r| r.reference.clone())
			.collect();
		all.sort_by(ServiceReference::cmp_rank);

		let mut by_interface: FxHashMap<Box<str>, Vec<ServiceReference>> = FxHashMap::default();
		for reference in &all {
			for interface in reference.interfaces() {
				by_interface.entry(interface.clone()).or_default().push(reference.clone());
			}
		}
		self.snap.store(Arc::new(Snapshot { all, by_interface }));
	}

	fn deliver(&self, event: &ServiceEvent) {
		let listeners = self.listeners.load_full();
		for entry in listeners.iter() {
			let Some(kind) = delivered_kind(entry.filter.as_ref(), event) else {
				continue;
			};
			let result = if kind == event.kind {
				catch_unwind(AssertUnwindSafe(|| entry.listener.service_changed(event)))
			} else {
				let narrowed = event.with_kind(kind);
				catch_unwind(AssertUnwindSafe(|| entry.listener.service_changed(&narrowed)))
			};
			if let Err(payload) = result {
				tracing::error!(
					service_id = %event.reference.id(),
					kind = ?kind,
					panic = %panic_message(payload.as_ref()),
					"service listener panicked"
				);
			}
		}
	}
}

/// Event kind a listener with `filter` should see, if any.
fn delivered_kind(filter: Option<&Filter>, event: &ServiceEvent) -> Option<ServiceEventKind> {
	let Some(filter) = filter else {
		return Some(event.kind);
	};
	if filter.matches(event.reference.properties()) {
		return Some(event.kind);
	}
	let matched_before = event.previous.as_deref().is_some_and(|p| filter.matches(p));
	(event.kind == ServiceEventKind::Modified && matched_before).then_some(ServiceEventKind::ModifiedEndMatch)
}

/// Overwrites the registry-owned keys.
fn stamp(properties: &mut Properties, id: ServiceId, bundle: BundleId, interfaces: &[Box<str>]) {
	let classes = interfaces.iter().map(|i| PropertyValue::String(i.to_string())).collect::<Vec<_>>();
	properties.insert(keys::OBJECTCLASS, classes);
	properties.insert(keys::SERVICE_ID, i64::try_from(id.0).unwrap_or(i64::MAX));
	properties.insert(keys::SERVICE_BUNDLE_ID, i64::try_from(bundle.0).unwrap_or(i64::MAX));
}
