//! Service identities, capability sets and references.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{Properties, PropertyValue};

/// Registry-assigned service id. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Id of the bundle owning a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl fmt::Display for BundleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Type-erased capability set: interface name to service object.
///
/// Objects are usually `Arc<dyn Trait>` values stored under the trait's
/// interface name and read back with [`InterfaceMap::get`].
#[derive(Clone, Default)]
pub struct InterfaceMap {
	entries: FxHashMap<Box<str>, Arc<dyn Any + Send + Sync>>,
}

impl InterfaceMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with<T: Any + Send + Sync>(mut self, interface: impl Into<Box<str>>, object: T) -> Self {
		self.insert(interface, object);
		self
	}

	pub fn insert<T: Any + Send + Sync>(&mut self, interface: impl Into<Box<str>>, object: T) {
		self.entries.insert(interface.into(), Arc::new(object));
	}

	/// Clones the object registered under `interface` if it has type `T`.
	pub fn get<T: Any + Clone>(&self, interface: &str) -> Option<T> {
		self.entries.get(interface)?.downcast_ref::<T>().cloned()
	}

	pub fn get_erased(&self, interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
		self.entries.get(interface).cloned()
	}

	pub fn contains(&self, interface: &str) -> bool {
		self.entries.contains_key(interface)
	}

	pub fn interfaces(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(|k| &**k)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl fmt::Debug for InterfaceMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut names: Vec<_> = self.interfaces().collect();
		names.sort_unstable();
		f.debug_struct("InterfaceMap").field("interfaces", &names).finish()
	}
}

/// Produces service objects on demand.
///
/// Invoked by [`crate::ServiceRegistry::get_service`] outside the registry
/// lock. Returning `None` means the service is currently unavailable.
pub trait ServiceFactory: Send + Sync {
	fn get_service(&self, bundle: BundleId, reference: &ServiceReference) -> Option<InterfaceMap>;
}

/// What backs a registration.
pub enum ServiceSource {
	Instance(InterfaceMap),
	Factory(Arc<dyn ServiceFactory>),
}

impl fmt::Debug for ServiceSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Instance(map) => f.debug_tuple("Instance").field(map).finish(),
			Self::Factory(_) => f.write_str("Factory"),
		}
	}
}

impl From<InterfaceMap> for ServiceSource {
	fn from(map: InterfaceMap) -> Self {
		Self::Instance(map)
	}
}

impl From<Arc<dyn ServiceFactory>> for ServiceSource {
	fn from(factory: Arc<dyn ServiceFactory>) -> Self {
		Self::Factory(factory)
	}
}

/// Handle to a registration as seen at one point in time.
///
/// Equality and hashing use the service id only, so a reference taken before a
/// property update still identifies the same service. The handle does not keep
/// the service alive; [`ServiceReference::is_available`] turns false once the
/// registration is gone.
#[derive(Clone)]
pub struct ServiceReference {
	id: ServiceId,
	bundle: BundleId,
	interfaces: Arc<[Box<str>]>,
	properties: Arc<Properties>,
	source: Weak<ServiceSource>,
}

impl ServiceReference {
	pub(crate) fn new(
		id: ServiceId,
		bundle: BundleId,
		interfaces: Arc<[Box<str>]>,
		properties: Arc<Properties>,
		source: Weak<ServiceSource>,
	) -> Self {
		Self {
			id,
			bundle,
			interfaces,
			properties,
			source,
		}
	}

	pub(crate) fn with_properties(&self, properties: Arc<Properties>) -> Self {
		Self {
			properties,
			..self.clone()
		}
	}

	pub(crate) fn source(&self) -> Option<Arc<ServiceSource>> {
		self.source.upgrade()
	}

	pub fn id(&self) -> ServiceId {
		self.id
	}

	pub fn bundle(&self) -> BundleId {
		self.bundle
	}

	pub fn interfaces(&self) -> &[Box<str>] {
		&self.interfaces
	}

	pub fn provides(&self, interface: &str) -> bool {
		self.interfaces.iter().any(|i| &**i == interface)
	}

	pub fn properties(&self) -> &Properties {
		&self.properties
	}

	pub fn properties_arc(&self) -> Arc<Properties> {
		Arc::clone(&self.properties)
	}

	pub fn property(&self, key: &str) -> Option<&PropertyValue> {
		self.properties.get(key)
	}

	pub fn ranking(&self) -> i64 {
		self.properties.ranking()
	}

	/// Lookup order: higher ranking first, then lower id.
	pub fn cmp_rank(&self, other: &Self) -> Ordering {
		other.ranking().cmp(&self.ranking()).then(self.id.cmp(&other.id))
	}

	/// True while the registration still exists.
	pub fn is_available(&self) -> bool {
		self.source.strong_count() > 0
	}
}

impl PartialEq for ServiceReference {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl fmt::Debug for ServiceReference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceReference")
			.field("id", &self.id)
			.field("bundle", &self.bundle)
			.field("interfaces", &self.interfaces)
			.field("ranking", &self.ranking())
			.finish()
	}
}
