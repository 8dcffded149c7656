//! In-process service registry.
//!
//! Services are type-erased capability sets ([`InterfaceMap`]) registered under
//! one or more interface names together with a [`Properties`] map. Lookups take
//! an interface and an optional LDAP-style [`Filter`] and return
//! [`ServiceReference`]s ordered by `service.ranking` (descending) then
//! `service.id` (ascending).
//!
//! Mutations are delivered synchronously to [`ServiceListener`]s on the
//! mutating thread, after the registry lock is released.

mod clock;
mod error;
mod event;
pub mod filter;
mod properties;
mod registry;
mod service;

pub use clock::IdClock;
pub use error::{RegistryError, Result};
pub use event::{ListenerToken, ServiceEvent, ServiceEventKind, ServiceListener};
pub use filter::{CompareOp, Filter, FilterError};
pub use properties::{Properties, PropertyValue, keys};
pub use registry::ServiceRegistry;
pub use service::{BundleId, InterfaceMap, ServiceFactory, ServiceId, ServiceReference, ServiceSource};
