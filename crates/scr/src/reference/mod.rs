//! Reference managers: per-dependency candidate tracking and binding policy.
//!
//! A manager mirrors the registry for one [`ReferenceDescription`]: `matched`
//! holds every visible service passing the reference filter, in lookup order.
//! While the owning configuration is inactive satisfaction is judged on
//! `matched`; once active, on the bound set, which changes only through the
//! decisions taken in [`ReferenceManager::on_active`].
//!
//! The manager never calls user code. It answers "what should happen" and the
//! configuration carries it out.

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_registry::{
	Filter, FilterError, InterfaceMap, Properties, PropertyValue, ServiceEvent, ServiceEventKind, ServiceId, ServiceReference, ServiceRegistry,
	keys,
};

use crate::BoundService;
use crate::description::ReferenceDescription;

#[cfg(test)]
mod tests;

/// Change in the candidate set, as seen by one manager.
#[derive(Debug, Clone)]
pub(crate) enum RefEvent {
	Added(ServiceReference),
	Removed(ServiceReference),
	/// Still matching, properties (and possibly ranking) changed.
	Reordered(ServiceReference),
}

/// A single binding change applied to a live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WireOp {
	Bind(ServiceReference),
	Unbind(ServiceReference),
}

/// What an active configuration must do about a [`RefEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ActiveOutcome {
	Unchanged,
	/// Apply these operations in order; the instance stays active.
	Rewire(Vec<WireOp>),
	/// Deactivate, then activate again with fresh bindings.
	Reactivate,
	/// Deactivate; the reference can no longer be satisfied.
	Deactivate,
}

#[derive(Default)]
struct RefState {
	matched: Vec<ServiceReference>,
	bound: Vec<BoundService>,
	active: bool,
}

pub(crate) struct ReferenceManager {
	description: ReferenceDescription,
	interface: Arc<str>,
	filter: Filter,
	/// `component.id` of the owning configuration.
	owner: i64,
	state: Mutex<RefState>,
}

impl ReferenceManager {
	/// Manager for `declared` as configured by the owning component's
	/// `properties`, which may override its target with `<name>.target`.
	pub(crate) fn new(
		declared: &ReferenceDescription,
		owner: u64,
		properties: &Properties,
	) -> Result<Self, FilterError> {
		let description = declared.retargeted(properties);
		if description.target != declared.target {
			tracing::debug!(reference = %description.name, target = ?description.target, "scr.reference.retarget");
		}
		let filter = description.filter()?;
		Ok(Self {
			interface: Arc::from(description.interface.as_str()),
			description,
			filter,
			owner: i64::try_from(owner).unwrap_or(i64::MAX),
			state: Mutex::new(RefState::default()),
		})
	}

	pub(crate) fn name(&self) -> &str {
		&self.description.name
	}

	pub(crate) fn interface(&self) -> &str {
		&self.interface
	}

	pub(crate) fn description(&self) -> &ReferenceDescription {
		&self.description
	}

	pub(crate) fn filter(&self) -> &Filter {
		&self.filter
	}

	/// Wraps a resolved service object as a binding of this reference.
	pub(crate) fn binding(&self, reference: ServiceReference, services: InterfaceMap) -> BoundService {
		BoundService::new(Arc::clone(&self.interface), reference, services)
	}

	fn min(&self) -> usize {
		self.description.cardinality.min()
	}

	fn max(&self) -> usize {
		self.description.cardinality.max()
	}

	fn accepts(&self, reference: &ServiceReference) -> bool {
		let own = reference.property(keys::COMPONENT_ID) == Some(&PropertyValue::Int(self.owner));
		!own && self.filter.matches(reference.properties())
	}

	/// Loads the current matches from the registry.
	///
	/// Holds the state lock across the query so a concurrent
	/// [`Self::track`] cannot be overtaken by a stale snapshot.
	pub(crate) fn seed(&self, registry: &ServiceRegistry) {
		let mut state = self.state.lock();
		let found = registry.service_references_matching(Some(&self.interface), Some(&self.filter));
		for reference in found.into_iter().filter(|r| self.accepts(r)) {
			insert_ranked(&mut state.matched, reference);
		}
		tracing::trace!(reference = self.name(), matched = state.matched.len(), "scr.reference.seed");
	}

	/// Folds a registry event into the candidate set.
	///
	/// A `Registered` or `Modified` event can arrive after the service's
	/// `Unregistering` when the two race on different threads. Such an event
	/// only counts while `registry` still lists the service; the caller holds
	/// its configuration lock across both deliveries, so the check and the
	/// insert cannot be split by the removal.
	pub(crate) fn track(&self, event: &ServiceEvent, registry: &ServiceRegistry) -> Option<RefEvent> {
		let reference = &event.reference;
		if !reference.provides(&self.interface) {
			return None;
		}
		let mut matches = self.accepts(reference);
		let mut state = self.state.lock();
		let known = state.matched.iter().position(|r| r.id() == reference.id());
		if matches && known.is_none() && registry.reference(reference.id()).is_none() {
			tracing::trace!(reference = self.name(), service_id = %reference.id(), "scr.reference.stale");
			matches = false;
		}

		match (event.kind, known, matches) {
			(ServiceEventKind::Unregistering, Some(pos), _) => {
				state.matched.remove(pos);
				Some(RefEvent::Removed(reference.clone()))
			}
			(ServiceEventKind::Registered | ServiceEventKind::Modified, None, true) => {
				insert_ranked(&mut state.matched, reference.clone());
				Some(RefEvent::Added(reference.clone()))
			}
			(ServiceEventKind::Modified | ServiceEventKind::ModifiedEndMatch, Some(pos), false) => {
				state.matched.remove(pos);
				Some(RefEvent::Removed(reference.clone()))
			}
			(ServiceEventKind::Modified, Some(pos), true) => {
				state.matched.remove(pos);
				insert_ranked(&mut state.matched, reference.clone());
				Some(RefEvent::Reordered(reference.clone()))
			}
			_ => None,
		}
	}

	/// Satisfaction against the bound set when active, the matches otherwise.
	pub(crate) fn is_satisfied(&self) -> bool {
		let state = self.state.lock();
		let count = if state.active { state.bound.len() } else { state.matched.len() };
		count >= self.min()
	}

	/// Services an activation would bind, in binding order.
	pub(crate) fn candidates(&self) -> Vec<ServiceReference> {
		self.state.lock().matched.iter().take(self.max()).cloned().collect()
	}

	pub(crate) fn matched(&self) -> Vec<ServiceReference> {
		self.state.lock().matched.clone()
	}

	pub(crate) fn bound(&self) -> Vec<BoundService> {
		self.state.lock().bound.clone()
	}

	/// Enters the active phase with `bound` as the realized bindings.
	pub(crate) fn activate_bindings(&self, bound: Vec<BoundService>) {
		let mut state = self.state.lock();
		state.bound = bound;
		state.active = true;
	}

	/// Leaves the active phase, returning the bindings in unbind (LIFO) order.
	pub(crate) fn deactivate_bindings(&self) -> Vec<BoundService> {
		let mut state = self.state.lock();
		state.active = false;
		let mut bound = std::mem::take(&mut state.bound);
		bound.reverse();
		bound
	}

	pub(crate) fn push_binding(&self, binding: BoundService) {
		let mut state = self.state.lock();
		if state.active && !state.bound.iter().any(|b| b.id() == binding.id()) {
			state.bound.push(binding);
		}
	}

	pub(crate) fn remove_binding(&self, id: ServiceId) -> Option<BoundService> {
		let mut state = self.state.lock();
		let pos = state.bound.iter().position(|b| b.id() == id)?;
		Some(state.bound.remove(pos))
	}

	/// Drops all tracking state.
	pub(crate) fn clear(&self) {
		*self.state.lock() = RefState::default();
	}

	/// Decides how an active configuration reacts to `event`.
	///
	/// Events that went stale while queued (a service added and gone again)
	/// leave the bindings alone.
	pub(crate) fn on_active(&self, event: &RefEvent) -> ActiveOutcome {
		let mut state = self.state.lock();
		if !state.active {
			return ActiveOutcome::Unchanged;
		}

		match event {
			RefEvent::Added(reference) | RefEvent::Reordered(reference)
				if !state.matched.iter().any(|m| m.id() == reference.id()) =>
			{
				ActiveOutcome::Unchanged
			}
			RefEvent::Added(reference) => self.on_added(&state, reference),
			RefEvent::Reordered(reference) => {
				if let Some(bound) = state.bound.iter_mut().find(|b| b.id() == reference.id()) {
					bound.refresh(reference.clone());
					return ActiveOutcome::Unchanged;
				}
				self.on_added(&state, reference)
			}
			RefEvent::Removed(reference) => {
				if !state.bound.iter().any(|b| b.id() == reference.id()) {
					return ActiveOutcome::Unchanged;
				}
				if !self.description.is_dynamic() {
					return ActiveOutcome::Reactivate;
				}
				let replacement = state
					.matched
					.iter()
					.find(|m| m.id() != reference.id() && !state.bound.iter().any(|b| b.id() == m.id()))
					.cloned();
				match replacement {
					Some(replacement) => ActiveOutcome::Rewire(vec![
						WireOp::Bind(replacement),
						WireOp::Unbind(reference.clone()),
					]),
					None if state.bound.len() - 1 < self.min() => ActiveOutcome::Deactivate,
					None => ActiveOutcome::Rewire(vec![WireOp::Unbind(reference.clone())]),
				}
			}
		}
	}

	fn on_added(&self, state: &RefState, reference: &ServiceReference) -> ActiveOutcome {
		if state.bound.iter().any(|b| b.id() == reference.id()) {
			return ActiveOutcome::Unchanged;
		}
		let has_room = state.bound.len() < self.max();
		let displaces = state
			.bound
			.iter()
			.map(BoundService::reference)
			.max_by(|a, b| a.cmp_rank(b))
			.filter(|worst| reference.cmp_rank(worst).is_lt())
			.cloned();

		match (self.description.is_dynamic(), self.description.is_greedy()) {
			(false, true) if has_room || displaces.is_some() => ActiveOutcome::Reactivate,
			(false, _) => ActiveOutcome::Unchanged,
			(true, _) if has_room => ActiveOutcome::Rewire(vec![WireOp::Bind(reference.clone())]),
			(true, true) => match displaces {
				Some(worst) => ActiveOutcome::Rewire(vec![WireOp::Unbind(worst), WireOp::Bind(reference.clone())]),
				None => ActiveOutcome::Unchanged,
			},
			(true, false) => ActiveOutcome::Unchanged,
		}
	}
}

fn insert_ranked(list: &mut Vec<ServiceReference>, reference: ServiceReference) {
	if list.iter().any(|r| r.id() == reference.id()) {
		return;
	}
	let pos = list.partition_point(|r| r.cmp_rank(&reference).is_lt());
	list.insert(pos, reference);
}
