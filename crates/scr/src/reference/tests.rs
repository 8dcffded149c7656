use pretty_assertions::assert_eq;
use rstest::rstest;
use trellis_registry::{BundleId, InterfaceMap, Properties};

use super::*;
use crate::description::{Cardinality, PolicyOption, ReferencePolicy};

const OWNER: u64 = 77;

fn register(registry: &ServiceRegistry, ranking: i64) -> ServiceReference {
	registry
		.register(
			BundleId(1),
			["Foo"],
			Properties::new().with(keys::SERVICE_RANKING, ranking),
			InterfaceMap::new(),
		)
		.unwrap()
}

fn manager(cardinality: Cardinality, policy: ReferencePolicy, option: PolicyOption) -> ReferenceManager {
	let description = ReferenceDescription::new("foo", "Foo")
		.cardinality(cardinality)
		.policy(policy)
		.policy_option(option);
	ReferenceManager::new(&description, OWNER, &Properties::new()).unwrap()
}

fn binding(reference: &ServiceReference) -> BoundService {
	BoundService::new(Arc::from("Foo"), reference.clone(), InterfaceMap::new())
}

fn activate(rm: &ReferenceManager) -> Vec<ServiceReference> {
	let candidates = rm.candidates();
	rm.activate_bindings(candidates.iter().map(binding).collect());
	candidates
}

fn registered(reference: &ServiceReference) -> ServiceEvent {
	ServiceEvent::new(ServiceEventKind::Registered, reference.clone())
}

fn unregistering(reference: &ServiceReference) -> ServiceEvent {
	ServiceEvent::new(ServiceEventKind::Unregistering, reference.clone())
}

fn ids(list: &[ServiceReference]) -> Vec<u64> {
	list.iter().map(|r| r.id().0).collect()
}

#[test]
fn seed_orders_candidates_and_skips_own_services() {
	let registry = ServiceRegistry::new();
	register(&registry, 0);
	register(&registry, 10);
	registry
		.register(
			BundleId(1),
			["Foo"],
			Properties::new()
				.with(keys::SERVICE_RANKING, 100)
				.with(keys::COMPONENT_ID, OWNER as i64),
			InterfaceMap::new(),
		)
		.unwrap();

	let rm = manager(Cardinality::Mandatory, ReferencePolicy::Static, PolicyOption::Reluctant);
	rm.seed(&registry);

	assert_eq!(ids(&rm.matched()), vec![2, 1]);
	assert_eq!(ids(&rm.candidates()), vec![2]);
	assert!(rm.is_satisfied());
}

#[test]
fn target_filter_narrows_matches() {
	let registry = ServiceRegistry::new();
	let en = registry
		.register(BundleId(1), ["Foo"], Properties::new().with("lang", "en"), InterfaceMap::new())
		.unwrap();
	registry
		.register(BundleId(1), ["Foo"], Properties::new().with("lang", "fr"), InterfaceMap::new())
		.unwrap();

	let description = ReferenceDescription::new("foo", "Foo").target("(lang=en)");
	let rm = ReferenceManager::new(&description, OWNER, &Properties::new()).unwrap();
	rm.seed(&registry);
	assert_eq!(ids(&rm.matched()), vec![en.id().0]);
}

#[test]
fn target_property_replaces_declared_target() {
	let registry = ServiceRegistry::new();
	registry
		.register(BundleId(1), ["Foo"], Properties::new().with("lang", "en"), InterfaceMap::new())
		.unwrap();
	let fr = registry
		.register(BundleId(1), ["Foo"], Properties::new().with("lang", "fr"), InterfaceMap::new())
		.unwrap();

	let description = ReferenceDescription::new("foo", "Foo").target("(lang=en)");
	let rm = ReferenceManager::new(&description, OWNER, &Properties::new().with("foo.target", "(lang=fr)")).unwrap();
	rm.seed(&registry);
	assert_eq!(ids(&rm.matched()), vec![fr.id().0]);
	assert_eq!(rm.filter().to_string(), "(&(objectclass=Foo)(lang=fr))");

	assert!(ReferenceManager::new(&description, OWNER, &Properties::new().with("foo.target", "(lang=")).is_err());
}

#[test]
fn track_follows_registry_changes() {
	let registry = ServiceRegistry::new();
	let description = ReferenceDescription::new("foo", "Foo").target("(lang=en)");
	let rm = ReferenceManager::new(&description, OWNER, &Properties::new()).unwrap();
	assert!(!rm.is_satisfied());

	let svc = registry
		.register(BundleId(1), ["Foo"], Properties::new().with("lang", "en"), InterfaceMap::new())
		.unwrap();
	assert!(matches!(rm.track(&registered(&svc), &registry), Some(RefEvent::Added(_))));
	assert!(rm.is_satisfied());

	registry.set_properties(svc.id(), Properties::new().with("lang", "en").with("x", 1));
	let modified = ServiceEvent::new(ServiceEventKind::Modified, registry.reference(svc.id()).unwrap());
	assert!(matches!(rm.track(&modified, &registry), Some(RefEvent::Reordered(_))));

	registry.set_properties(svc.id(), Properties::new().with("lang", "fr"));
	let no_longer = ServiceEvent::new(ServiceEventKind::Modified, registry.reference(svc.id()).unwrap());
	assert!(matches!(rm.track(&no_longer, &registry), Some(RefEvent::Removed(_))));
	assert!(!rm.is_satisfied());
	assert!(rm.track(&unregistering(&svc), &registry).is_none(), "already gone from the candidate set");

	let other = registry
		.register(BundleId(1), ["Bar"], Properties::new().with("lang", "en"), InterfaceMap::new())
		.unwrap();
	assert!(rm.track(&registered(&other), &registry).is_none(), "different interface");
}

#[rstest]
#[case::static_reluctant_full(ReferencePolicy::Static, PolicyOption::Reluctant, Cardinality::Mandatory, 10, "unchanged")]
#[case::static_greedy_outranks(ReferencePolicy::Static, PolicyOption::Greedy, Cardinality::Mandatory, 10, "reactivate")]
#[case::static_greedy_outranked(ReferencePolicy::Static, PolicyOption::Greedy, Cardinality::Mandatory, -1, "unchanged")]
#[case::static_greedy_room(ReferencePolicy::Static, PolicyOption::Greedy, Cardinality::Multiple, -1, "reactivate")]
#[case::static_reluctant_room(ReferencePolicy::Static, PolicyOption::Reluctant, Cardinality::Multiple, 10, "unchanged")]
#[case::dynamic_reluctant_full(ReferencePolicy::Dynamic, PolicyOption::Reluctant, Cardinality::Mandatory, 10, "unchanged")]
#[case::dynamic_greedy_outranks(ReferencePolicy::Dynamic, PolicyOption::Greedy, Cardinality::Mandatory, 10, "swap")]
#[case::dynamic_greedy_outranked(ReferencePolicy::Dynamic, PolicyOption::Greedy, Cardinality::Optional, -1, "unchanged")]
#[case::dynamic_reluctant_room(ReferencePolicy::Dynamic, PolicyOption::Reluctant, Cardinality::Multiple, -1, "bind")]
fn added_service_while_active(
	#[case] policy: ReferencePolicy,
	#[case] option: PolicyOption,
	#[case] cardinality: Cardinality,
	#[case] new_ranking: i64,
	#[case] expected: &str,
) {
	let registry = ServiceRegistry::new();
	let incumbent = register(&registry, 0);
	let rm = manager(cardinality, policy, option);
	rm.seed(&registry);
	activate(&rm);

	let newcomer = register(&registry, new_ranking);
	let event = rm.track(&registered(&newcomer), &registry).unwrap();
	let outcome = rm.on_active(&event);

	let want = match expected {
		"unchanged" => ActiveOutcome::Unchanged,
		"reactivate" => ActiveOutcome::Reactivate,
		"bind" => ActiveOutcome::Rewire(vec![WireOp::Bind(newcomer.clone())]),
		"swap" => ActiveOutcome::Rewire(vec![WireOp::Unbind(incumbent.clone()), WireOp::Bind(newcomer.clone())]),
		other => panic!("unknown expectation {other}"),
	};
	assert_eq!(outcome, want);
}

#[test]
fn dynamic_loss_binds_replacement_before_unbinding() {
	let registry = ServiceRegistry::new();
	let best = register(&registry, 10);
	let spare = register(&registry, 0);
	let rm = manager(Cardinality::Mandatory, ReferencePolicy::Dynamic, PolicyOption::Reluctant);
	rm.seed(&registry);
	assert_eq!(ids(&activate(&rm)), vec![best.id().0]);

	let event = rm.track(&unregistering(&best), &registry).unwrap();
	assert_eq!(
		rm.on_active(&event),
		ActiveOutcome::Rewire(vec![WireOp::Bind(spare.clone()), WireOp::Unbind(best.clone())])
	);
}

#[rstest]
#[case::mandatory_deactivates(Cardinality::Mandatory, ActiveOutcome::Deactivate)]
#[case::optional_just_unbinds(Cardinality::Optional, ActiveOutcome::Rewire(Vec::new()))]
fn dynamic_loss_without_replacement(#[case] cardinality: Cardinality, #[case] expected: ActiveOutcome) {
	let registry = ServiceRegistry::new();
	let only = register(&registry, 0);
	let rm = manager(cardinality, ReferencePolicy::Dynamic, PolicyOption::Reluctant);
	rm.seed(&registry);
	activate(&rm);

	let event = rm.track(&unregistering(&only), &registry).unwrap();
	let expected = match expected {
		ActiveOutcome::Rewire(_) => ActiveOutcome::Rewire(vec![WireOp::Unbind(only.clone())]),
		other => other,
	};
	assert_eq!(rm.on_active(&event), expected);
}

#[test]
fn static_loss_of_bound_service_reactivates() {
	let registry = ServiceRegistry::new();
	let bound = register(&registry, 5);
	let unbound = register(&registry, 0);
	let rm = manager(Cardinality::Mandatory, ReferencePolicy::Static, PolicyOption::Reluctant);
	rm.seed(&registry);
	activate(&rm);

	let ignored = rm.track(&unregistering(&unbound), &registry).unwrap();
	assert_eq!(rm.on_active(&ignored), ActiveOutcome::Unchanged);
	let lost = rm.track(&unregistering(&bound), &registry).unwrap();
	assert_eq!(rm.on_active(&lost), ActiveOutcome::Reactivate);
}

#[test]
fn satisfaction_uses_bound_set_while_active() {
	let registry = ServiceRegistry::new();
	let svc = register(&registry, 0);
	let rm = manager(Cardinality::Mandatory, ReferencePolicy::Dynamic, PolicyOption::Reluctant);
	rm.seed(&registry);
	activate(&rm);

	rm.track(&unregistering(&svc), &registry);
	assert!(rm.is_satisfied(), "still bound until the unbind is applied");
	assert!(rm.remove_binding(svc.id()).is_some());
	assert!(!rm.is_satisfied());
}

#[test]
fn unbind_order_is_reverse_of_realized_binds() {
	let registry = ServiceRegistry::new();
	let s1 = register(&registry, 10);
	let s2 = register(&registry, 5);
	let rm = manager(Cardinality::Multiple, ReferencePolicy::Dynamic, PolicyOption::Reluctant);
	rm.seed(&registry);
	assert_eq!(ids(&activate(&rm)), vec![s1.id().0, s2.id().0]);

	let s3 = register(&registry, 20);
	rm.track(&registered(&s3), &registry);
	rm.push_binding(binding(&s3));
	rm.remove_binding(s1.id());
	let s4 = register(&registry, 1);
	rm.push_binding(binding(&s4));

	let order: Vec<u64> = rm.deactivate_bindings().iter().map(|b| b.id().0).collect();
	assert_eq!(order, vec![s4.id().0, s3.id().0, s2.id().0]);
	assert!(rm.bound().is_empty());
}

#[test]
fn registered_event_arriving_after_removal_is_ignored() {
	let registry = ServiceRegistry::new();
	let rm = manager(Cardinality::Mandatory, ReferencePolicy::Static, PolicyOption::Reluctant);
	let svc = register(&registry, 0);
	let late = registered(&svc);
	registry.unregister(svc.id());

	assert!(rm.track(&unregistering(&svc), &registry).is_none());
	assert!(rm.track(&late, &registry).is_none());
	let modified = ServiceEvent::new(ServiceEventKind::Modified, svc.clone());
	assert!(rm.track(&modified, &registry).is_none());
	assert!(rm.matched().is_empty());
	assert!(!rm.is_satisfied());
}
