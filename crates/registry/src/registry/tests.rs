use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::{FilterError, ServiceFactory};

const OWNER: BundleId = BundleId(1);

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<(ServiceEventKind, u64)>>,
}

impl Recorder {
	fn listen(registry: &ServiceRegistry, filter: Option<&str>) -> Arc<Self> {
		let recorder = Arc::new(Self::default());
		let sink = Arc::clone(&recorder);
		let filter = filter.map(|f| Filter::parse(f).unwrap());
		registry.add_listener(
			Arc::new(move |event: &ServiceEvent| sink.events.lock().push((event.kind, event.reference.id().0))),
			filter,
		);
		recorder
	}

	fn take(&self) -> Vec<(ServiceEventKind, u64)> {
		std::mem::take(&mut *self.events.lock())
	}
}

fn ranked(ranking: i64) -> Properties {
	Properties::new().with(keys::SERVICE_RANKING, ranking)
}

fn register(registry: &ServiceRegistry, interface: &str, props: Properties) -> ServiceReference {
	registry
		.register(OWNER, [interface], props, InterfaceMap::new().with(interface, ()))
		.unwrap()
}

#[rstest]
#[case::ranking_descending(&[0, 10, -5], &[2, 1, 3])]
#[case::ties_by_id(&[7, 7], &[1, 2])]
#[case::mixed(&[1, 5, 5, 0], &[2, 3, 1, 4])]
fn lookups_follow_ranking_order(#[case] rankings: &[i64], #[case] expected_ids: &[u64]) {
	let registry = ServiceRegistry::new();
	for ranking in rankings {
		register(&registry, "Foo", ranked(*ranking));
	}

	let ids: Vec<u64> = registry
		.service_references(Some("Foo"), None)
		.unwrap()
		.iter()
		.map(|r| r.id().0)
		.collect();
	assert_eq!(ids, expected_ids);
	assert_eq!(registry.service_reference("Foo").map(|r| r.id().0), expected_ids.first().copied());
}

#[test]
fn registry_stamps_reserved_properties() {
	let registry = ServiceRegistry::new();
	let forged = Properties::new()
		.with(keys::SERVICE_ID, 999)
		.with(keys::OBJECTCLASS, "Forged")
		.with("custom", "kept");
	let reference = registry
		.register(BundleId(4), ["Foo", "Bar", "Foo"], forged, InterfaceMap::new())
		.unwrap();

	let props = reference.properties();
	assert_eq!(props.get(keys::SERVICE_ID), Some(&PropertyValue::Int(1)));
	assert_eq!(props.get(keys::SERVICE_BUNDLE_ID), Some(&PropertyValue::Int(4)));
	assert_eq!(
		props.get(keys::OBJECTCLASS),
		Some(&PropertyValue::List(vec!["Foo".into(), "Bar".into()]))
	);
	assert_eq!(props.get("custom"), Some(&PropertyValue::from("kept")));
	assert_eq!(reference.interfaces().len(), 2);
}

#[test]
fn empty_interface_list_is_rejected() {
	let registry = ServiceRegistry::new();
	let err = registry
		.register(OWNER, Vec::<String>::new(), Properties::new(), InterfaceMap::new())
		.unwrap_err();
	assert_eq!(err, RegistryError::NoInterfaces);
}

#[test]
fn filters_narrow_queries_and_bad_filters_error() {
	let registry = ServiceRegistry::new();
	register(&registry, "Foo", Properties::new().with("lang", "en"));
	register(&registry, "Foo", Properties::new().with("lang", "fr"));
	register(&registry, "Bar", Properties::new().with("lang", "en"));

	let en_foo = registry.service_references(Some("Foo"), Some("(lang=en)")).unwrap();
	assert_eq!(en_foo.len(), 1);
	let all_en = registry.service_references(None, Some("(lang=en)")).unwrap();
	assert_eq!(all_en.len(), 2);
	assert!(matches!(
		registry.service_references(None, Some("(lang=en")),
		Err(RegistryError::Filter(FilterError::UnexpectedEnd))
	));
}

#[test]
fn ids_are_never_reused() {
	let registry = ServiceRegistry::new();
	let first = register(&registry, "Foo", Properties::new());
	assert!(registry.unregister(first.id()));
	let second = register(&registry, "Foo", Properties::new());
	assert!(second.id() > first.id());
}

#[test]
fn unknown_unregister_is_a_reported_no_op() {
	let registry = ServiceRegistry::new();
	let events = Recorder::listen(&registry, None);
	assert!(!registry.unregister(ServiceId(42)));
	assert!(!registry.set_properties(ServiceId(42), Properties::new()));
	assert_eq!(events.take(), vec![]);
}

#[test]
fn lifecycle_events_in_order() {
	let registry = ServiceRegistry::new();
	let events = Recorder::listen(&registry, None);

	let reference = register(&registry, "Foo", Properties::new());
	assert!(registry.set_properties(reference.id(), ranked(3)));
	assert!(registry.unregister(reference.id()));
	assert!(!registry.unregister(reference.id()));

	assert_eq!(
		events.take(),
		vec![
			(ServiceEventKind::Registered, 1),
			(ServiceEventKind::Modified, 1),
			(ServiceEventKind::Unregistering, 1),
		]
	);
	assert!(registry.is_empty());
}

#[test]
fn modified_endmatch_reaches_filtered_listeners() {
	let registry = ServiceRegistry::new();
	let en_only = Recorder::listen(&registry, Some("(lang=en)"));

	let reference = register(&registry, "Foo", Properties::new().with("lang", "en"));
	registry.set_properties(reference.id(), Properties::new().with("lang", "fr"));
	registry.set_properties(reference.id(), Properties::new().with("lang", "de"));
	registry.set_properties(reference.id(), Properties::new().with("lang", "en"));
	registry.unregister(reference.id());

	assert_eq!(
		en_only.take(),
		vec![
			(ServiceEventKind::Registered, 1),
			(ServiceEventKind::ModifiedEndMatch, 1),
			(ServiceEventKind::Modified, 1),
			(ServiceEventKind::Unregistering, 1),
		]
	);
}

#[test]
fn service_resolves_during_unregistering_delivery() {
	let registry = Arc::new(ServiceRegistry::new());
	let resolved = Arc::new(AtomicUsize::new(0));
	{
		let registry_for_listener = Arc::downgrade(&registry);
		let resolved = Arc::clone(&resolved);
		registry.add_listener(
			Arc::new(move |event: &ServiceEvent| {
				let Some(registry) = registry_for_listener.upgrade() else {
					return;
				};
				if event.kind == ServiceEventKind::Unregistering {
					assert!(registry.service_reference("Foo").is_none(), "hidden from queries");
					if registry.get_service(&event.reference, OWNER).is_some() {
						resolved.fetch_add(1, Ordering::SeqCst);
					}
				}
			}),
			None,
		);
	}

	let reference = register(&registry, "Foo", Properties::new());
	registry.unregister(reference.id());
	assert_eq!(resolved.load(Ordering::SeqCst), 1);
	assert!(!reference.is_available());
	assert!(registry.get_service(&reference, OWNER).is_none());
}

#[test]
fn deferred_registration_is_invisible_until_announced() {
	let registry = ServiceRegistry::new();
	let events = Recorder::listen(&registry, None);

	let reference = registry
		.register_deferred(OWNER, ["Foo"], Properties::new(), InterfaceMap::new())
		.unwrap();
	assert!(registry.service_reference("Foo").is_none());
	assert_eq!(events.take(), vec![]);

	assert!(registry.announce(reference.id()));
	assert!(!registry.announce(reference.id()));
	assert_eq!(registry.service_reference("Foo").map(|r| r.id()), Some(reference.id()));
	assert_eq!(events.take(), vec![(ServiceEventKind::Registered, 1)]);
}

#[test]
fn unannounced_unregister_is_silent() {
	let registry = ServiceRegistry::new();
	let events = Recorder::listen(&registry, None);
	let reference = registry
		.register_deferred(OWNER, ["Foo"], Properties::new(), InterfaceMap::new())
		.unwrap();
	assert!(registry.unregister(reference.id()));
	assert!(!registry.announce(reference.id()));
	assert_eq!(events.take(), vec![]);
}

#[test]
fn unregister_all_removes_only_the_bundles_services() {
	let registry = ServiceRegistry::new();
	register(&registry, "Foo", Properties::new());
	register(&registry, "Bar", Properties::new());
	registry
		.register(BundleId(9), ["Foo"], Properties::new(), InterfaceMap::new())
		.unwrap();

	assert_eq!(registry.unregister_all(OWNER), 2);
	let left: Vec<BundleId> = registry
		.service_references(None, None)
		.unwrap()
		.iter()
		.map(ServiceReference::bundle)
		.collect();
	assert_eq!(left, vec![BundleId(9)]);
}

struct CountingFactory {
	calls: AtomicUsize,
}

impl ServiceFactory for CountingFactory {
	fn get_service(&self, _bundle: BundleId, reference: &ServiceReference) -> Option<InterfaceMap> {
		let n = self.calls.fetch_add(1, Ordering::SeqCst);
		(n == 0).then(|| InterfaceMap::new().with("Foo", reference.id().0))
	}
}

#[test]
fn factory_services_are_resolved_lazily() {
	let registry = ServiceRegistry::new();
	let factory = Arc::new(CountingFactory {
		calls: AtomicUsize::new(0),
	});
	let reference = registry
		.register(OWNER, ["Foo"], Properties::new(), factory.clone() as Arc<dyn ServiceFactory>)
		.unwrap();
	assert_eq!(factory.calls.load(Ordering::SeqCst), 0);

	let services = registry.get_service(&reference, BundleId(2)).unwrap();
	assert_eq!(services.get::<u64>("Foo"), Some(reference.id().0));
	assert!(registry.get_service(&reference, BundleId(2)).is_none());
}

#[test]
fn listeners_can_be_removed_and_panics_are_contained() {
	let registry = ServiceRegistry::new();
	let token = registry.add_listener(
		Arc::new(|event: &ServiceEvent| {
			if event.kind == ServiceEventKind::Registered {
				panic!("listener bug");
			}
		}),
		None,
	);
	let events = Recorder::listen(&registry, None);

	register(&registry, "Foo", Properties::new());
	assert_eq!(events.take().len(), 1, "later listeners still notified");

	assert!(registry.remove_listener(token));
	assert!(!registry.remove_listener(token));
}

#[test]
fn listeners_may_register_reentrantly() {
	let registry = Arc::new(ServiceRegistry::new());
	let weak = Arc::downgrade(&registry);
	registry.add_listener(
		Arc::new(move |event: &ServiceEvent| {
			if event.kind == ServiceEventKind::Registered && event.reference.provides("Foo") {
				if let Some(registry) = weak.upgrade() {
					registry
						.register(OWNER, ["Echo"], Properties::new(), InterfaceMap::new())
						.unwrap();
				}
			}
		}),
		None,
	);

	register(&registry, "Foo", Properties::new());
	assert!(registry.service_reference("Echo").is_some());
}
