//! Serializable snapshots of runtime state, for introspection.

use serde::{Deserialize, Serialize};
use trellis_registry::{BundleId, Properties, ServiceId};

use crate::ComponentState;
use crate::description::{
	ActivationPolicy, Cardinality, ComponentDescription, ConfigurationPolicy, PolicyOption, ReferenceDescription,
	ReferencePolicy, ServiceScope,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDto {
	pub name: String,
	pub interface: String,
	pub cardinality: Cardinality,
	pub policy: ReferencePolicy,
	pub policy_option: PolicyOption,
	pub target: Option<String>,
}

impl From<&ReferenceDescription> for ReferenceDto {
	fn from(reference: &ReferenceDescription) -> Self {
		Self {
			name: reference.name.clone(),
			interface: reference.interface.clone(),
			cardinality: reference.cardinality,
			policy: reference.policy,
			policy_option: reference.policy_option,
			target: reference.target.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptionDto {
	pub name: String,
	pub bundle: BundleId,
	pub implementation: String,
	pub provides: Vec<String>,
	pub references: Vec<ReferenceDto>,
	pub properties: Properties,
	pub activation: ActivationPolicy,
	pub scope: ServiceScope,
	pub configuration_policy: ConfigurationPolicy,
	pub configuration_pid: String,
	pub default_enabled: bool,
	/// Current enabled state, which may differ from `default_enabled`.
	pub enabled: bool,
	pub modified: bool,
}

impl ComponentDescriptionDto {
	pub(crate) fn new(description: &ComponentDescription, bundle: BundleId, enabled: bool) -> Self {
		Self {
			name: description.name.clone(),
			bundle,
			implementation: description.implementation.clone(),
			provides: description.provides.clone(),
			references: description.references.iter().map(ReferenceDto::from).collect(),
			properties: description.properties.clone(),
			activation: description.activation,
			scope: description.scope,
			configuration_policy: description.configuration_policy,
			configuration_pid: description.pid().to_string(),
			default_enabled: description.enabled,
			enabled,
			modified: description.modified,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatisfiedReferenceDto {
	pub name: String,
	pub target: String,
	pub bound_services: Vec<ServiceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsatisfiedReferenceDto {
	pub name: String,
	pub target: String,
	/// Services currently matching the target, fewer than required.
	pub target_services: Vec<ServiceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfigurationDto {
	pub id: u64,
	pub name: String,
	pub state: ComponentState,
	pub properties: Properties,
	/// Service registered for this configuration, if any.
	pub service: Option<ServiceId>,
	pub satisfied_references: Vec<SatisfiedReferenceDto>,
	pub unsatisfied_references: Vec<UnsatisfiedReferenceDto>,
}
