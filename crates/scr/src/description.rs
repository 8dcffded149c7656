//! Component metadata handed to the runtime by a description producer.
//!
//! Descriptions are plain data. They can be built in code with the builder
//! methods or deserialized with serde; the runtime only requires that
//! [`ComponentDescription::validate`] passes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use trellis_registry::{Filter, Properties, PropertyValue};

use crate::{Result, ScrError};

/// How many services a reference binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cardinality {
	/// `0..1`
	#[serde(rename = "0..1")]
	Optional,
	/// `1..1`
	#[default]
	#[serde(rename = "1..1")]
	Mandatory,
	/// `0..n`
	#[serde(rename = "0..n")]
	Multiple,
	/// `1..n`
	#[serde(rename = "1..n")]
	AtLeastOne,
}

impl Cardinality {
	/// Fewest bound services for the reference to be satisfied.
	pub fn min(self) -> usize {
		match self {
			Self::Optional | Self::Multiple => 0,
			Self::Mandatory | Self::AtLeastOne => 1,
		}
	}

	/// Most services bound at once.
	pub fn max(self) -> usize {
		match self {
			Self::Optional | Self::Mandatory => 1,
			Self::Multiple | Self::AtLeastOne => usize::MAX,
		}
	}

	pub fn is_mandatory(self) -> bool {
		self.min() > 0
	}

	pub fn is_multiple(self) -> bool {
		self.max() > 1
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Optional => "0..1",
			Self::Mandatory => "1..1",
			Self::Multiple => "0..n",
			Self::AtLeastOne => "1..n",
		}
	}
}

impl fmt::Display for Cardinality {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Cardinality {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.trim() {
			"0..1" => Ok(Self::Optional),
			"1..1" => Ok(Self::Mandatory),
			"0..n" => Ok(Self::Multiple),
			"1..n" => Ok(Self::AtLeastOne),
			other => Err(format!("unknown cardinality {other:?}")),
		}
	}
}

/// Whether bindings may change while the component is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
	#[default]
	Static,
	Dynamic,
}

/// Whether a better-ranked service displaces a bound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOption {
	#[default]
	Reluctant,
	Greedy,
}

/// When a satisfied component providing a service is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationPolicy {
	Immediate,
	/// On first use of the provided service.
	#[default]
	Delayed,
}

/// How externally supplied configuration affects a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationPolicy {
	Ignore,
	#[default]
	Optional,
	Require,
}

/// How many instances back a component's provided service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
	/// One instance shared by every client.
	#[default]
	Singleton,
	/// One instance per requesting bundle.
	Bundle,
	/// A new instance for every lookup.
	Prototype,
}

impl ServiceScope {
	/// Value published as `service.scope`.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Singleton => "singleton",
			Self::Bundle => "bundle",
			Self::Prototype => "prototype",
		}
	}
}

/// A declared dependency of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescription {
	pub name: String,
	pub interface: String,
	#[serde(default)]
	pub cardinality: Cardinality,
	#[serde(default)]
	pub policy: ReferencePolicy,
	#[serde(default)]
	pub policy_option: PolicyOption,
	/// Extra LDAP filter AND-ed with the interface match.
	#[serde(default)]
	pub target: Option<String>,
}

impl ReferenceDescription {
	/// Mandatory static reluctant reference.
	pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			interface: interface.into(),
			cardinality: Cardinality::default(),
			policy: ReferencePolicy::default(),
			policy_option: PolicyOption::default(),
			target: None,
		}
	}

	pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
		self.cardinality = cardinality;
		self
	}

	pub fn policy(mut self, policy: ReferencePolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn policy_option(mut self, option: PolicyOption) -> Self {
		self.policy_option = option;
		self
	}

	pub fn target(mut self, filter: impl Into<String>) -> Self {
		self.target = Some(filter.into());
		self
	}

	pub fn is_dynamic(&self) -> bool {
		self.policy == ReferencePolicy::Dynamic
	}

	pub fn is_greedy(&self) -> bool {
		self.policy_option == PolicyOption::Greedy
	}

	/// Full filter used to track candidates.
	pub fn filter(&self) -> std::result::Result<Filter, trellis_registry::FilterError> {
		Filter::for_interface(&self.interface, self.target.as_deref())
	}

	/// Component property that replaces [`Self::target`], `<name>.target`.
	pub fn target_property(&self) -> String {
		format!("{}.target", self.name)
	}

	/// This reference with its target taken from `properties` when they
	/// carry a string `<name>.target`.
	pub fn retargeted(&self, properties: &Properties) -> Self {
		match properties.get(&self.target_property()).and_then(PropertyValue::as_str) {
			Some(target) => Self {
				target: Some(target.to_string()),
				..self.clone()
			},
			None => self.clone(),
		}
	}
}

/// Immutable metadata of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescription {
	pub name: String,
	/// Identity of the implementation; informational.
	#[serde(default)]
	pub implementation: String,
	/// Interfaces the component's service is registered under.
	#[serde(default)]
	pub provides: Vec<String>,
	#[serde(default)]
	pub references: Vec<ReferenceDescription>,
	/// Property defaults.
	#[serde(default)]
	pub properties: Properties,
	#[serde(default)]
	pub activation: ActivationPolicy,
	#[serde(default)]
	pub scope: ServiceScope,
	#[serde(default)]
	pub configuration_policy: ConfigurationPolicy,
	/// Configuration key; defaults to the name.
	#[serde(default)]
	pub configuration_pid: Option<String>,
	/// Enabled as soon as it is declared.
	#[serde(default = "enabled_by_default")]
	pub enabled: bool,
	/// The component handles property changes in place.
	#[serde(default)]
	pub modified: bool,
	/// Mandatory unary references are handed to the constructor.
	#[serde(default)]
	pub inject_references: bool,
}

fn enabled_by_default() -> bool {
	true
}

impl ComponentDescription {
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			implementation: name.clone(),
			name,
			provides: Vec::new(),
			references: Vec::new(),
			properties: Properties::new(),
			activation: ActivationPolicy::default(),
			scope: ServiceScope::default(),
			configuration_policy: ConfigurationPolicy::default(),
			configuration_pid: None,
			enabled: true,
			modified: false,
			inject_references: false,
		}
	}

	pub fn implementation(mut self, implementation: impl Into<String>) -> Self {
		self.implementation = implementation.into();
		self
	}

	pub fn provide(mut self, interface: impl Into<String>) -> Self {
		self.provides.push(interface.into());
		self
	}

	pub fn reference(mut self, reference: ReferenceDescription) -> Self {
		self.references.push(reference);
		self
	}

	pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
		self.properties.insert(key, value);
		self
	}

	pub fn activation(mut self, activation: ActivationPolicy) -> Self {
		self.activation = activation;
		self
	}

	pub fn immediate(self) -> Self {
		self.activation(ActivationPolicy::Immediate)
	}

	pub fn scope(mut self, scope: ServiceScope) -> Self {
		self.scope = scope;
		self
	}

	pub fn configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
		self.configuration_policy = policy;
		self
	}

	pub fn configuration_pid(mut self, pid: impl Into<String>) -> Self {
		self.configuration_pid = Some(pid.into());
		self
	}

	pub fn enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;
		self
	}

	pub fn with_modified(mut self) -> Self {
		self.modified = true;
		self
	}

	pub fn inject_references(mut self, inject: bool) -> Self {
		self.inject_references = inject;
		self
	}

	/// Configuration key this component listens to.
	pub fn pid(&self) -> &str {
		self.configuration_pid.as_deref().unwrap_or(&self.name)
	}

	/// True when the component activates as soon as it is satisfied.
	pub fn activates_eagerly(&self) -> bool {
		self.activation == ActivationPolicy::Immediate || self.provides.is_empty()
	}

	pub fn validate(&self) -> Result<()> {
		let invalid = |reason: String| ScrError::InvalidDescription {
			component: self.name.clone(),
			reason,
		};

		if self.name.trim().is_empty() {
			return Err(invalid("component name is empty".to_string()));
		}
		if let Some(iface) = self.provides.iter().find(|i| i.trim().is_empty()) {
			return Err(invalid(format!("provided interface {iface:?} is empty")));
		}
		if self.scope != ServiceScope::Singleton {
			if self.provides.is_empty() {
				return Err(invalid(format!("{} scope without a provided service", self.scope.as_str())));
			}
			if self.activation == ActivationPolicy::Immediate {
				return Err(invalid(format!("{} scope cannot be immediate", self.scope.as_str())));
			}
		}
		for (i, reference) in self.references.iter().enumerate() {
			if reference.name.trim().is_empty() {
				return Err(invalid(format!("reference #{i} has no name")));
			}
			if reference.interface.trim().is_empty() {
				return Err(invalid(format!("reference {} has no interface", reference.name)));
			}
			if self.references[..i].iter().any(|r| r.name == reference.name) {
				return Err(invalid(format!("duplicate reference name {}", reference.name)));
			}
			if let Err(err) = reference.filter() {
				return Err(invalid(format!("reference {} has a bad target: {err}", reference.name)));
			}
		}
		Ok(())
	}
}
