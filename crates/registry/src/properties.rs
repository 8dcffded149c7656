//! Service and component property maps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved property keys.
pub mod keys {
	/// Interfaces a service is registered under. Set by the registry.
	pub const OBJECTCLASS: &str = "objectclass";
	/// Registry-assigned service id. Set by the registry.
	pub const SERVICE_ID: &str = "service.id";
	/// Ordering hint for lookups; higher wins. Defaults to 0.
	pub const SERVICE_RANKING: &str = "service.ranking";
	/// Id of the bundle owning the registration. Set by the registry.
	pub const SERVICE_BUNDLE_ID: &str = "service.bundleid";
	/// Name of the component that registered a service.
	pub const COMPONENT_NAME: &str = "component.name";
	/// Id of the component configuration that registered a service.
	pub const COMPONENT_ID: &str = "component.id";
	/// Whether clients share one service object, get one per bundle, or one
	/// per lookup.
	pub const SERVICE_SCOPE: &str = "service.scope";
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	List(Vec<PropertyValue>),
	Map(Properties),
}

impl PropertyValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[PropertyValue]> {
		match self {
			Self::List(items) => Some(items),
			_ => None,
		}
	}
}

impl fmt::Display for PropertyValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(b) => write!(f, "{b}"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Float(x) => write!(f, "{x}"),
			Self::String(s) => f.write_str(s),
			Self::List(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str("]")
			}
			Self::Map(map) => write!(f, "{map:?}"),
		}
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<i32> for PropertyValue {
	fn from(value: i32) -> Self {
		Self::Int(i64::from(value))
	}
}

impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		Self::String(value.to_string())
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<Vec<PropertyValue>> for PropertyValue {
	fn from(value: Vec<PropertyValue>) -> Self {
		Self::List(value)
	}
}

impl From<Properties> for PropertyValue {
	fn from(value: Properties) -> Self {
		Self::Map(value)
	}
}

/// Ordered, case-sensitive string to value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style insert.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
		self.insert(key, value);
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
		self.0.insert(key.into(), value.into())
	}

	pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
		self.0.remove(key)
	}

	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.0.get(key)
	}

	/// Looks a key up ignoring ASCII case, preferring an exact match.
	pub fn get_ignore_case(&self, key: &str) -> Option<&PropertyValue> {
		self.0
			.get(key)
			.or_else(|| self.0.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.0.contains_key(key)
	}

	/// Overlays `other` onto `self`; keys in `other` win.
	pub fn merge(&mut self, other: &Properties) {
		for (key, value) in &other.0 {
			self.0.insert(key.clone(), value.clone());
		}
	}

	/// `service.ranking` as an integer; absent or non-integer values rank 0.
	pub fn ranking(&self) -> i64 {
		self.get(keys::SERVICE_RANKING).and_then(PropertyValue::as_i64).unwrap_or(0)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}
