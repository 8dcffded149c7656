use std::cmp::Ordering;

use super::{CompareOp, Filter};
use crate::{Properties, PropertyValue};

impl Filter {
	/// Evaluates the filter against a property map.
	pub fn matches(&self, props: &Properties) -> bool {
		match self {
			Self::And(items) => items.iter().all(|f| f.matches(props)),
			Self::Or(items) => items.iter().any(|f| f.matches(props)),
			Self::Not(inner) => !inner.matches(props),
			Self::Present(attr) => props.get_ignore_case(attr).is_some(),
			Self::Compare { attr, op, value } => props.get_ignore_case(attr).is_some_and(|v| compare(v, *op, value)),
			Self::Substring { attr, initial, any, last } => props
				.get_ignore_case(attr)
				.is_some_and(|v| substring(v, initial.as_deref(), any, last.as_deref())),
		}
	}
}

fn compare(value: &PropertyValue, op: CompareOp, operand: &str) -> bool {
	match value {
		PropertyValue::List(items) => items.iter().any(|item| compare(item, op, operand)),
		PropertyValue::Map(_) => false,
		PropertyValue::String(s) => match op {
			CompareOp::Equal => s == operand,
			CompareOp::Approx => approx_eq(s, operand),
			CompareOp::GreaterEq => s.as_str() >= operand,
			CompareOp::LessEq => s.as_str() <= operand,
		},
		PropertyValue::Int(i) => operand.trim().parse::<i64>().is_ok_and(|o| ordered(i.cmp(&o), op)),
		PropertyValue::Float(x) => operand
			.trim()
			.parse::<f64>()
			.ok()
			.and_then(|o| x.partial_cmp(&o))
			.is_some_and(|ord| ordered(ord, op)),
		PropertyValue::Bool(b) => match op {
			CompareOp::Equal | CompareOp::Approx => operand.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" }),
			CompareOp::GreaterEq | CompareOp::LessEq => false,
		},
	}
}

fn ordered(ord: Ordering, op: CompareOp) -> bool {
	match op {
		CompareOp::Equal | CompareOp::Approx => ord == Ordering::Equal,
		CompareOp::GreaterEq => ord != Ordering::Less,
		CompareOp::LessEq => ord != Ordering::Greater,
	}
}

/// Equality ignoring case and whitespace.
fn approx_eq(a: &str, b: &str) -> bool {
	let norm = |s: &str| -> String { s.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect() };
	norm(a) == norm(b)
}

fn substring(value: &PropertyValue, initial: Option<&str>, any: &[Box<str>], last: Option<&str>) -> bool {
	match value {
		PropertyValue::List(items) => items.iter().any(|item| substring(item, initial, any, last)),
		PropertyValue::String(s) => substring_str(s, initial, any, last),
		_ => false,
	}
}

fn substring_str(s: &str, initial: Option<&str>, any: &[Box<str>], last: Option<&str>) -> bool {
	let mut rest = s;
	if let Some(initial) = initial {
		match rest.strip_prefix(initial) {
			Some(r) => rest = r,
			None => return false,
		}
	}
	for part in any {
		match rest.find(&**part) {
			Some(idx) => rest = &rest[idx + part.len()..],
			None => return false,
		}
	}
	last.is_none_or(|last| rest.ends_with(last))
}
