//! LDAP-style service filters (RFC 1960 subset).
//!
//! ```text
//! (&(objectclass=Greeter)(|(lang=en)(lang~=EN-gb))(!(service.ranking<=0)))
//! ```
//!
//! Supported: `&`, `|`, `!`, `=`, `~=`, `>=`, `<=`, presence (`attr=*`),
//! substrings (`attr=a*b*c`) and backslash escapes for `(`, `)`, `*` and `\`.
//! Attribute names are matched case-insensitively.

use std::fmt;
use std::str::FromStr;

use crate::keys;

mod eval;
mod parse;
#[cfg(test)]
mod tests;

/// Filter syntax error. Positions are byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
	#[error("filter ended unexpectedly")]
	UnexpectedEnd,
	#[error("unexpected {found:?} at position {pos}")]
	Unexpected { pos: usize, found: char },
	#[error("empty attribute name at position {pos}")]
	EmptyAttribute { pos: usize },
	#[error("trailing input at position {pos}")]
	TrailingInput { pos: usize },
}

/// Comparison operator of a simple item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
	Equal,
	Approx,
	GreaterEq,
	LessEq,
}

impl CompareOp {
	fn as_str(self) -> &'static str {
		match self {
			Self::Equal => "=",
			Self::Approx => "~=",
			Self::GreaterEq => ">=",
			Self::LessEq => "<=",
		}
	}
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
	And(Vec<Filter>),
	Or(Vec<Filter>),
	Not(Box<Filter>),
	Compare {
		attr: Box<str>,
		op: CompareOp,
		value: Box<str>,
	},
	Present(Box<str>),
	Substring {
		attr: Box<str>,
		initial: Option<Box<str>>,
		any: Vec<Box<str>>,
		last: Option<Box<str>>,
	},
}

impl Filter {
	/// Parses filter text.
	pub fn parse(src: &str) -> Result<Self, FilterError> {
		parse::Parser::new(src).parse_root()
	}

	/// `(objectclass=<interface>)`, AND-ed with `target` when one is given.
	pub fn for_interface(interface: &str, target: Option<&str>) -> Result<Self, FilterError> {
		let base = Self::Compare {
			attr: keys::OBJECTCLASS.into(),
			op: CompareOp::Equal,
			value: interface.into(),
		};
		match target.map(str::trim).filter(|t| !t.is_empty()) {
			Some(target) => Ok(Self::And(vec![base, Self::parse(target)?])),
			None => Ok(base),
		}
	}
}

impl FromStr for Filter {
	type Err = FilterError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
	for ch in value.chars() {
		if matches!(ch, '(' | ')' | '*' | '\\') {
			f.write_str("\\")?;
		}
		write!(f, "{ch}")?;
	}
	Ok(())
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::And(items) | Self::Or(items) => {
				f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
				for item in items {
					write!(f, "{item}")?;
				}
				f.write_str(")")
			}
			Self::Not(inner) => write!(f, "(!{inner})"),
			Self::Compare { attr, op, value } => {
				write!(f, "({attr}{}", op.as_str())?;
				write_escaped(f, value)?;
				f.write_str(")")
			}
			Self::Present(attr) => write!(f, "({attr}=*)"),
			Self::Substring { attr, initial, any, last } => {
				write!(f, "({attr}=")?;
				if let Some(initial) = initial {
					write_escaped(f, initial)?;
				}
				f.write_str("*")?;
				for part in any {
					write_escaped(f, part)?;
					f.write_str("*")?;
				}
				if let Some(last) = last {
					write_escaped(f, last)?;
				}
				f.write_str(")")
			}
		}
	}
}
