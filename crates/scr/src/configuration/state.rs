use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a component configuration.
///
/// ```text
/// DISABLED -> UNSATISFIED_REFERENCE -> SATISFIED -> ACTIVATING -> ACTIVE
///                      ^                                            |
///                      +-------------- DEACTIVATING <---------------+
/// ```
///
/// Disposing an active configuration goes `DEACTIVATING -> DISABLED`; an
/// unsatisfied or satisfied one moves to `DISABLED` directly. Any state may
/// move to `DISPOSED`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
	Disabled,
	UnsatisfiedReference,
	Satisfied,
	Activating,
	Active,
	Deactivating,
	Disposed,
}

impl ComponentState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Disabled => "DISABLED",
			Self::UnsatisfiedReference => "UNSATISFIED_REFERENCE",
			Self::Satisfied => "SATISFIED",
			Self::Activating => "ACTIVATING",
			Self::Active => "ACTIVE",
			Self::Deactivating => "DEACTIVATING",
			Self::Disposed => "DISPOSED",
		}
	}

	pub fn is_active(self) -> bool {
		self == Self::Active
	}

	/// Whether `self -> next` is a legal edge.
	pub fn can_transition(self, next: Self) -> bool {
		use ComponentState::*;
		match (self, next) {
			(Disposed, _) => false,
			(_, Disposed) => true,
			(Disabled, UnsatisfiedReference)
			| (UnsatisfiedReference, Satisfied | Disabled)
			| (Satisfied, Activating | UnsatisfiedReference | Disabled)
			| (Activating, Active | UnsatisfiedReference)
			| (Active, Deactivating)
			| (Deactivating, UnsatisfiedReference | Disabled) => true,
			_ => false,
		}
	}
}

impl fmt::Display for ComponentState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
