//! Runtime configuration.
//!
//! ```toml
//! worker_threads = 4
//! grace_period_ms = 20
//! thread_name = "scr"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_worker::PoolConfig;

use crate::Result;

/// Tunables for a [`crate::Framework`]. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	/// Worker threads executing component transitions. Zero runs them on the
	/// calling thread.
	pub worker_threads: usize,
	/// How long a waiter gives the pool before running a transition itself.
	pub grace_period_ms: u64,
	/// Worker thread name prefix.
	pub thread_name: String,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			worker_threads: 2,
			grace_period_ms: 50,
			thread_name: "trellis-worker".to_string(),
		}
	}
}

impl RuntimeConfig {
	pub fn from_toml_str(src: &str) -> Result<Self> {
		Ok(toml::from_str(src)?)
	}

	pub fn grace_period(&self) -> Duration {
		Duration::from_millis(self.grace_period_ms)
	}

	pub fn pool_config(&self) -> PoolConfig {
		PoolConfig {
			threads: self.worker_threads,
			grace_period: self.grace_period(),
			thread_name: self.thread_name.clone(),
		}
	}
}
