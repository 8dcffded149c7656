//! Execution substrate for the component runtime.
//!
//! Two pieces live here:
//!
//! * [`TaskHandle`]: a single-invocation task. Its body runs at most once no
//!   matter how many threads ask for the result, and a waiter that gives up on
//!   the pool after a short grace period runs the body itself.
//! * [`WorkerPool`]: a fixed set of named worker threads draining a FIFO of
//!   posted tasks.
//!
//! Together they let a caller block on work that may be queued behind the very
//! worker that is blocked waiting for it, without deadlocking.

mod panic;
mod pool;
mod spawn;
mod task;

pub use panic::panic_message;
pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use spawn::spawn_named_thread;
pub use task::{DEFAULT_GRACE_PERIOD, TaskError, TaskHandle};
