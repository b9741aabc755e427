//! Task scheduling for storage operations.
//!
//! # Responsibility
//! - Turn each unit of storage work into a [`TaskFuture`].
//! - Serialize writes on one writer thread; fan reads out over a worker pool.
//!
//! # Invariants
//! - Writes run one at a time in submission order.
//! - Liveness and cancellation are checked when a task starts, never mid-run.
//! - Internal work never waits on another in-flight task.

mod future;
mod scheduler;

pub use future::{CancelHandle, TaskFuture};
pub use scheduler::{TaskKind, TaskScheduler};
