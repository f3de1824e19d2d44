//! Deferred execution primitives
//!
//! Contains:
//! - Task runner and clock contracts, with tokio-backed production impls
//! - Cancellable one-shot timers built on the runner
//!
//! Everything that waits in this crate waits here; there are no blocking
//! sleeps anywhere else.

pub mod runner;
pub mod timer;

pub use runner::{Clock, MonotonicClock, Task, TaskRunner, TokioTaskRunner};
pub use timer::CancellableTimer;
