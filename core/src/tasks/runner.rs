//! Deferred task execution
//!
//! Everything in this crate that waits does so by posting a task on a
//! [`TaskRunner`]; there are no blocking waits. The production runner
//! schedules onto a tokio runtime; tests use the deterministic runner from
//! `testing`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

/// A task posted on a runner
pub type Task = Box<dyn FnOnce() + Send>;

/// Schedules zero-argument tasks for later execution
pub trait TaskRunner: Send + Sync {
    /// Run `task` after `delay`. Returns false if the runner is shutting
    /// down and the task will never run; the task is dropped in that case.
    fn post_delayed(&self, delay: Duration, task: Task) -> bool;

    /// Run `task` as soon as the runner gets to it
    fn post(&self, task: Task) -> bool {
        self.post_delayed(Duration::ZERO, task)
    }
}

/// Monotonic time source, swappable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Runner that schedules onto a tokio runtime
///
/// Tasks posted after [`shutdown`](TokioTaskRunner::shutdown) are refused;
/// tasks already sleeping when shutdown happens are dropped at their
/// deadline instead of running.
pub struct TokioTaskRunner {
    handle: tokio::runtime::Handle,
    shutdown: Arc<AtomicBool>,
}

impl TokioTaskRunner {
    /// Runner for the current runtime; call from within a tokio context
    pub fn new() -> Self {
        Self::with_handle(tokio::runtime::Handle::current())
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// Stop accepting tasks and drop pending ones at their deadline
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        debug!("task runner: shutdown requested");
    }
}

impl TaskRunner for TokioTaskRunner {
    fn post_delayed(&self, delay: Duration, task: Task) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let shutdown = self.shutdown.clone();
        self.handle.spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            if !shutdown.load(Ordering::Acquire) {
                task();
            }
        });
        true
    }
}
