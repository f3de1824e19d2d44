//! Deterministic clock and task runner for tests
//!
//! [`FakeClock`] is a manually advanced monotonic clock. [`FakeTaskRunner`]
//! holds posted tasks in a virtual-time queue; [`fast_forward`]
//! (FakeTaskRunner::fast_forward) advances virtual time and runs everything
//! that falls due, including tasks posted by the tasks it runs.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::tasks::runner::{Clock, Task, TaskRunner};

/// Manually advanced clock
pub struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }

    /// Move the clock forward
    pub fn advance(&self, delta: Duration) {
        *self.offset.lock().unwrap() += delta;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

struct Scheduled {
    due: Duration,
    seq: u64,
    task: Task,
}

struct RunnerState {
    now: Duration,
    next_seq: u64,
    queue: Vec<Scheduled>,
    shutdown: bool,
}

/// Task runner with virtual time
///
/// Tasks run on the thread calling [`fast_forward`]
/// (FakeTaskRunner::fast_forward), in due-time order with FIFO ordering for
/// equal due times. Tasks always run outside the internal lock, so a running
/// task may post further tasks.
pub struct FakeTaskRunner {
    state: Mutex<RunnerState>,
}

impl FakeTaskRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunnerState {
                now: Duration::ZERO,
                next_seq: 0,
                queue: Vec::new(),
                shutdown: false,
            }),
        }
    }

    /// Refuse all future posts
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
    }

    /// Number of tasks not yet due
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Advance virtual time by `delta`, running every task that falls due
    pub fn fast_forward(&self, delta: Duration) {
        let target = {
            let state = self.state.lock().unwrap();
            state.now + delta
        };
        loop {
            let task = {
                let mut state = self.state.lock().unwrap();
                let next = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.due <= target)
                    .min_by_key(|(_, s)| (s.due, s.seq))
                    .map(|(i, _)| i);
                match next {
                    Some(index) => {
                        let scheduled = state.queue.remove(index);
                        state.now = state.now.max(scheduled.due);
                        Some(scheduled.task)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Run tasks already due without advancing time
    pub fn run_pending(&self) {
        self.fast_forward(Duration::ZERO);
    }
}

impl Default for FakeTaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner for FakeTaskRunner {
    fn post_delayed(&self, delay: Duration, task: Task) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            return false;
        }
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Scheduled { due, seq, task });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fake_clock_advances() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now() - start, Duration::from_secs(10));
    }

    #[test]
    fn test_tasks_run_in_due_order() {
        let runner = FakeTaskRunner::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(3u64, "c"), (1, "a"), (2, "b")] {
            let order = order.clone();
            runner.post_delayed(
                Duration::from_secs(delay),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        runner.fast_forward(Duration::from_secs(3));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_equal_due_times_run_fifo() {
        let runner = FakeTaskRunner::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = order.clone();
            runner.post_delayed(
                Duration::from_secs(1),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        runner.fast_forward(Duration::from_secs(1));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_not_due_tasks_stay_queued() {
        let runner = FakeTaskRunner::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        runner.post_delayed(
            Duration::from_secs(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        runner.fast_forward(Duration::from_secs(9));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(runner.pending_count(), 1);

        runner.fast_forward(Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.pending_count(), 0);
    }

    #[test]
    fn test_task_may_post_more_tasks() {
        let runner = Arc::new(FakeTaskRunner::new());
        let runs = Arc::new(AtomicU32::new(0));

        let inner_runner = runner.clone();
        let counter = runs.clone();
        runner.post_delayed(
            Duration::from_secs(1),
            Box::new(move || {
                let counter = counter.clone();
                inner_runner.post(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }),
        );

        // the chained zero-delay task runs in the same fast_forward
        runner.fast_forward(Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_refuses_posts() {
        let runner = FakeTaskRunner::new();
        runner.shutdown();
        assert!(!runner.post(Box::new(|| {})));
        assert_eq!(runner.pending_count(), 0);
    }

    #[test]
    fn test_run_pending_only_runs_due_tasks() {
        let runner = FakeTaskRunner::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        runner.post(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = runs.clone();
        runner.post_delayed(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        runner.run_pending();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.pending_count(), 1);
    }
}
