//! Race-safe one-shot timer
//!
//! A [`CancellableTimer`] posts its task on a [`TaskRunner`] and guards it
//! with a shared three-state atomic. Fire and cancel race by claiming the
//! armed state with a compare-exchange; exactly one side wins, and the task
//! closure is dropped unrun on the losing path. Dropping the timer cancels
//! it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::tasks::runner::{Task, TaskRunner};

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// One-shot timer whose task runs at most once
pub struct CancellableTimer {
    state: Arc<AtomicU8>,
}

impl CancellableTimer {
    /// Schedule `task` to run after `delay` on `runner`.
    ///
    /// If the runner refuses the post (shutting down), the timer starts in
    /// the cancelled state and the task never runs.
    pub fn new(runner: &dyn TaskRunner, name: &str, delay: Duration, task: Task) -> Self {
        let state = Arc::new(AtomicU8::new(ARMED));
        let guard = state.clone();
        let posted = runner.post_delayed(
            delay,
            Box::new(move || {
                if guard
                    .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    task();
                }
                // cancel won: the closure drops `task` unrun
            }),
        );
        if !posted {
            state.store(CANCELLED, Ordering::Release);
            warn!(timer = name, "timer: runner refused post, timer starts cancelled");
        }
        Self { state }
    }

    /// Prevent the task from running if it has not fired yet.
    ///
    /// Returns true if the timer was still armed and the task will now never
    /// run; false if the task already ran or the timer was cancelled before.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the timer is still armed (not fired, not cancelled)
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::runner::FakeTaskRunner;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_fires_after_delay() {
        let runner = FakeTaskRunner::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let timer = CancellableTimer::new(
            &runner,
            "fire",
            Duration::from_secs(2),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(timer.is_running());
        runner.fast_forward(Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(timer.is_running());

        runner.fast_forward(Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_cancel_before_fire() {
        let runner = FakeTaskRunner::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let timer = CancellableTimer::new(
            &runner,
            "cancel",
            Duration::from_secs(2),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(timer.cancel());
        assert!(!timer.is_running());

        runner.fast_forward(Duration::from_secs(5));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let runner = FakeTaskRunner::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let timer = CancellableTimer::new(
            &runner,
            "late-cancel",
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        runner.fast_forward(Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert!(!timer.cancel());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_twice_second_is_noop() {
        let runner = FakeTaskRunner::new();
        let timer = CancellableTimer::new(&runner, "twice", Duration::from_secs(1), Box::new(|| {}));
        assert!(timer.cancel());
        assert!(!timer.cancel());
    }

    #[test]
    fn test_drop_cancels() {
        let runner = FakeTaskRunner::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let timer = CancellableTimer::new(
            &runner,
            "drop",
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        drop(timer);

        runner.fast_forward(Duration::from_secs(5));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refused_post_starts_cancelled() {
        let runner = FakeTaskRunner::new();
        runner.shutdown();

        let timer = CancellableTimer::new(
            &runner,
            "refused",
            Duration::from_secs(1),
            Box::new(|| panic!("must not run")),
        );
        assert!(!timer.is_running());
        assert!(!timer.cancel());
    }

    // Races a cancelling thread against the firing runner; every round must
    // end with exactly one of {task ran, cancel won}.
    #[test]
    fn test_exactly_once_under_racing_cancel() {
        for round in 0..200u32 {
            let runner = FakeTaskRunner::new();
            let runs = Arc::new(AtomicU32::new(0));

            let counter = runs.clone();
            let timer = Arc::new(CancellableTimer::new(
                &runner,
                "race",
                Duration::from_millis(1),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ));

            let contender = timer.clone();
            let canceller = std::thread::spawn(move || {
                for _ in 0..(round % 7) {
                    std::thread::yield_now();
                }
                contender.cancel()
            });

            runner.fast_forward(Duration::from_millis(1));
            let cancel_won = canceller.join().unwrap();
            let ran = runs.load(Ordering::SeqCst);

            assert!(ran <= 1);
            assert_eq!(
                cancel_won, ran == 0,
                "round {}: cancel_won={} but task ran {} times",
                round, cancel_won, ran
            );
            assert!(!timer.is_running());
        }
    }
}
