//! Medium-upgrade gate for outgoing sends
//!
//! Large payloads should not saturate a low-quality medium while the
//! transport negotiates an upgrade. A [`TransferManager`] exists per
//! connection that was opened with a high-quality transport request; it is
//! born waiting, queues send tasks in FIFO order, and flushes them when a
//! high-quality medium is confirmed or the upgrade timeout elapses.
//!
//! `send` and `on_medium_quality_changed` may be called from different
//! threads; all state lives behind one mutex and flushed tasks always run
//! outside it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::network::connections::Medium;
use crate::tasks::runner::{Task, TaskRunner};
use crate::tasks::timer::CancellableTimer;

struct GateState {
    waiting_for_upgrade: bool,
    deferred: VecDeque<Task>,
    timeout_timer: Option<CancellableTimer>,
}

/// Per-connection send gate, created when an upgrade-pending connection is
/// initiated
pub struct TransferManager {
    endpoint_id: String,
    medium_upgrade_timeout: Duration,
    runner: Arc<dyn TaskRunner>,
    state: Arc<Mutex<GateState>>,
}

impl TransferManager {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        endpoint_id: impl Into<String>,
        medium_upgrade_timeout: Duration,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            medium_upgrade_timeout,
            runner,
            state: Arc::new(Mutex::new(GateState {
                waiting_for_upgrade: true,
                deferred: VecDeque::new(),
                timeout_timer: None,
            })),
        }
    }

    /// Arm the upgrade timeout. Returns false when not waiting for an
    /// upgrade anymore or when the timeout is already armed.
    pub fn start_transfer(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.waiting_for_upgrade {
            debug!(
                endpoint_id = %self.endpoint_id,
                "transfer manager: not waiting for upgrade, nothing to start"
            );
            return false;
        }
        if state
            .timeout_timer
            .as_ref()
            .map(|timer| timer.is_running())
            .unwrap_or(false)
        {
            return false;
        }

        let shared = self.state.clone();
        let endpoint_id = self.endpoint_id.clone();
        state.timeout_timer = Some(CancellableTimer::new(
            &*self.runner,
            "medium_upgrade_timeout",
            self.medium_upgrade_timeout,
            Box::new(move || {
                let tasks = {
                    let mut state = shared.lock().unwrap();
                    if !state.waiting_for_upgrade {
                        return;
                    }
                    state.waiting_for_upgrade = false;
                    std::mem::take(&mut state.deferred)
                };
                info!(
                    endpoint_id = %endpoint_id,
                    count = tasks.len(),
                    "transfer manager: upgrade timed out, flushing deferred sends"
                );
                for task in tasks {
                    task();
                }
            }),
        ));
        true
    }

    /// Run `task` now, or queue it until the medium upgrade resolves
    pub fn send(&self, task: Task) {
        let immediate = {
            let mut state = self.state.lock().unwrap();
            if state.waiting_for_upgrade {
                state.deferred.push_back(task);
                debug!(
                    endpoint_id = %self.endpoint_id,
                    queued = state.deferred.len(),
                    "transfer manager: deferring send until medium upgrade"
                );
                None
            } else {
                Some(task)
            }
        };
        if let Some(task) = immediate {
            task();
        }
    }

    /// Transport reported a medium change; a high-quality medium releases
    /// the gate and flushes the queue in enqueue order
    pub fn on_medium_quality_changed(&self, medium: Medium) {
        if !medium.is_high_quality() {
            return;
        }
        let tasks = {
            let mut state = self.state.lock().unwrap();
            if !state.waiting_for_upgrade {
                return;
            }
            state.waiting_for_upgrade = false;
            if let Some(timer) = state.timeout_timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut state.deferred)
        };
        info!(
            endpoint_id = %self.endpoint_id,
            medium = ?medium,
            count = tasks.len(),
            "transfer manager: high quality medium confirmed, flushing deferred sends"
        );
        for task in tasks {
            task();
        }
    }

    /// Disarm the upgrade timeout; queued tasks are left untouched, session
    /// teardown decides their fate
    pub fn cancel_transfer(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(timer) = state.timeout_timer.take() {
            timer.cancel();
        }
        debug!(endpoint_id = %self.endpoint_id, "transfer manager: transfer cancelled");
    }

    pub fn is_waiting_for_upgrade(&self) -> bool {
        self.state.lock().unwrap().waiting_for_upgrade
    }
}
