//! Payload progress aggregation
//!
//! The transport reports raw per-payload updates on its own threads. A
//! [`PayloadUpdateQueue`] buffers them and pokes the service thread; the
//! session then drains the queue and folds each update through a
//! [`PayloadTracker`], which turns them into at most one
//! [`TransferMetadata`] each: overall progress, transfer speed, estimated
//! time remaining and terminal-state detection. Progress reports are
//! rate-limited so chatty transports do not flood the application layer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::network::connections::{
    Medium, PayloadId, PayloadStatus, PayloadStatusListener, PayloadTransferUpdate,
};
use crate::protocol::types::{AttachmentContainer, TransferMetadata, TransferStatus};
use crate::tasks::runner::{Clock, TaskRunner};

/// Callback posted on the service runner whenever updates are queued
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

/// Speed is re-estimated once per window of this length.
const TRANSFER_SPEED_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
/// ETA is refreshed at most this often (after the first estimate).
const ESTIMATED_TIME_REMAINING_UPDATE_INTERVAL: Duration = Duration::from_secs(3);

struct PayloadState {
    attachment_id: i64,
    total_bytes: u64,
    status: PayloadStatus,
    amount_transferred: u64,
}

/// Folds raw payload updates into aggregated transfer metadata
///
/// Transferred byte counts never decrease; a payload reaching `Success`
/// counts as fully transferred even if the transport never reported its
/// final byte total.
pub struct PayloadTracker {
    clock: Arc<dyn Clock>,
    target_id: i64,
    payload_states: HashMap<PayloadId, PayloadState>,
    total_attachments_count: u32,
    transferred_attachments_count: u32,
    total_transfer_size: u64,
    min_progress_update_interval: Duration,
    last_report_at: Option<Instant>,
    last_report_percent: i32,
    speed_window_start: Option<(Instant, u64)>,
    current_speed: f64,
    rolling_speed_sum: f64,
    rolling_speed_samples: u32,
    eta_updated_at: Option<Instant>,
    estimated_time_remaining: Option<Duration>,
}

impl PayloadTracker {
    /// Register every mapped attachment of `container`; attachments missing
    /// from `payload_map` are logged and skipped
    pub fn new(
        clock: Arc<dyn Clock>,
        target_id: i64,
        container: &AttachmentContainer,
        payload_map: &HashMap<i64, PayloadId>,
        min_progress_update_interval: Duration,
    ) -> Self {
        let mut tracker = Self {
            clock,
            target_id,
            payload_states: HashMap::new(),
            total_attachments_count: 0,
            transferred_attachments_count: 0,
            total_transfer_size: 0,
            min_progress_update_interval,
            last_report_at: None,
            last_report_percent: -1,
            speed_window_start: None,
            current_speed: 0.0,
            rolling_speed_sum: 0.0,
            rolling_speed_samples: 0,
            eta_updated_at: None,
            estimated_time_remaining: None,
        };

        for text in &container.text_attachments {
            tracker.register(text.id, text.size(), payload_map);
        }
        for file in &container.file_attachments {
            tracker.register(file.id, file.size, payload_map);
        }
        for wifi in &container.wifi_credentials_attachments {
            // credentials carry no byte size of their own
            tracker.register(wifi.id, 0, payload_map);
        }
        tracker
    }

    fn register(&mut self, attachment_id: i64, size: u64, payload_map: &HashMap<i64, PayloadId>) {
        match payload_map.get(&attachment_id) {
            Some(&payload_id) => {
                self.payload_states.insert(
                    payload_id,
                    PayloadState {
                        attachment_id,
                        total_bytes: size,
                        status: PayloadStatus::InProgress,
                        amount_transferred: 0,
                    },
                );
                self.total_attachments_count += 1;
                self.total_transfer_size += size;
            }
            None => {
                warn!(
                    attachment_id,
                    target_id = self.target_id,
                    "payload tracker: attachment has no payload, skipping"
                );
            }
        }
    }

    /// Fold one raw update; returns aggregated metadata unless the update
    /// belongs to an unknown payload or falls inside the rate limit
    pub fn consume(&mut self, update: PayloadTransferUpdate) -> Option<TransferMetadata> {
        let state = match self.payload_states.get_mut(&update.payload_id) {
            Some(state) => state,
            None => {
                debug!(
                    payload_id = update.payload_id,
                    "payload tracker: update for unknown payload"
                );
                return None;
            }
        };

        if state.status != update.status {
            debug!(
                payload_id = update.payload_id,
                attachment_id = state.attachment_id,
                status = ?update.status,
                "payload tracker: payload status changed"
            );
            state.status = update.status;
            if update.status == PayloadStatus::Success {
                state.amount_transferred = state.total_bytes;
                self.transferred_attachments_count += 1;
            }
        }
        if update.bytes_transferred > state.amount_transferred {
            state.amount_transferred = update.bytes_transferred;
        }

        self.evaluate(update.status)
    }

    fn evaluate(&mut self, triggering_status: PayloadStatus) -> Option<TransferMetadata> {
        let transferred: u64 = self
            .payload_states
            .values()
            .map(|state| state.amount_transferred)
            .sum();

        if self.is_complete() {
            let mut metadata = TransferMetadata::for_status(TransferStatus::Complete);
            metadata.progress = 100.0;
            metadata.transferred_bytes = self.total_transfer_size;
            metadata.transfer_speed = self.current_speed as u64;
            metadata.total_attachments_count = self.total_attachments_count;
            metadata.transferred_attachments_count = self.transferred_attachments_count;
            return Some(metadata);
        }
        if let Some(status) = self.terminal_failure() {
            let mut metadata = TransferMetadata::for_status(status);
            metadata.progress = self.progress_percent(transferred);
            metadata.transferred_bytes = transferred;
            metadata.total_attachments_count = self.total_attachments_count;
            metadata.transferred_attachments_count = self.transferred_attachments_count;
            return Some(metadata);
        }

        let now = self.clock.now();
        let percent = self.progress_percent(transferred);
        let within_interval = self
            .last_report_at
            .map(|at| now.duration_since(at) < self.min_progress_update_interval)
            .unwrap_or(false);
        if percent as i32 == self.last_report_percent
            && within_interval
            && triggering_status != PayloadStatus::Success
        {
            return None;
        }

        self.update_speed(now, transferred);
        self.update_estimated_time_remaining(now, transferred);
        self.last_report_at = Some(now);
        self.last_report_percent = percent as i32;

        let mut metadata = TransferMetadata::for_status(TransferStatus::InProgress);
        metadata.progress = percent;
        metadata.transferred_bytes = transferred;
        metadata.transfer_speed = self.current_speed as u64;
        metadata.estimated_time_remaining = self.estimated_time_remaining;
        metadata.total_attachments_count = self.total_attachments_count;
        metadata.transferred_attachments_count = self.transferred_attachments_count;
        Some(metadata)
    }

    fn is_complete(&self) -> bool {
        !self.payload_states.is_empty()
            && self
                .payload_states
                .values()
                .all(|state| state.status == PayloadStatus::Success)
    }

    fn terminal_failure(&self) -> Option<TransferStatus> {
        if self
            .payload_states
            .values()
            .any(|state| state.status == PayloadStatus::Canceled)
        {
            return Some(TransferStatus::Cancelled);
        }
        if self
            .payload_states
            .values()
            .any(|state| state.status == PayloadStatus::Failure)
        {
            return Some(TransferStatus::Failed);
        }
        None
    }

    fn progress_percent(&self, transferred: u64) -> f32 {
        if self.total_transfer_size == 0 {
            return 0.0;
        }
        (transferred as f64 * 100.0 / self.total_transfer_size as f64) as f32
    }

    fn update_speed(&mut self, now: Instant, transferred: u64) {
        match self.speed_window_start {
            None => {
                self.speed_window_start = Some((now, transferred));
            }
            Some((start, start_bytes))
                if now.duration_since(start) >= TRANSFER_SPEED_UPDATE_INTERVAL =>
            {
                let elapsed = now.duration_since(start).as_secs_f64();
                let speed = transferred.saturating_sub(start_bytes) as f64 / elapsed;
                self.current_speed = speed;
                self.rolling_speed_sum += speed;
                self.rolling_speed_samples += 1;
                self.speed_window_start = Some((now, transferred));
            }
            _ => {}
        }
    }

    fn update_estimated_time_remaining(&mut self, now: Instant, transferred: u64) {
        if self.rolling_speed_samples == 0 {
            return;
        }
        let due = match self.eta_updated_at {
            // first estimate as soon as the first speed window closes
            None => true,
            Some(at) => now.duration_since(at) >= ESTIMATED_TIME_REMAINING_UPDATE_INTERVAL,
        };
        if !due {
            return;
        }
        let average = self.rolling_speed_sum / self.rolling_speed_samples as f64;
        if average <= 0.0 {
            return;
        }
        let remaining = self.total_transfer_size.saturating_sub(transferred);
        self.estimated_time_remaining =
            Some(Duration::from_secs_f64(remaining as f64 / average));
        self.eta_updated_at = Some(now);
    }
}

/// Thread-safe mailbox between transport callbacks and the service thread
///
/// Pushes arrive on transport threads; each push posts the wake callback on
/// the service runner. The session drains the queue from the service
/// thread.
pub struct PayloadUpdateQueue {
    pending: VecDeque<PayloadTransferUpdate>,
    runner: Arc<dyn TaskRunner>,
    wake: WakeCallback,
}

impl PayloadUpdateQueue {
    pub fn new(runner: Arc<dyn TaskRunner>, wake: WakeCallback) -> Self {
        Self { pending: VecDeque::new(), runner, wake }
    }

    /// Take everything queued so far, in arrival order
    pub fn drain(&mut self) -> Vec<PayloadTransferUpdate> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl PayloadStatusListener for PayloadUpdateQueue {
    fn on_status_update(
        &mut self,
        update: PayloadTransferUpdate,
        upgraded_medium: Option<Medium>,
    ) {
        if let Some(medium) = upgraded_medium {
            debug!(payload_id = update.payload_id, medium = ?medium, "payload update on upgraded medium");
        }
        self.pending.push_back(update);
        let wake = self.wake.clone();
        self.runner.post(Box::new(move || wake()));
    }
}
