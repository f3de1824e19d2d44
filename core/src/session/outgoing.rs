//! Per-target outgoing transfer state machine
//!
//! An [`OutgoingShareSession`] walks one share target through the send
//! protocol: attachments are staged and turned into transport payloads, a
//! connection is opened with a transport type matched to the attachment
//! size, an introduction frame announces the payloads, and once both sides
//! accept the payloads stream out in declaration order while a
//! [`PayloadTracker`] folds raw transport updates into progress reports.
//!
//! Completion is deliberately anticlimactic: when the last payload
//! succeeds the session holds the `Complete` report back and waits for the
//! receiver to disconnect first, so the peer never observes a vanished
//! sender mid-acknowledgement. A disconnect-delay timer bounds that wait.
//!
//! All methods must be called from the service thread. The only state
//! shared with other threads is the pending-completion cell (raced by the
//! disconnect-delay timer) and the payload update queue (fed by transport
//! callbacks).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::network::connections::{
    ConnectCallback, Connection, ConnectionStatus, ConnectionsManager, Payload, PayloadId,
    SharedPayloadListener,
};
use crate::network::frames::{
    ConnectionResponseFrame, FileMetadata, Frame, IntroductionFrame, ResponseStatus, TextMetadata,
    WifiCredentials, WifiCredentialsMetadata,
};
use crate::protocol::config::ShareConfig;
use crate::protocol::error::SessionError;
use crate::protocol::events::TransferUpdateCallback;
use crate::protocol::types::{
    random_id, token_to_four_digit_string, AttachmentContainer, DataUsage, DecryptedCertificate,
    FileInfo, KeyVerificationResult, OsType, ShareTarget, TransferMetadata, TransferStatus,
    TransportType,
};
use crate::session::tracker::{PayloadTracker, PayloadUpdateQueue, WakeCallback};
use crate::tasks::runner::{Clock, Task, TaskRunner};
use crate::tasks::timer::CancellableTimer;

/// State machine for sending attachments to one share target
pub struct OutgoingShareSession {
    clock: Arc<dyn Clock>,
    runner: Arc<dyn TaskRunner>,
    connections_manager: Arc<dyn ConnectionsManager>,
    config: Arc<ShareConfig>,
    transfer_update_callback: TransferUpdateCallback,

    endpoint_id: String,
    share_target: ShareTarget,
    certificate: Option<DecryptedCertificate>,
    os_type: OsType,

    session_id: Option<i64>,
    container: AttachmentContainer,
    text_payloads: Vec<Payload>,
    file_payloads: Vec<Payload>,
    wifi_credentials_payloads: Vec<Payload>,
    attachment_payload_map: HashMap<i64, PayloadId>,
    next_payload_index: usize,

    connection: Option<Arc<dyn Connection>>,
    connect_started_at: Option<Instant>,
    token: Option<String>,
    disconnect_status: Option<TransferStatus>,
    delivered_final_status: bool,
    ready_for_accept: bool,
    payloads_cancelled: bool,

    mutual_acceptance_timer: Option<CancellableTimer>,
    disconnect_timer: Option<CancellableTimer>,
    /// Completion report held back until the peer disconnects; raced by the
    /// disconnect-delay timer, first taker wins
    pending_complete: Arc<Mutex<Option<TransferMetadata>>>,

    payload_tracker: Option<PayloadTracker>,
    payload_updates: Option<Arc<Mutex<PayloadUpdateQueue>>>,
}

impl OutgoingShareSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        runner: Arc<dyn TaskRunner>,
        connections_manager: Arc<dyn ConnectionsManager>,
        config: Arc<ShareConfig>,
        endpoint_id: impl Into<String>,
        share_target: ShareTarget,
        certificate: Option<DecryptedCertificate>,
        transfer_update_callback: TransferUpdateCallback,
    ) -> Self {
        Self {
            clock,
            runner,
            connections_manager,
            config,
            transfer_update_callback,
            endpoint_id: endpoint_id.into(),
            share_target,
            certificate,
            os_type: OsType::Unknown,
            session_id: None,
            container: AttachmentContainer::default(),
            text_payloads: Vec::new(),
            file_payloads: Vec::new(),
            wifi_credentials_payloads: Vec::new(),
            attachment_payload_map: HashMap::new(),
            next_payload_index: 0,
            connection: None,
            connect_started_at: None,
            token: None,
            disconnect_status: None,
            delivered_final_status: false,
            ready_for_accept: false,
            payloads_cancelled: false,
            mutual_acceptance_timer: None,
            disconnect_timer: None,
            pending_complete: Arc::new(Mutex::new(None)),
            payload_tracker: None,
            payload_updates: None,
        }
    }

    pub fn share_target(&self) -> &ShareTarget {
        &self.share_target
    }

    pub fn target_id(&self) -> i64 {
        self.share_target.id
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn certificate(&self) -> Option<&DecryptedCertificate> {
        self.certificate.as_ref()
    }

    pub fn os_type(&self) -> OsType {
        self.os_type
    }

    /// Four-digit confirmation token; `None` before connecting and after
    /// the peer was verified
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Assigned when attachments are staged
    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn attachment_container(&self) -> &AttachmentContainer {
        &self.container
    }

    pub fn attachment_payload_map(&self) -> &HashMap<i64, PayloadId> {
        &self.attachment_payload_map
    }

    /// Stage attachments for sending and assign a session id.
    ///
    /// A session sends at most once; staging again is rejected.
    pub fn initiate_send_attachments(
        &mut self,
        container: AttachmentContainer,
    ) -> Result<(), SessionError> {
        if self.session_id.is_some() {
            warn!(
                target_id = self.share_target.id,
                "attachments already staged for this session"
            );
            return Err(SessionError::AlreadyInitiated);
        }
        let session_id = random_id();
        info!(
            session_id,
            target_id = self.share_target.id,
            attachments = container.attachment_count(),
            "initiating send"
        );
        self.session_id = Some(session_id);
        self.container = container;
        Ok(())
    }

    /// Turn staged text attachments into byte payloads
    pub fn create_text_payloads(&mut self) {
        for attachment in &self.container.text_attachments {
            self.attachment_payload_map.remove(&attachment.id);
        }
        self.text_payloads.clear();
        for attachment in &self.container.text_attachments {
            let payload = Payload::from_bytes(attachment.body.clone().into_bytes());
            self.attachment_payload_map.insert(attachment.id, payload.id);
            self.text_payloads.push(payload);
        }
    }

    /// Turn staged file attachments into file payloads.
    ///
    /// `file_infos` must carry one resolved entry per file attachment, in
    /// attachment order; each attachment's size and path are back-filled
    /// from its entry.
    pub fn create_file_payloads(&mut self, file_infos: Vec<FileInfo>) -> Result<(), SessionError> {
        if file_infos.len() != self.container.file_attachments.len() {
            warn!(
                target_id = self.share_target.id,
                files = self.container.file_attachments.len(),
                infos = file_infos.len(),
                "file info count does not match file attachments"
            );
            return Err(SessionError::FileInfoMismatch);
        }
        for attachment in &self.container.file_attachments {
            self.attachment_payload_map.remove(&attachment.id);
        }
        self.file_payloads.clear();
        for (attachment, info) in self.container.file_attachments.iter_mut().zip(file_infos) {
            attachment.size = info.size;
            attachment.file_path = Some(info.file_path.clone());
            let payload =
                Payload::from_file(info.file_path, info.size, attachment.parent_folder.clone());
            self.attachment_payload_map.insert(attachment.id, payload.id);
            self.file_payloads.push(payload);
        }
        Ok(())
    }

    /// Turn staged Wi-Fi credentials into byte payloads carrying the
    /// serialized secret
    pub fn create_wifi_credentials_payloads(&mut self) {
        for attachment in &self.container.wifi_credentials_attachments {
            self.attachment_payload_map.remove(&attachment.id);
        }
        self.wifi_credentials_payloads.clear();
        for attachment in &self.container.wifi_credentials_attachments {
            let credentials = WifiCredentials {
                password: attachment.password.clone(),
                hidden_ssid: attachment.is_hidden,
            };
            let payload = Payload::from_bytes(credentials.to_bytes());
            self.attachment_payload_map.insert(attachment.id, payload.id);
            self.wifi_credentials_payloads.push(payload);
        }
    }

    /// Open a connection to the target.
    ///
    /// The transport type is chosen from the staged attachment size;
    /// `callback` fires once on the service thread and should be routed to
    /// [`on_connect_result`](Self::on_connect_result).
    pub fn connect(
        &mut self,
        endpoint_info: Vec<u8>,
        bluetooth_mac_address: Option<Vec<u8>>,
        data_usage: DataUsage,
        disable_wifi_hotspot: bool,
        callback: ConnectCallback,
    ) {
        self.connect_started_at = Some(self.clock.now());
        let transport_type = self.select_transport_type(disable_wifi_hotspot);
        info!(
            endpoint_id = %self.endpoint_id,
            target_id = self.share_target.id,
            endpoint_info = %hex::encode(&endpoint_info),
            transport_type = ?transport_type,
            total_bytes = self.container.total_size(),
            "connecting to share target"
        );
        self.connections_manager.connect(
            endpoint_info,
            &self.endpoint_id,
            bluetooth_mac_address,
            data_usage,
            transport_type,
            callback,
        );
    }

    fn select_transport_type(&self, disable_wifi_hotspot: bool) -> TransportType {
        if self.container.total_size() > self.config.high_quality_medium_threshold_bytes {
            if disable_wifi_hotspot {
                return TransportType::HighQualityNonDisruptive;
            }
            return TransportType::HighQuality;
        }
        if !self.container.has_files() {
            return TransportType::NonDisruptive;
        }
        TransportType::Any
    }

    /// Resolve a connection attempt.
    ///
    /// A missing connection aborts the session with `TimedOut` or `Failed`
    /// and returns false. On success the connection is stored, an
    /// unexpected later disconnect is pre-armed to surface as `Failed`, and
    /// the negotiated token is captured for display.
    pub fn on_connect_result(
        &mut self,
        connection: Option<Arc<dyn Connection>>,
        status: ConnectionStatus,
    ) -> bool {
        let connection = match connection {
            Some(connection) => connection,
            None => {
                let terminal = if status == ConnectionStatus::Timeout {
                    TransferStatus::TimedOut
                } else {
                    TransferStatus::Failed
                };
                warn!(
                    endpoint_id = %self.endpoint_id,
                    target_id = self.share_target.id,
                    status = ?status,
                    "connection attempt failed"
                );
                self.set_disconnect_status(terminal);
                self.abort(terminal);
                return false;
            }
        };

        self.set_disconnect_status(TransferStatus::Failed);
        self.connection = Some(connection);
        if let Some(raw) = self.connections_manager.raw_authentication_token(&self.endpoint_id) {
            debug!(token = %hex::encode(&raw), "authentication token captured");
            self.token = Some(token_to_four_digit_string(&raw));
        }
        let elapsed_ms = self
            .connect_started_at
            .map(|started| self.clock.now().duration_since(started).as_millis() as u64)
            .unwrap_or(0);
        info!(
            endpoint_id = %self.endpoint_id,
            target_id = self.share_target.id,
            elapsed_ms,
            "connection established"
        );
        true
    }

    /// Record the key verification outcome and the remote OS.
    ///
    /// Returns false when verification failed and the caller should abort
    /// (typically with `DeviceAuthenticationFailed`). A verified peer stops
    /// displaying the token; an unverifiable one loses self-share trust and
    /// falls back to manual confirmation.
    pub fn process_key_verification_result(
        &mut self,
        result: KeyVerificationResult,
        os_type: OsType,
    ) -> bool {
        self.os_type = os_type;
        match result {
            KeyVerificationResult::Fail | KeyVerificationResult::Unknown => {
                warn!(
                    endpoint_id = %self.endpoint_id,
                    target_id = self.share_target.id,
                    result = ?result,
                    "key verification failed"
                );
                false
            }
            KeyVerificationResult::Success => {
                info!(
                    endpoint_id = %self.endpoint_id,
                    target_id = self.share_target.id,
                    os_type = ?os_type,
                    "key verification succeeded"
                );
                self.token = None;
                true
            }
            KeyVerificationResult::Unable => {
                info!(
                    endpoint_id = %self.endpoint_id,
                    target_id = self.share_target.id,
                    os_type = ?os_type,
                    "key verification unable, requiring manual confirmation"
                );
                self.share_target.for_self_share = false;
                true
            }
        }
    }

    /// Announce the staged attachments to the peer.
    ///
    /// Writes the introduction frame listing every payload in declaration
    /// order (texts, files, Wi-Fi credentials), marks the session ready for
    /// accept, and arms the mutual-acceptance timer that runs
    /// `accept_timeout_task` if neither side accepts in time.
    pub fn send_introduction(&mut self, accept_timeout_task: Task) -> Result<(), SessionError> {
        let connection = match &self.connection {
            Some(connection) => connection,
            None => return Err(SessionError::NotConnected),
        };
        if !self.container.has_attachments() {
            return Err(SessionError::NoAttachments);
        }
        if self.text_payloads.len() != self.container.text_attachments.len()
            || self.file_payloads.len() != self.container.file_attachments.len()
            || self.wifi_credentials_payloads.len()
                != self.container.wifi_credentials_attachments.len()
        {
            return Err(SessionError::PayloadsNotCreated);
        }

        let mut frame = IntroductionFrame { start_transfer: true, ..Default::default() };
        for (attachment, payload) in self.container.text_attachments.iter().zip(&self.text_payloads)
        {
            frame.text_metadata.push(TextMetadata {
                id: attachment.id,
                title: attachment.title.clone(),
                kind: attachment.kind,
                size: attachment.size(),
                payload_id: payload.id,
            });
        }
        for (attachment, payload) in self.container.file_attachments.iter().zip(&self.file_payloads)
        {
            frame.file_metadata.push(FileMetadata {
                id: attachment.id,
                name: attachment.file_name.clone(),
                mime_type: attachment.mime_type.clone(),
                size: attachment.size,
                payload_id: payload.id,
            });
        }
        for (attachment, payload) in self
            .container
            .wifi_credentials_attachments
            .iter()
            .zip(&self.wifi_credentials_payloads)
        {
            frame.wifi_credentials_metadata.push(WifiCredentialsMetadata {
                id: attachment.id,
                ssid: attachment.ssid.clone(),
                security_type: attachment.security_type,
                payload_id: payload.id,
            });
        }

        info!(
            endpoint_id = %self.endpoint_id,
            target_id = self.share_target.id,
            texts = frame.text_metadata.len(),
            files = frame.file_metadata.len(),
            wifi_credentials = frame.wifi_credentials_metadata.len(),
            "sending introduction"
        );
        connection.write(Frame::Introduction(frame).encode());
        self.ready_for_accept = true;
        self.mutual_acceptance_timer = Some(CancellableTimer::new(
            &*self.runner,
            "mutual_acceptance_timeout",
            Duration::from_secs(self.config.mutual_acceptance_timeout_secs),
            accept_timeout_task,
        ));
        Ok(())
    }

    /// Accept the transfer locally.
    ///
    /// Reports `AwaitingRemoteAcceptance` (carrying the token for display)
    /// and registers a one-shot read for the peer's connection response;
    /// `response_callback` gets `None` if the read fails or delivers a
    /// different frame.
    pub fn accept_transfer(
        &mut self,
        response_callback: Box<dyn FnOnce(Option<ConnectionResponseFrame>) + Send>,
    ) -> Result<(), SessionError> {
        let connection = match &self.connection {
            Some(connection) => connection.clone(),
            None => return Err(SessionError::NotConnected),
        };
        if !self.ready_for_accept {
            return Err(SessionError::IntroductionNotSent);
        }
        self.ready_for_accept = false;
        self.update_transfer_metadata(&TransferMetadata::for_status(
            TransferStatus::AwaitingRemoteAcceptance,
        ));
        connection.read_frame(Box::new(move |frame| {
            let response = match frame {
                Some(Frame::ConnectionResponse(response)) => Some(response),
                _ => None,
            };
            response_callback(response);
        }));
        Ok(())
    }

    /// Map the peer's connection response to the next step.
    ///
    /// `None` means the caller proceeds to send payloads (the peer
    /// accepted, `InProgress` has been reported); otherwise the returned
    /// terminal status is the caller's to deliver.
    pub fn handle_connection_response(
        &mut self,
        response: Option<ConnectionResponseFrame>,
    ) -> Option<TransferStatus> {
        if let Some(timer) = self.mutual_acceptance_timer.take() {
            timer.cancel();
        }
        let response = match response {
            Some(response) => response,
            None => {
                warn!(
                    endpoint_id = %self.endpoint_id,
                    "no connection response from the remote device"
                );
                return Some(TransferStatus::Failed);
            }
        };
        match response.status {
            ResponseStatus::Accept => {
                info!(
                    endpoint_id = %self.endpoint_id,
                    target_id = self.share_target.id,
                    "remote device accepted the transfer"
                );
                self.update_transfer_metadata(&TransferMetadata::for_status(
                    TransferStatus::InProgress,
                ));
                None
            }
            ResponseStatus::Reject => Some(TransferStatus::Rejected),
            ResponseStatus::NotEnoughSpace => Some(TransferStatus::NotEnoughSpace),
            ResponseStatus::UnsupportedAttachmentType => {
                Some(TransferStatus::UnsupportedAttachmentType)
            }
            ResponseStatus::TimedOut => Some(TransferStatus::TimedOut),
            ResponseStatus::Unknown => Some(TransferStatus::Failed),
        }
    }

    /// Start streaming payloads to the peer.
    ///
    /// `frame_read_callback` watches for frames arriving mid-transfer
    /// (cancellation); `payload_updates_callback` is posted on the service
    /// runner whenever raw updates are queued and should drain them via
    /// [`process_payload_transfer_updates`](Self::process_payload_transfer_updates).
    /// With the cancellation optimization only one payload is in flight at
    /// a time and completion signals pull the next via
    /// [`send_next_payload`](Self::send_next_payload).
    pub fn send_payloads(
        &mut self,
        enable_transfer_cancellation_optimization: bool,
        frame_read_callback: Box<dyn FnOnce(Option<Frame>) + Send>,
        payload_updates_callback: WakeCallback,
    ) -> Result<(), SessionError> {
        let connection = match &self.connection {
            Some(connection) => connection,
            None => return Err(SessionError::NotConnected),
        };
        connection.read_frame(frame_read_callback);

        self.payload_tracker = Some(PayloadTracker::new(
            self.clock.clone(),
            self.share_target.id,
            &self.container,
            &self.attachment_payload_map,
            Duration::from_millis(self.config.min_progress_update_interval_ms),
        ));
        self.payload_updates = Some(Arc::new(Mutex::new(PayloadUpdateQueue::new(
            self.runner.clone(),
            payload_updates_callback,
        ))));
        self.next_payload_index = 0;

        info!(
            endpoint_id = %self.endpoint_id,
            target_id = self.share_target.id,
            attachments = self.container.attachment_count(),
            total_bytes = self.container.total_size(),
            one_at_a_time = enable_transfer_cancellation_optimization,
            "sending attachments"
        );
        if enable_transfer_cancellation_optimization {
            self.send_next_payload();
        } else {
            for _ in 0..self.payload_count() {
                self.send_next_payload();
            }
        }
        Ok(())
    }

    /// Hand the next unsent payload to the transport, in declaration order
    pub fn send_next_payload(&mut self) {
        let payload = match self.payload_at(self.next_payload_index) {
            Some(payload) => payload.clone(),
            None => {
                warn!(
                    endpoint_id = %self.endpoint_id,
                    target_id = self.share_target.id,
                    "no more payloads to send"
                );
                return;
            }
        };
        self.next_payload_index += 1;
        debug!(
            endpoint_id = %self.endpoint_id,
            payload_id = payload.id,
            size = payload.size(),
            "sending payload"
        );
        let listener = self
            .payload_updates
            .clone()
            .map(|queue| queue as SharedPayloadListener);
        self.connections_manager.send(&self.endpoint_id, payload, listener);
    }

    fn payload_count(&self) -> usize {
        self.text_payloads.len() + self.file_payloads.len() + self.wifi_credentials_payloads.len()
    }

    fn payload_at(&self, index: usize) -> Option<&Payload> {
        if index < self.text_payloads.len() {
            return self.text_payloads.get(index);
        }
        let index = index - self.text_payloads.len();
        if index < self.file_payloads.len() {
            return self.file_payloads.get(index);
        }
        self.wifi_credentials_payloads.get(index - self.file_payloads.len())
    }

    /// Drain queued transport updates on the service thread.
    ///
    /// Progress reports go out through the transfer-update callback as they
    /// are produced; a terminal report is returned to the caller instead,
    /// who decides between [`delay_complete`](Self::delay_complete) and
    /// direct teardown. Returns `None` while the transfer is still moving.
    pub fn process_payload_transfer_updates(&mut self) -> Option<TransferMetadata> {
        let updates = match &self.payload_updates {
            Some(queue) => queue.lock().unwrap().drain(),
            None => return None,
        };
        for update in updates {
            let metadata = match self.payload_tracker.as_mut() {
                Some(tracker) => tracker.consume(update),
                None => return None,
            };
            if let Some(metadata) = metadata {
                if metadata.is_final_status {
                    return Some(metadata);
                }
                self.update_transfer_metadata(&metadata);
            }
        }
        None
    }

    /// Hold a locally complete transfer open until the receiver leaves.
    ///
    /// Reports the completion downgraded to `InProgress`, parks the real
    /// report in the pending cell, and arms the disconnect-delay timer. If
    /// the receiver disconnects first, [`on_disconnect`](Self::on_disconnect)
    /// flushes the parked `Complete`; if the timer fires first it discards
    /// the parked report and force-closes the connection, after which the
    /// disconnect surfaces the pre-armed `Failed`.
    pub fn delay_complete(&mut self, metadata: TransferMetadata) {
        *self.pending_complete.lock().unwrap() = Some(metadata.clone());
        self.update_transfer_metadata(&metadata.as_in_progress());

        let connection = match &self.connection {
            Some(connection) => connection.clone(),
            None => {
                warn!(
                    endpoint_id = %self.endpoint_id,
                    "transfer complete without a connection"
                );
                return;
            }
        };
        let pending = self.pending_complete.clone();
        let endpoint_id = self.endpoint_id.clone();
        self.disconnect_timer = Some(CancellableTimer::new(
            &*self.runner,
            "disconnection_timeout",
            Duration::from_secs(self.config.disconnect_delay_secs),
            Box::new(move || {
                if pending.lock().unwrap().take().is_some() {
                    info!(
                        endpoint_id = %endpoint_id,
                        "receiver failed to disconnect in time, closing connection"
                    );
                    connection.close();
                }
            }),
        ));
    }

    /// Refresh identity fields after a dedup match; connected sessions keep
    /// theirs
    pub fn update_session_for_dedup(
        &mut self,
        share_target: ShareTarget,
        certificate: Option<DecryptedCertificate>,
        endpoint_id: impl Into<String>,
    ) {
        if self.is_connected() {
            debug!(
                target_id = self.share_target.id,
                "connected session keeps its identity"
            );
            return;
        }
        self.share_target = share_target;
        self.certificate = certificate;
        self.endpoint_id = endpoint_id.into();
    }

    /// The single reporting funnel: enriches `metadata` with the session's
    /// token and self-share flag, then delivers it. Updates after a final
    /// status are swallowed; teardown races make them benign.
    pub fn update_transfer_metadata(&mut self, metadata: &TransferMetadata) {
        if self.delivered_final_status {
            debug!(
                target_id = self.share_target.id,
                status = ?metadata.status,
                "final status already delivered, dropping update"
            );
            return;
        }
        let mut enriched = metadata.clone();
        enriched.token = self.token.clone();
        enriched.is_self_share = self.share_target.for_self_share;
        if enriched.is_final_status {
            self.delivered_final_status = true;
            info!(
                target_id = self.share_target.id,
                status = ?enriched.status,
                "transfer reached final status"
            );
        }
        (self.transfer_update_callback)(&self.share_target, &enriched);
    }

    /// Report a terminal status, then disconnect
    pub fn abort(&mut self, status: TransferStatus) {
        self.update_transfer_metadata(&TransferMetadata::for_status(status));
        self.disconnect();
    }

    /// Ask the transport to tear the connection down; the handle is cleared
    /// later in [`on_disconnect`](Self::on_disconnect)
    pub fn disconnect(&mut self) {
        self.connections_manager.disconnect(&self.endpoint_id);
    }

    /// The transport reported the connection gone.
    ///
    /// Flushes a parked completion report if the receiver beat the
    /// disconnect-delay timer, then surfaces the pre-armed disconnect
    /// status, then drops the connection handle and session timers.
    pub fn on_disconnect(&mut self) {
        let pending = self.pending_complete.lock().unwrap().take();
        if let Some(metadata) = pending {
            debug!(
                target_id = self.share_target.id,
                "flushing delayed completion report"
            );
            self.update_transfer_metadata(&metadata);
        }
        if let Some(status) = self.disconnect_status {
            self.update_transfer_metadata(&TransferMetadata::for_status(status));
        }
        if let Some(timer) = self.mutual_acceptance_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.disconnect_timer.take() {
            timer.cancel();
        }
        self.connection = None;
        info!(
            endpoint_id = %self.endpoint_id,
            target_id = self.share_target.id,
            "disconnected"
        );
    }

    /// Cancel every in-flight payload at the transport and tell the peer.
    ///
    /// Idempotent; returns false when the payloads were already cancelled.
    pub fn cancel_payloads(&mut self) -> bool {
        if self.payloads_cancelled {
            return false;
        }
        self.payloads_cancelled = true;
        for &payload_id in self.attachment_payload_map.values() {
            self.connections_manager.cancel(payload_id);
        }
        if let Some(connection) = &self.connection {
            connection.write(Frame::Cancel.encode());
        }
        info!(
            endpoint_id = %self.endpoint_id,
            target_id = self.share_target.id,
            payloads = self.attachment_payload_map.len(),
            "payloads cancelled"
        );
        true
    }

    /// Arm the status reported when the connection later drops
    pub fn set_disconnect_status(&mut self, status: TransferStatus) {
        if !status.is_final() {
            warn!(
                status = ?status,
                "disconnect status must be a final status"
            );
        }
        self.disconnect_status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connections::{PayloadContent, PayloadStatus, PayloadTransferUpdate};
    use crate::protocol::types::{
        DeviceType, FileAttachment, TextAttachment, TextKind, WifiCredentialsAttachment,
        WifiSecurityType,
    };
    use crate::testing::connections::{FakeConnection, FakeConnectionsManager};
    use crate::testing::runner::{FakeClock, FakeTaskRunner};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        clock: Arc<FakeClock>,
        runner: Arc<FakeTaskRunner>,
        connections: Arc<FakeConnectionsManager>,
        session: OutgoingShareSession,
        updates: Arc<Mutex<Vec<TransferMetadata>>>,
    }

    impl Fixture {
        fn statuses(&self) -> Vec<TransferStatus> {
            self.updates.lock().unwrap().iter().map(|m| m.status).collect()
        }

        fn last_update(&self) -> TransferMetadata {
            self.updates.lock().unwrap().last().cloned().expect("no updates")
        }
    }

    fn fixture_with_target(target: ShareTarget) -> Fixture {
        let clock = Arc::new(FakeClock::new());
        let runner = Arc::new(FakeTaskRunner::new());
        let connections = FakeConnectionsManager::new();
        let updates = Arc::new(Mutex::new(Vec::new()));

        let sink = updates.clone();
        let callback: TransferUpdateCallback = Arc::new(move |_target, metadata| {
            sink.lock().unwrap().push(metadata.clone());
        });
        let session = OutgoingShareSession::new(
            clock.clone(),
            runner.clone(),
            connections.clone(),
            Arc::new(ShareConfig::default()),
            "endpoint-a",
            target,
            None,
            callback,
        );
        Fixture { clock, runner, connections, session, updates }
    }

    fn fixture() -> Fixture {
        fixture_with_target(ShareTarget::new("Pixel 9", DeviceType::Phone))
    }

    fn sample_container() -> AttachmentContainer {
        let mut wifi = WifiCredentialsAttachment::new("cafe", WifiSecurityType::WpaPsk);
        wifi.password = "hunter2".to_string();
        AttachmentContainer::new(
            vec![TextAttachment::new(TextKind::Text, "hello", "note")],
            vec![FileAttachment::new("photo.jpg", "image/jpeg")],
            vec![wifi],
        )
    }

    fn stage(fx: &mut Fixture, container: AttachmentContainer) {
        let file_count = container.file_attachments.len();
        fx.session.initiate_send_attachments(container).unwrap();
        fx.session.create_text_payloads();
        let infos = (0..file_count)
            .map(|i| FileInfo {
                size: 995,
                file_path: PathBuf::from(format!("/tmp/file-{}.bin", i)),
            })
            .collect();
        fx.session.create_file_payloads(infos).unwrap();
        fx.session.create_wifi_credentials_payloads();
    }

    fn connect(fx: &mut Fixture) -> Arc<FakeConnection> {
        let connection = FakeConnection::new();
        let handle: Arc<dyn Connection> = connection.clone();
        assert!(fx.session.on_connect_result(Some(handle), ConnectionStatus::Success));
        connection
    }

    fn no_wake() -> WakeCallback {
        Arc::new(|| {})
    }

    #[test]
    fn test_initiate_stages_attachments_once() {
        let mut fx = fixture();
        assert!(fx.session.session_id().is_none());

        fx.session.initiate_send_attachments(sample_container()).unwrap();
        assert!(fx.session.session_id().is_some());
        assert!(fx.session.attachment_container().has_attachments());

        let err = fx.session.initiate_send_attachments(sample_container());
        assert_eq!(err, Err(SessionError::AlreadyInitiated));
    }

    #[test]
    fn test_create_payloads_maps_every_attachment() {
        let mut fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let container = sample_container();
        let text_id = container.text_attachments[0].id;
        let file_id = container.file_attachments[0].id;
        let wifi_id = container.wifi_credentials_attachments[0].id;
        fx.session.initiate_send_attachments(container).unwrap();

        fx.session.create_text_payloads();
        fx.session
            .create_file_payloads(vec![FileInfo { size: 64, file_path: path.clone() }])
            .unwrap();
        fx.session.create_wifi_credentials_payloads();

        let map = fx.session.attachment_payload_map();
        assert_eq!(map.len(), 3);
        assert!(map.contains_key(&text_id));
        assert!(map.contains_key(&file_id));
        assert!(map.contains_key(&wifi_id));

        let file = &fx.session.attachment_container().file_attachments[0];
        assert_eq!(file.size, 64);
        assert_eq!(file.file_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_create_file_payloads_rejects_mismatched_infos() {
        let mut fx = fixture();
        fx.session.initiate_send_attachments(sample_container()).unwrap();

        let err = fx.session.create_file_payloads(vec![]);
        assert_eq!(err, Err(SessionError::FileInfoMismatch));
        assert!(fx.session.attachment_payload_map().is_empty());
    }

    #[test]
    fn test_recreating_payloads_replaces_mapping() {
        let mut fx = fixture();
        let container = sample_container();
        let text_id = container.text_attachments[0].id;
        fx.session.initiate_send_attachments(container).unwrap();

        fx.session.create_text_payloads();
        let first = fx.session.attachment_payload_map()[&text_id];
        fx.session.create_text_payloads();
        let second = fx.session.attachment_payload_map()[&text_id];
        assert_ne!(first, second);
        assert_eq!(fx.session.attachment_payload_map().len(), 1);
    }

    #[test]
    fn test_transport_type_tracks_size_and_content() {
        let cases = [
            // big file, hotspot allowed
            (2 * 1024 * 1024, true, false, TransportType::HighQuality),
            // big file, hotspot disabled
            (2 * 1024 * 1024, true, true, TransportType::HighQualityNonDisruptive),
            // small, no files
            (0, false, false, TransportType::NonDisruptive),
            // small file
            (1024, true, false, TransportType::Any),
        ];
        for (file_size, with_file, disable_wifi_hotspot, expected) in cases {
            let mut fx = fixture();
            let files = if with_file {
                let mut file = FileAttachment::new("data.bin", "application/octet-stream");
                file.size = file_size;
                vec![file]
            } else {
                Vec::new()
            };
            let container = AttachmentContainer::new(
                vec![TextAttachment::new(TextKind::Text, "hi", "hi")],
                files,
                vec![],
            );
            fx.session.initiate_send_attachments(container).unwrap();
            fx.session.connect(
                vec![1, 2],
                None,
                DataUsage::Online,
                disable_wifi_hotspot,
                Box::new(|_, _| {}),
            );

            let requests = fx.connections.connect_requests();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].transport_type, expected);
        }
    }

    #[test]
    fn test_connect_failure_aborts_with_timeout_status() {
        let mut fx = fixture();
        assert!(!fx.session.on_connect_result(None, ConnectionStatus::Timeout));

        assert_eq!(fx.statuses(), vec![TransferStatus::TimedOut]);
        assert!(fx.last_update().is_final_status);
        assert_eq!(fx.connections.disconnected_endpoints(), vec!["endpoint-a"]);
        assert!(!fx.session.is_connected());
    }

    #[test]
    fn test_connect_failure_aborts_with_failed_status() {
        let mut fx = fixture();
        assert!(!fx.session.on_connect_result(None, ConnectionStatus::Failure));
        assert_eq!(fx.statuses(), vec![TransferStatus::Failed]);
    }

    #[test]
    fn test_connect_success_captures_token() {
        let mut fx = fixture();
        fx.connections
            .set_raw_authentication_token("endpoint-a", vec![0x01, 0x02]);
        fx.clock.advance(Duration::from_millis(250));
        connect(&mut fx);

        assert!(fx.session.is_connected());
        assert_eq!(fx.session.token(), Some("0063"));
        assert!(fx.statuses().is_empty());
    }

    #[test]
    fn test_send_introduction_requires_connection() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        let err = fx.session.send_introduction(Box::new(|| {}));
        assert_eq!(err, Err(SessionError::NotConnected));
    }

    #[test]
    fn test_send_introduction_requires_staged_attachments() {
        let mut fx = fixture();
        connect(&mut fx);
        let err = fx.session.send_introduction(Box::new(|| {}));
        assert_eq!(err, Err(SessionError::NoAttachments));
    }

    #[test]
    fn test_send_introduction_requires_created_payloads() {
        let mut fx = fixture();
        fx.session.initiate_send_attachments(sample_container()).unwrap();
        connect(&mut fx);
        let err = fx.session.send_introduction(Box::new(|| {}));
        assert_eq!(err, Err(SessionError::PayloadsNotCreated));
    }

    #[test]
    fn test_introduction_lists_payloads_in_declaration_order() {
        let mut fx = fixture();
        let container = AttachmentContainer::new(
            vec![
                TextAttachment::new(TextKind::Text, "first", "first"),
                TextAttachment::new(TextKind::Url, "https://a.example", "a.example"),
            ],
            vec![FileAttachment::new("photo.jpg", "image/jpeg")],
            vec![WifiCredentialsAttachment::new("cafe", WifiSecurityType::WpaPsk)],
        );
        let text_ids: Vec<i64> = container.text_attachments.iter().map(|t| t.id).collect();
        stage(&mut fx, container);
        let connection = connect(&mut fx);

        fx.session.send_introduction(Box::new(|| {})).unwrap();

        let frames = connection.written_frames();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Introduction(intro) => {
                assert!(intro.start_transfer);
                let listed: Vec<i64> = intro.text_metadata.iter().map(|t| t.id).collect();
                assert_eq!(listed, text_ids);
                assert_eq!(intro.file_metadata.len(), 1);
                assert_eq!(intro.file_metadata[0].size, 995);
                assert_eq!(intro.wifi_credentials_metadata.len(), 1);

                let map = fx.session.attachment_payload_map();
                for text in &intro.text_metadata {
                    assert_eq!(map[&text.id], text.payload_id);
                }
                for file in &intro.file_metadata {
                    assert_eq!(map[&file.id], file.payload_id);
                }
                for wifi in &intro.wifi_credentials_metadata {
                    assert_eq!(map[&wifi.id], wifi.payload_id);
                }
            }
            other => panic!("expected Introduction, got {:?}", other),
        }
    }

    #[test]
    fn test_accept_before_introduction_is_rejected() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        connect(&mut fx);

        let err = fx.session.accept_transfer(Box::new(|_| {}));
        assert_eq!(err, Err(SessionError::IntroductionNotSent));
    }

    #[test]
    fn test_accept_reports_awaiting_remote_acceptance_with_token() {
        let mut fx = fixture_with_target({
            let mut target = ShareTarget::new("My Laptop", DeviceType::Laptop);
            target.for_self_share = true;
            target
        });
        fx.connections
            .set_raw_authentication_token("endpoint-a", vec![0x01, 0x02]);
        stage(&mut fx, sample_container());
        let connection = connect(&mut fx);
        fx.session.send_introduction(Box::new(|| {})).unwrap();

        fx.session.accept_transfer(Box::new(|_| {})).unwrap();

        let update = fx.last_update();
        assert_eq!(update.status, TransferStatus::AwaitingRemoteAcceptance);
        assert_eq!(update.token.as_deref(), Some("0063"));
        assert!(update.is_self_share);
        // the response read is armed
        assert_eq!(connection.pending_read_count(), 1);

        // accepting twice requires another introduction
        let err = fx.session.accept_transfer(Box::new(|_| {}));
        assert_eq!(err, Err(SessionError::IntroductionNotSent));
    }

    #[test]
    fn test_accept_routes_response_frame_to_callback() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        let connection = connect(&mut fx);
        fx.session.send_introduction(Box::new(|| {})).unwrap();

        let received = Arc::new(Mutex::new(None));
        let sink = received.clone();
        fx.session
            .accept_transfer(Box::new(move |response| {
                *sink.lock().unwrap() = Some(response);
            }))
            .unwrap();

        connection.deliver_frame(Some(Frame::ConnectionResponse(ConnectionResponseFrame {
            status: ResponseStatus::Accept,
        })));
        assert_eq!(
            *received.lock().unwrap(),
            Some(Some(ConnectionResponseFrame { status: ResponseStatus::Accept }))
        );
    }

    #[test]
    fn test_unexpected_frame_reaches_callback_as_none() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        let connection = connect(&mut fx);
        fx.session.send_introduction(Box::new(|| {})).unwrap();

        let received = Arc::new(Mutex::new(None));
        let sink = received.clone();
        fx.session
            .accept_transfer(Box::new(move |response| {
                *sink.lock().unwrap() = Some(response);
            }))
            .unwrap();

        connection.deliver_frame(Some(Frame::Cancel));
        assert_eq!(*received.lock().unwrap(), Some(None));
    }

    #[test]
    fn test_mutual_acceptance_timeout_fires_without_response() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        connect(&mut fx);

        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        fx.session
            .send_introduction(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        fx.runner.fast_forward(Duration::from_secs(59));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        fx.runner.fast_forward(Duration::from_secs(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_response_cancels_acceptance_timer() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        connect(&mut fx);

        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        fx.session
            .send_introduction(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let next = fx.session.handle_connection_response(Some(ConnectionResponseFrame {
            status: ResponseStatus::Accept,
        }));
        assert_eq!(next, None);

        fx.runner.fast_forward(Duration::from_secs(120));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connection_response_status_mapping() {
        let cases = [
            (ResponseStatus::Reject, TransferStatus::Rejected),
            (ResponseStatus::NotEnoughSpace, TransferStatus::NotEnoughSpace),
            (
                ResponseStatus::UnsupportedAttachmentType,
                TransferStatus::UnsupportedAttachmentType,
            ),
            (ResponseStatus::TimedOut, TransferStatus::TimedOut),
            (ResponseStatus::Unknown, TransferStatus::Failed),
        ];
        for (response, expected) in cases {
            let mut fx = fixture();
            let next = fx
                .session
                .handle_connection_response(Some(ConnectionResponseFrame { status: response }));
            assert_eq!(next, Some(expected));
            // rejections are returned, not reported
            assert!(fx.statuses().is_empty());
        }
    }

    #[test]
    fn test_absent_connection_response_is_failure() {
        let mut fx = fixture();
        assert_eq!(
            fx.session.handle_connection_response(None),
            Some(TransferStatus::Failed)
        );
    }

    #[test]
    fn test_accept_reports_in_progress() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        connect(&mut fx);
        fx.session.send_introduction(Box::new(|| {})).unwrap();

        let next = fx.session.handle_connection_response(Some(ConnectionResponseFrame {
            status: ResponseStatus::Accept,
        }));
        assert_eq!(next, None);
        assert_eq!(fx.last_update().status, TransferStatus::InProgress);
    }

    #[test]
    fn test_send_payloads_transmits_in_declaration_order() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        let connection = connect(&mut fx);

        fx.session
            .send_payloads(false, Box::new(|_| {}), no_wake())
            .unwrap();

        // the transfer-cancel watch read is armed
        assert_eq!(connection.pending_read_count(), 1);
        let sent = fx.connections.sent_payloads("endpoint-a");
        assert_eq!(sent.len(), 3);
        // text first: its bytes are the attachment body
        assert_eq!(sent[0].content, PayloadContent::Bytes(b"hello".to_vec()));
        assert!(sent[1].is_file());
        assert_eq!(sent[1].size(), 995);
        match &sent[2].content {
            PayloadContent::Bytes(bytes) => {
                let credentials = WifiCredentials::from_bytes(bytes).unwrap();
                assert_eq!(credentials.password, "hunter2");
            }
            other => panic!("expected bytes payload, got {:?}", other),
        }
    }

    #[test]
    fn test_cancellation_optimization_sends_one_at_a_time() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        connect(&mut fx);

        fx.session
            .send_payloads(true, Box::new(|_| {}), no_wake())
            .unwrap();
        assert_eq!(fx.connections.sent_payloads("endpoint-a").len(), 1);

        fx.session.send_next_payload();
        fx.session.send_next_payload();
        assert_eq!(fx.connections.sent_payloads("endpoint-a").len(), 3);

        // exhausted queue is a no-op
        fx.session.send_next_payload();
        assert_eq!(fx.connections.sent_payloads("endpoint-a").len(), 3);
    }

    #[test]
    fn test_payload_updates_flow_through_tracker() {
        let mut fx = fixture();
        let container = AttachmentContainer::new(
            vec![TextAttachment::new(TextKind::Text, "hello", "note")],
            vec![FileAttachment::new("data.bin", "application/octet-stream")],
            vec![],
        );
        let text_id = container.text_attachments[0].id;
        let file_id = container.file_attachments[0].id;
        stage(&mut fx, container);
        connect(&mut fx);

        let wakes = Arc::new(AtomicU32::new(0));
        let counter = wakes.clone();
        let wake: WakeCallback = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fx.session.send_payloads(false, Box::new(|_| {}), wake).unwrap();

        let map = fx.session.attachment_payload_map().clone();
        let text_payload = map[&text_id];
        let file_payload = map[&file_id];

        // transport reports progress; the queue wakes the service thread
        assert!(fx.connections.push_payload_update(
            PayloadTransferUpdate {
                payload_id: file_payload,
                status: PayloadStatus::InProgress,
                total_bytes: 995,
                bytes_transferred: 500,
            },
            None,
        ));
        fx.runner.run_pending();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        assert!(fx.session.process_payload_transfer_updates().is_none());
        let update = fx.last_update();
        assert_eq!(update.status, TransferStatus::InProgress);
        assert_eq!(update.transferred_bytes, 500);

        // all payloads succeed: the terminal report is returned, not sent
        fx.connections.push_payload_update(
            PayloadTransferUpdate {
                payload_id: text_payload,
                status: PayloadStatus::Success,
                total_bytes: 5,
                bytes_transferred: 5,
            },
            None,
        );
        fx.connections.push_payload_update(
            PayloadTransferUpdate {
                payload_id: file_payload,
                status: PayloadStatus::Success,
                total_bytes: 995,
                bytes_transferred: 995,
            },
            None,
        );
        let terminal = fx.session.process_payload_transfer_updates().unwrap();
        assert_eq!(terminal.status, TransferStatus::Complete);
        assert!(!fx.statuses().contains(&TransferStatus::Complete));
    }

    #[test]
    fn test_delay_complete_reports_when_remote_disconnects() {
        let mut fx = fixture();
        let connection = connect(&mut fx);

        let mut complete = TransferMetadata::for_status(TransferStatus::Complete);
        complete.progress = 100.0;
        fx.session.delay_complete(complete);

        // completion is held back while the peer is still connected
        assert_eq!(fx.statuses(), vec![TransferStatus::InProgress]);
        assert_eq!(fx.last_update().progress, 100.0);
        assert!(!connection.is_closed());

        fx.session.on_disconnect();
        assert_eq!(
            fx.statuses(),
            vec![TransferStatus::InProgress, TransferStatus::Complete]
        );
        assert!(!fx.session.is_connected());
    }

    #[test]
    fn test_delay_complete_timeout_forces_close() {
        let mut fx = fixture();
        let connection = connect(&mut fx);

        fx.session
            .delay_complete(TransferMetadata::for_status(TransferStatus::Complete));
        fx.runner.fast_forward(Duration::from_secs(60));
        assert!(connection.is_closed());

        // the transport notices the close; the pre-armed failure surfaces
        fx.session.on_disconnect();
        assert_eq!(
            fx.statuses(),
            vec![TransferStatus::InProgress, TransferStatus::Failed]
        );
    }

    #[test]
    fn test_remote_disconnect_disarms_delay_timer() {
        let mut fx = fixture();
        let connection = connect(&mut fx);

        fx.session
            .delay_complete(TransferMetadata::for_status(TransferStatus::Complete));
        fx.session.on_disconnect();

        fx.runner.fast_forward(Duration::from_secs(120));
        assert!(!connection.is_closed());
    }

    #[test]
    fn test_unexpected_disconnect_surfaces_failure() {
        let mut fx = fixture();
        connect(&mut fx);
        fx.session.on_disconnect();
        assert_eq!(fx.statuses(), vec![TransferStatus::Failed]);
    }

    #[test]
    fn test_updates_after_final_status_are_swallowed() {
        let mut fx = fixture();
        connect(&mut fx);

        fx.session.abort(TransferStatus::Rejected);
        assert_eq!(fx.statuses(), vec![TransferStatus::Rejected]);
        assert_eq!(fx.connections.disconnected_endpoints(), vec!["endpoint-a"]);

        // the disconnect that follows the abort must not add a second final
        fx.session.on_disconnect();
        fx.session
            .update_transfer_metadata(&TransferMetadata::for_status(TransferStatus::InProgress));
        assert_eq!(fx.statuses(), vec![TransferStatus::Rejected]);
    }

    #[test]
    fn test_key_verification_failure_returns_false() {
        let mut fx = fixture();
        assert!(!fx
            .session
            .process_key_verification_result(KeyVerificationResult::Fail, OsType::Android));
        assert_eq!(fx.session.os_type(), OsType::Android);
        assert!(!fx
            .session
            .process_key_verification_result(KeyVerificationResult::Unknown, OsType::Windows));
        assert_eq!(fx.session.os_type(), OsType::Windows);
    }

    #[test]
    fn test_key_verification_success_clears_token() {
        let mut fx = fixture();
        fx.connections
            .set_raw_authentication_token("endpoint-a", vec![0x01, 0x02]);
        connect(&mut fx);
        assert!(fx.session.token().is_some());

        assert!(fx
            .session
            .process_key_verification_result(KeyVerificationResult::Success, OsType::ChromeOs));
        assert!(fx.session.token().is_none());
    }

    #[test]
    fn test_key_verification_unable_clears_self_share() {
        let mut fx = fixture_with_target({
            let mut target = ShareTarget::new("My Laptop", DeviceType::Laptop);
            target.for_self_share = true;
            target
        });
        assert!(fx
            .session
            .process_key_verification_result(KeyVerificationResult::Unable, OsType::Macos));
        assert!(!fx.session.share_target().for_self_share);
    }

    #[test]
    fn test_dedup_update_replaces_identity_when_unconnected() {
        let mut fx = fixture();
        let mut replacement = ShareTarget::new("Pixel 9 Pro", DeviceType::Phone);
        replacement.id = fx.session.target_id();

        fx.session.update_session_for_dedup(
            replacement.clone(),
            Some(DecryptedCertificate(vec![9, 9])),
            "endpoint-b",
        );
        assert_eq!(fx.session.share_target().device_name, "Pixel 9 Pro");
        assert_eq!(fx.session.endpoint_id(), "endpoint-b");
        assert_eq!(fx.session.certificate(), Some(&DecryptedCertificate(vec![9, 9])));

        // a rediscovery without a certificate clears the stored one
        fx.session
            .update_session_for_dedup(replacement, None, "endpoint-c");
        assert!(fx.session.certificate().is_none());
    }

    #[test]
    fn test_dedup_update_is_noop_while_connected() {
        let mut fx = fixture();
        connect(&mut fx);

        let replacement = ShareTarget::new("Imposter", DeviceType::Tablet);
        fx.session
            .update_session_for_dedup(replacement, None, "endpoint-z");
        assert_eq!(fx.session.share_target().device_name, "Pixel 9");
        assert_eq!(fx.session.endpoint_id(), "endpoint-a");
    }

    #[test]
    fn test_cancel_payloads_is_idempotent() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        let connection = connect(&mut fx);

        assert!(fx.session.cancel_payloads());
        let mut cancelled = fx.connections.cancelled_payloads();
        cancelled.sort_unstable();
        let mut expected: Vec<PayloadId> =
            fx.session.attachment_payload_map().values().copied().collect();
        expected.sort_unstable();
        assert_eq!(cancelled, expected);
        assert!(connection.written_frames().contains(&Frame::Cancel));

        assert!(!fx.session.cancel_payloads());
        assert_eq!(fx.connections.cancelled_payloads().len(), 3);
    }

    #[test]
    fn test_send_payloads_requires_connection() {
        let mut fx = fixture();
        stage(&mut fx, sample_container());
        let err = fx.session.send_payloads(false, Box::new(|_| {}), no_wake());
        assert_eq!(err, Err(SessionError::NotConnected));
    }
}
