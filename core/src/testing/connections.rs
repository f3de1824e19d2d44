//! In-process transport fakes
//!
//! [`FakeConnectionsManager`] records every operation a session performs and
//! lets tests script the other side: resolving connect attempts, delivering
//! frames and pushing payload updates into registered listeners.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::network::connections::{
    ConnectCallback, Connection, ConnectionStatus, ConnectionsManager, Medium, Payload, PayloadId,
    PayloadTransferUpdate, SharedPayloadListener,
};
use crate::network::frames::Frame;
use crate::protocol::types::{DataUsage, TransportType};

type ReadCallback = Box<dyn FnOnce(Option<Frame>) + Send>;

/// Scriptable connection: records writes, queues reads for the test to
/// answer
#[derive(Default)]
pub struct FakeConnection {
    written: Mutex<Vec<Vec<u8>>>,
    pending_reads: Mutex<VecDeque<ReadCallback>>,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Frames written so far, decoded
    pub fn written_frames(&self) -> Vec<Frame> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter_map(|bytes| Frame::decode(bytes).ok())
            .collect()
    }

    /// Answer the oldest pending read; false if nothing is waiting
    pub fn deliver_frame(&self, frame: Option<Frame>) -> bool {
        let callback = self.pending_reads.lock().unwrap().pop_front();
        match callback {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    pub fn pending_read_count(&self) -> usize {
        self.pending_reads.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for FakeConnection {
    fn write(&self, bytes: Vec<u8>) {
        self.written.lock().unwrap().push(bytes);
    }

    fn read_frame(&self, callback: Box<dyn FnOnce(Option<Frame>) + Send>) {
        self.pending_reads.lock().unwrap().push_back(callback);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Recorded metadata of one connect attempt
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub endpoint_id: String,
    pub endpoint_info: Vec<u8>,
    pub bluetooth_mac_address: Option<Vec<u8>>,
    pub data_usage: DataUsage,
    pub transport_type: TransportType,
}

#[derive(Default)]
struct ManagerState {
    connect_requests: Vec<ConnectRequest>,
    pending_connects: HashMap<String, ConnectCallback>,
    sent_payloads: Vec<(String, Payload)>,
    listeners: HashMap<PayloadId, SharedPayloadListener>,
    cancelled_payloads: Vec<PayloadId>,
    disconnected_endpoints: Vec<String>,
    upgraded_endpoints: Vec<String>,
    raw_tokens: HashMap<String, Vec<u8>>,
}

/// Scriptable connections manager
#[derive(Default)]
pub struct FakeConnectionsManager {
    state: Mutex<ManagerState>,
}

impl FakeConnectionsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the raw authentication token for an endpoint
    pub fn set_raw_authentication_token(&self, endpoint_id: &str, token: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .raw_tokens
            .insert(endpoint_id.to_string(), token);
    }

    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().unwrap().connect_requests.clone()
    }

    /// Resolve the pending connect attempt for `endpoint_id`; false if no
    /// attempt is pending
    pub fn resolve_connect(
        &self,
        endpoint_id: &str,
        connection: Option<Arc<dyn Connection>>,
        status: ConnectionStatus,
    ) -> bool {
        let callback = self
            .state
            .lock()
            .unwrap()
            .pending_connects
            .remove(endpoint_id);
        match callback {
            Some(callback) => {
                callback(connection, status);
                true
            }
            None => false,
        }
    }

    /// Payloads sent to `endpoint_id`, in send order
    pub fn sent_payloads(&self, endpoint_id: &str) -> Vec<Payload> {
        self.state
            .lock()
            .unwrap()
            .sent_payloads
            .iter()
            .filter(|(endpoint, _)| endpoint == endpoint_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Push a raw payload update into the listener registered for it; false
    /// if no listener is registered
    pub fn push_payload_update(
        &self,
        update: PayloadTransferUpdate,
        upgraded_medium: Option<Medium>,
    ) -> bool {
        let listener = self
            .state
            .lock()
            .unwrap()
            .listeners
            .get(&update.payload_id)
            .cloned();
        match listener {
            Some(listener) => {
                listener.lock().unwrap().on_status_update(update, upgraded_medium);
                true
            }
            None => false,
        }
    }

    pub fn cancelled_payloads(&self) -> Vec<PayloadId> {
        self.state.lock().unwrap().cancelled_payloads.clone()
    }

    pub fn disconnected_endpoints(&self) -> Vec<String> {
        self.state.lock().unwrap().disconnected_endpoints.clone()
    }

    pub fn upgraded_endpoints(&self) -> Vec<String> {
        self.state.lock().unwrap().upgraded_endpoints.clone()
    }
}

impl ConnectionsManager for FakeConnectionsManager {
    fn connect(
        &self,
        endpoint_info: Vec<u8>,
        endpoint_id: &str,
        bluetooth_mac_address: Option<Vec<u8>>,
        data_usage: DataUsage,
        transport_type: TransportType,
        callback: ConnectCallback,
    ) {
        let mut state = self.state.lock().unwrap();
        state.connect_requests.push(ConnectRequest {
            endpoint_id: endpoint_id.to_string(),
            endpoint_info,
            bluetooth_mac_address,
            data_usage,
            transport_type,
        });
        state.pending_connects.insert(endpoint_id.to_string(), callback);
    }

    fn disconnect(&self, endpoint_id: &str) {
        self.state
            .lock()
            .unwrap()
            .disconnected_endpoints
            .push(endpoint_id.to_string());
    }

    fn send(&self, endpoint_id: &str, payload: Payload, listener: Option<SharedPayloadListener>) {
        let mut state = self.state.lock().unwrap();
        if let Some(listener) = listener {
            state.listeners.insert(payload.id, listener);
        }
        state.sent_payloads.push((endpoint_id.to_string(), payload));
    }

    fn cancel(&self, payload_id: PayloadId) {
        self.state.lock().unwrap().cancelled_payloads.push(payload_id);
    }

    fn register_payload_status_listener(
        &self,
        payload_id: PayloadId,
        listener: SharedPayloadListener,
    ) {
        self.state.lock().unwrap().listeners.insert(payload_id, listener);
    }

    fn upgrade_bandwidth(&self, endpoint_id: &str) {
        self.state
            .lock()
            .unwrap()
            .upgraded_endpoints
            .push(endpoint_id.to_string());
    }

    fn raw_authentication_token(&self, endpoint_id: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().raw_tokens.get(endpoint_id).cloned()
    }
}
