//! Transport layer contracts
//!
//! The radio/medium layer lives outside this crate; sessions reach it
//! through the [`ConnectionsManager`] and [`Connection`] traits. Payload
//! status flows back through [`PayloadStatusListener`] callbacks, which may
//! arrive on transport threads.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::network::frames::Frame;
use crate::protocol::types::{random_id, DataUsage, TransportType};

/// Transport payload identifier
pub type PayloadId = i64;

/// What a payload carries
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadContent {
    Bytes(Vec<u8>),
    File {
        path: PathBuf,
        size: u64,
        /// Destination subfolder on the receiving side
        parent_folder: Option<String>,
    },
}

/// A unit of transfer handed to the transport layer
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub id: PayloadId,
    pub content: PayloadContent,
}

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { id: random_id(), content: PayloadContent::Bytes(bytes) }
    }

    pub fn from_file(path: PathBuf, size: u64, parent_folder: Option<String>) -> Self {
        Self { id: random_id(), content: PayloadContent::File { path, size, parent_folder } }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.content, PayloadContent::File { .. })
    }

    /// Size in bytes of the carried content
    pub fn size(&self) -> u64 {
        match &self.content {
            PayloadContent::Bytes(bytes) => bytes.len() as u64,
            PayloadContent::File { size, .. } => *size,
        }
    }
}

/// Transport-level state of one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatus {
    InProgress,
    Success,
    Failure,
    Canceled,
}

impl PayloadStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, PayloadStatus::InProgress)
    }
}

/// One raw progress report for one payload
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadTransferUpdate {
    pub payload_id: PayloadId,
    pub status: PayloadStatus,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
}

/// Physical medium a connection currently runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    Unknown,
    Bluetooth,
    Ble,
    WifiLan,
    WifiHotspot,
    WifiDirect,
    WifiAware,
    WebRtc,
}

impl Medium {
    /// Mediums fast enough to carry large attachments without gating
    pub fn is_high_quality(&self) -> bool {
        matches!(
            self,
            Medium::WifiLan
                | Medium::WifiHotspot
                | Medium::WifiDirect
                | Medium::WifiAware
                | Medium::WebRtc
        )
    }
}

/// Receives raw payload updates from the transport layer
///
/// Called on transport threads; implementations must hand the update off to
/// the service thread rather than mutating session state directly.
pub trait PayloadStatusListener: Send {
    fn on_status_update(&mut self, update: PayloadTransferUpdate, upgraded_medium: Option<Medium>);
}

/// Listener handle shared between the transport layer and the session
pub type SharedPayloadListener = Arc<Mutex<dyn PayloadStatusListener>>;

/// Result of a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Success,
    Timeout,
    Failure,
}

/// Callback invoked once when a connection attempt resolves
pub type ConnectCallback = Box<dyn FnOnce(Option<Arc<dyn Connection>>, ConnectionStatus) + Send>;

/// An established connection to one endpoint
pub trait Connection: Send + Sync {
    /// Queue bytes (an encoded frame) for delivery to the peer
    fn write(&self, bytes: Vec<u8>);

    /// Register a one-shot read for the next incoming frame; the callback
    /// gets `None` if the connection closed or the frame failed to decode
    fn read_frame(&self, callback: Box<dyn FnOnce(Option<Frame>) + Send>);

    fn close(&self);
}

/// The transport capability consumed by sessions and the targets manager
pub trait ConnectionsManager: Send + Sync {
    /// Open a connection to `endpoint_id`; `callback` fires exactly once on
    /// the service thread with the outcome
    #[allow(clippy::too_many_arguments)]
    fn connect(
        &self,
        endpoint_info: Vec<u8>,
        endpoint_id: &str,
        bluetooth_mac_address: Option<Vec<u8>>,
        data_usage: DataUsage,
        transport_type: TransportType,
        callback: ConnectCallback,
    );

    fn disconnect(&self, endpoint_id: &str);

    /// Queue a payload for transmission; `listener` receives its raw
    /// progress updates
    fn send(&self, endpoint_id: &str, payload: Payload, listener: Option<SharedPayloadListener>);

    /// Cancel an in-flight payload
    fn cancel(&self, payload_id: PayloadId);

    /// Attach a listener to a payload that was sent without one
    fn register_payload_status_listener(
        &self,
        payload_id: PayloadId,
        listener: SharedPayloadListener,
    );

    /// Ask the transport to move this connection to a faster medium
    fn upgrade_bandwidth(&self, endpoint_id: &str);

    /// Raw authentication token negotiated for the connection, when one
    /// exists
    fn raw_authentication_token(&self, endpoint_id: &str) -> Option<Vec<u8>>;
}
