//! Core data model for outgoing transfers
//!
//! Share targets, attachments, transfer metadata and the small value types
//! shared across the session and targets layers.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Random positive 64-bit identifier for targets, attachments, payloads
/// and sessions. Zero is reserved as "unset".
pub fn random_id() -> i64 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..i64::MAX)
}

// ============================================================================
// Share Targets
// ============================================================================

/// Kind of remote device, as advertised during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Unknown,
    Phone,
    Tablet,
    Laptop,
}

/// Operating system of the remote device, learned during key verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Unknown,
    Android,
    ChromeOs,
    Ios,
    Macos,
    Windows,
}

/// Outcome of paired-key verification with the remote device, produced by
/// the identity layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVerificationResult {
    Unknown,
    Fail,
    Success,
    /// Verification could not be performed; the user must confirm the
    /// displayed token manually
    Unable,
}

/// A remote device that attachments can be sent to
///
/// The `id` is the stable identity the application layer refers to; it
/// survives endpoint churn because the targets manager re-assigns the
/// earliest-known id onto every rediscovery of the same device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareTarget {
    /// Stable target identifier, unique within this process
    pub id: i64,
    /// Stable hardware/account identifier, when the advertisement carries one
    pub device_id: Option<String>,
    /// Human-readable device name
    pub device_name: String,
    /// Advertised device kind
    pub device_type: DeviceType,
    /// Whether the remote device is a known contact
    pub is_known: bool,
    /// Whether the remote device belongs to the local user
    pub for_self_share: bool,
    /// Set while the target only lives in the discovery cache; such targets
    /// are shown but cannot receive until rediscovered
    pub receive_disabled: bool,
}

impl ShareTarget {
    /// New target with a freshly assigned id and default flags
    pub fn new(device_name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: random_id(),
            device_id: None,
            device_name: device_name.into(),
            device_type,
            is_known: false,
            for_self_share: false,
            receive_disabled: false,
        }
    }
}

/// Opaque decrypted public certificate of a remote device
///
/// Produced by the identity layer; the session only stores and forwards it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedCertificate(pub Vec<u8>);

// ============================================================================
// Attachments
// ============================================================================

/// Kind of text carried by a text attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextKind {
    Text,
    Url,
    Address,
    PhoneNumber,
}

/// Security type of a shared Wi-Fi network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiSecurityType {
    Open,
    WpaPsk,
    Wep,
}

/// A short text (message, URL, address, phone number) to send
#[derive(Debug, Clone, PartialEq)]
pub struct TextAttachment {
    pub id: i64,
    pub kind: TextKind,
    /// Full text body; also the payload bytes on the wire
    pub body: String,
    /// Short display title shown on the receiving side
    pub title: String,
}

impl TextAttachment {
    pub fn new(kind: TextKind, body: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: random_id(), kind, body: body.into(), title: title.into() }
    }

    /// Size in bytes of the text body
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// A file to send
///
/// `size` and `file_path` start empty and are back-filled from the resolved
/// file info when payloads are created.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub id: i64,
    pub file_name: String,
    pub mime_type: String,
    /// Size in bytes, 0 until the file has been resolved
    pub size: u64,
    /// Destination subfolder on the receiving side
    pub parent_folder: Option<String>,
    /// Local path, set once the file has been resolved
    pub file_path: Option<PathBuf>,
}

impl FileAttachment {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: random_id(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size: 0,
            parent_folder: None,
            file_path: None,
        }
    }
}

/// Credentials of a Wi-Fi network to share
#[derive(Debug, Clone, PartialEq)]
pub struct WifiCredentialsAttachment {
    pub id: i64,
    pub ssid: String,
    pub security_type: WifiSecurityType,
    pub password: String,
    pub is_hidden: bool,
}

impl WifiCredentialsAttachment {
    pub fn new(ssid: impl Into<String>, security_type: WifiSecurityType) -> Self {
        Self {
            id: random_id(),
            ssid: ssid.into(),
            security_type,
            password: String::new(),
            is_hidden: false,
        }
    }
}

/// Everything staged for one send, in declaration order
///
/// Payloads are created, announced and transmitted in this order: texts,
/// then files, then Wi-Fi credentials.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentContainer {
    pub text_attachments: Vec<TextAttachment>,
    pub file_attachments: Vec<FileAttachment>,
    pub wifi_credentials_attachments: Vec<WifiCredentialsAttachment>,
}

impl AttachmentContainer {
    pub fn new(
        text_attachments: Vec<TextAttachment>,
        file_attachments: Vec<FileAttachment>,
        wifi_credentials_attachments: Vec<WifiCredentialsAttachment>,
    ) -> Self {
        Self { text_attachments, file_attachments, wifi_credentials_attachments }
    }

    /// Whether anything is staged at all
    pub fn has_attachments(&self) -> bool {
        !self.text_attachments.is_empty()
            || !self.file_attachments.is_empty()
            || !self.wifi_credentials_attachments.is_empty()
    }

    pub fn has_files(&self) -> bool {
        !self.file_attachments.is_empty()
    }

    /// Number of staged attachments across all kinds
    pub fn attachment_count(&self) -> u32 {
        (self.text_attachments.len()
            + self.file_attachments.len()
            + self.wifi_credentials_attachments.len()) as u32
    }

    /// Total size in bytes across all kinds; file sizes are accurate only
    /// after payload creation resolved them
    pub fn total_size(&self) -> u64 {
        let texts: u64 = self.text_attachments.iter().map(|t| t.size()).sum();
        let files: u64 = self.file_attachments.iter().map(|f| f.size).sum();
        texts + files
    }
}

/// Resolved size and path of a file attachment, supplied by the caller in
/// file-attachment order when creating file payloads
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub size: u64,
    pub file_path: PathBuf,
}

// ============================================================================
// Transfer Metadata
// ============================================================================

/// Status of an outgoing transfer, reported through the transfer-update
/// callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Introduction sent, waiting for the remote side to accept
    AwaitingRemoteAcceptance,
    /// Both sides accepted, payloads are moving
    InProgress,
    Complete,
    Failed,
    Rejected,
    Cancelled,
    TimedOut,
    NotEnoughSpace,
    UnsupportedAttachmentType,
    /// The transport produced no authentication token for the connection
    DeviceAuthenticationFailed,
}

impl TransferStatus {
    /// Whether this status ends the transfer; a session delivers at most one
    /// final status
    pub fn is_final(&self) -> bool {
        !matches!(self, TransferStatus::AwaitingRemoteAcceptance | TransferStatus::InProgress)
    }
}

/// One transfer-update report: status plus progress detail
///
/// `is_final_status` always mirrors `status.is_final()`; constructors keep
/// the two consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferMetadata {
    pub status: TransferStatus,
    pub is_final_status: bool,
    /// Overall progress percent, 0.0 to 100.0
    pub progress: f32,
    /// Four-digit confirmation token, cleared once the peer is verified
    pub token: Option<String>,
    /// Whether this transfer goes to the local user's own device
    pub is_self_share: bool,
    pub transferred_bytes: u64,
    /// Bytes per second, 0 until the first estimate
    pub transfer_speed: u64,
    pub estimated_time_remaining: Option<Duration>,
    pub total_attachments_count: u32,
    pub transferred_attachments_count: u32,
}

impl TransferMetadata {
    /// Metadata carrying only a status, everything else defaulted
    pub fn for_status(status: TransferStatus) -> Self {
        Self {
            status,
            is_final_status: status.is_final(),
            progress: 0.0,
            token: None,
            is_self_share: false,
            transferred_bytes: 0,
            transfer_speed: 0,
            estimated_time_remaining: None,
            total_attachments_count: 0,
            transferred_attachments_count: 0,
        }
    }

    /// Same report downgraded to `InProgress`, used when a locally complete
    /// transfer must not be announced as complete yet
    pub fn as_in_progress(&self) -> Self {
        Self {
            status: TransferStatus::InProgress,
            is_final_status: false,
            ..self.clone()
        }
    }
}

// ============================================================================
// Transport Selection
// ============================================================================

/// How aggressively the transport layer may pursue bandwidth for a
/// connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Any medium, transport picks freely
    Any,
    /// Must not disturb other radio usage (no hotspot takeover)
    NonDisruptive,
    /// Needs a high-bandwidth medium
    HighQuality,
    /// Needs high bandwidth but may not start a Wi-Fi hotspot
    HighQualityNonDisruptive,
}

/// Data usage preference forwarded to the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataUsage {
    Offline,
    Online,
    WifiOnly,
}

// ============================================================================
// Token Display
// ============================================================================

/// Folds a raw authentication token into the four-digit string both sides
/// display for visual confirmation.
///
/// Polynomial hash over the signed byte values, base 31 modulo 9973,
/// rendered as the zero-padded absolute value.
pub fn token_to_four_digit_string(token: &[u8]) -> String {
    const MODULO: i64 = 9973;
    const BASE: i64 = 31;
    let mut hash: i64 = 0;
    let mut multiplier: i64 = 1;
    for &byte in token {
        hash = (hash + (byte as i8 as i64) * multiplier) % MODULO;
        multiplier = (multiplier * BASE) % MODULO;
    }
    format!("{:04}", hash.abs())
}
