//! Public surface of the sharing core
//!
//! External code imports configuration, errors, events and domain types
//! from here.
//!
//! # Module Structure
//!
//! - `config.rs`: ShareConfig with the protocol's timeouts and thresholds
//! - `error.rs`: SessionError for caller misuse of a session
//! - `events.rs`: ServiceEvent plus the callback type aliases
//! - `types.rs`: share targets, attachments, transfer metadata, transport
//!   selection, token folding

pub mod config;
pub mod error;
pub mod events;
pub mod types;

// Configuration and errors
pub use config::ShareConfig;
pub use error::SessionError;

// Events and callbacks (for the app layer)
pub use events::{ServiceEvent, ShareTargetCallback, TransferUpdateCallback};

// Domain types
pub use types::{
    token_to_four_digit_string,
    AttachmentContainer,
    DataUsage,
    DecryptedCertificate,
    DeviceType,
    FileAttachment,
    FileInfo,
    KeyVerificationResult,
    OsType,
    ShareTarget,
    TextAttachment,
    TextKind,
    TransferMetadata,
    TransferStatus,
    TransportType,
    WifiCredentialsAttachment,
    WifiSecurityType,
};
