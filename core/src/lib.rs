//! Beam Core
//!
//! Sender-side engine for proximity sharing: turns radio discovery events
//! into stable share targets, walks each target through the send protocol
//! (introduction, mutual acceptance, payload streaming) and reports
//! transfer progress upward.
//!
//! This crate owns the protocol state machines; the actual radios live
//! behind the [`ConnectionsManager`](network::ConnectionsManager) trait the
//! embedding application implements.
//!
//! # Module Structure
//!
//! - `protocol/`: public surface (config, errors, events, domain types)
//! - `targets/`: discovery dedup, the discovery cache, session ownership
//! - `session/`: the per-target send state machine and progress tracking
//! - `transfer/`: payload-send gating while bandwidth upgrades settle
//! - `network/`: transport contracts and wire frames
//! - `tasks/`: deferred execution (task runner, clock, cancellable timers)
//! - `testing/`: deterministic fakes (clock, runner, transport)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use beam_core::{MonotonicClock, OutgoingTargetsManager, ShareConfig, TokioTaskRunner};
//!
//! let (mut manager, mut events) = OutgoingTargetsManager::new(
//!     Arc::new(MonotonicClock),
//!     Arc::new(TokioTaskRunner::new()),
//!     connections_manager,
//!     Arc::new(ShareConfig::default()),
//!     Box::new(|target| println!("discovered {}", target.device_name)),
//!     Box::new(|target| println!("updated {}", target.device_name)),
//!     Box::new(|target| println!("lost {}", target.device_name)),
//!     Arc::new(|target, update| println!("{}: {:?}", target.device_name, update.status)),
//! );
//!
//! // Radio layer reports a device
//! manager.on_share_target_discovered(target, "endpoint-1", None);
//!
//! // Drive the send
//! let session = manager.get_session_mut(target_id).unwrap();
//! session.initiate_send_attachments(container)?;
//! session.create_text_payloads();
//! session.connect(endpoint_info, None, DataUsage::Online, false, callback);
//! ```

// Public interface
pub mod protocol;

// Protocol state machines
pub mod session;
pub mod targets;
pub mod transfer;

// Infrastructure modules
pub mod network;
pub mod tasks;
pub mod testing;

// Re-export main API types for convenience
pub use protocol::{
    AttachmentContainer,
    DataUsage,
    DecryptedCertificate,
    DeviceType,
    FileAttachment,
    FileInfo,
    KeyVerificationResult,
    OsType,
    ServiceEvent,
    SessionError,
    ShareConfig,
    ShareTarget,
    ShareTargetCallback,
    TextAttachment,
    TextKind,
    TransferMetadata,
    TransferStatus,
    TransferUpdateCallback,
    TransportType,
    WifiCredentialsAttachment,
    WifiSecurityType,
};
pub use session::{OutgoingShareSession, PayloadTracker, PayloadUpdateQueue};
pub use targets::OutgoingTargetsManager;
pub use tasks::{CancellableTimer, Clock, MonotonicClock, TaskRunner, TokioTaskRunner};
pub use transfer::TransferManager;
