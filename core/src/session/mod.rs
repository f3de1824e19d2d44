//! Outgoing transfer sessions
//!
//! Contains:
//! - Outgoing share session: the per-target send state machine
//! - Payload tracker: folds raw transport updates into progress reports
//! - Payload update queue: the transport-to-service-thread mailbox

pub mod outgoing;
pub mod tracker;

pub use outgoing::OutgoingShareSession;
pub use tracker::{PayloadTracker, PayloadUpdateQueue, WakeCallback};
