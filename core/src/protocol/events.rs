//! Service events and callback contracts
//!
//! All manager and session mutation happens on one service thread. Work
//! originating elsewhere (timer fires, transport callbacks) re-enters
//! through a [`ServiceEvent`] on the manager's channel or through a task
//! posted on the service runner.

use std::sync::Arc;

use crate::protocol::types::{ShareTarget, TransferMetadata};

/// Events delivered to the targets manager over its mpsc channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A discovery cache retention timer expired for this endpoint
    DiscoveryCacheExpired { endpoint_id: String },
}

/// Callback for share target lifecycle events (discovered, updated, lost)
pub type ShareTargetCallback = Box<dyn FnMut(&ShareTarget) + Send>;

/// Callback invoked whenever a session's transfer state changes
///
/// Shared between the manager and every session it owns.
pub type TransferUpdateCallback = Arc<dyn Fn(&ShareTarget, &TransferMetadata) + Send + Sync>;
