//! Discovery cache entries for transiently lost share targets

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::events::ServiceEvent;
use crate::protocol::types::ShareTarget;
use crate::tasks::runner::TaskRunner;
use crate::tasks::timer::CancellableTimer;

/// A lost share target parked between its "lost" radio event and either
/// rediscovery or retention expiry.
///
/// The entry owns the retention timer; dropping the entry cancels it.
/// Expiry does not touch the cache directly, it re-enters the targets
/// manager as a [`ServiceEvent::DiscoveryCacheExpired`] on the service
/// channel.
pub struct DiscoveryCacheEntry {
    share_target: ShareTarget,
    _retention_timer: CancellableTimer,
}

impl DiscoveryCacheEntry {
    pub fn new(
        runner: &dyn TaskRunner,
        share_target: ShareTarget,
        endpoint_id: impl Into<String>,
        retention: Duration,
        events: mpsc::UnboundedSender<ServiceEvent>,
    ) -> Self {
        let endpoint_id = endpoint_id.into();
        let retention_timer = CancellableTimer::new(
            runner,
            "discovery_cache_retention",
            retention,
            Box::new(move || {
                let expired = ServiceEvent::DiscoveryCacheExpired { endpoint_id };
                if events.send(expired).is_err() {
                    debug!("service channel closed, dropping cache expiry");
                }
            }),
        );
        Self { share_target, _retention_timer: retention_timer }
    }

    pub fn share_target(&self) -> &ShareTarget {
        &self.share_target
    }

    /// Take the target back out of the cache; the retention timer is
    /// cancelled on drop
    pub fn into_share_target(self) -> ShareTarget {
        self.share_target
    }
}
