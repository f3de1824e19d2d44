//! Discovery-to-session bookkeeping for outgoing transfers
//!
//! The radio layer reports endpoints appearing and disappearing; this
//! manager turns that noise into stable share targets. One physical device
//! may surface under many endpoint ids over time, so every discovery is
//! first matched against the live sessions (by endpoint id, then by device
//! id) and then against the discovery cache of recently lost targets.
//! A match keeps the original target id; only a genuinely new device gets
//! a new session.
//!
//! All methods run on the service thread. Retention timers fire elsewhere
//! and re-enter through [`ServiceEvent`]s on the channel handed out by
//! [`OutgoingTargetsManager::new`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::network::connections::ConnectionsManager;
use crate::protocol::config::ShareConfig;
use crate::protocol::events::{ServiceEvent, ShareTargetCallback, TransferUpdateCallback};
use crate::protocol::types::{DecryptedCertificate, ShareTarget, TransferStatus};
use crate::session::outgoing::OutgoingShareSession;
use crate::targets::cache::DiscoveryCacheEntry;
use crate::tasks::runner::{Clock, TaskRunner};

/// Owner of all outgoing sessions, keyed by share target id
pub struct OutgoingTargetsManager {
    clock: Arc<dyn Clock>,
    runner: Arc<dyn TaskRunner>,
    connections_manager: Arc<dyn ConnectionsManager>,
    config: Arc<ShareConfig>,

    discovered_callback: ShareTargetCallback,
    updated_callback: ShareTargetCallback,
    lost_callback: ShareTargetCallback,
    transfer_update_callback: TransferUpdateCallback,

    /// endpoint id of a live advertisement -> target id
    endpoint_to_target: HashMap<String, i64>,
    /// target id -> its session; the only owner of session state
    sessions: HashMap<i64, OutgoingShareSession>,
    /// endpoint id -> recently lost target awaiting rediscovery
    discovery_cache: HashMap<String, DiscoveryCacheEntry>,

    events_tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl OutgoingTargetsManager {
    /// Build the manager and the receiving end of its service channel.
    ///
    /// The caller owns the receiver and feeds events back in, either via
    /// [`run`](Self::run) or [`process_pending_events`](Self::process_pending_events).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        runner: Arc<dyn TaskRunner>,
        connections_manager: Arc<dyn ConnectionsManager>,
        config: Arc<ShareConfig>,
        discovered_callback: ShareTargetCallback,
        updated_callback: ShareTargetCallback,
        lost_callback: ShareTargetCallback,
        transfer_update_callback: TransferUpdateCallback,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            clock,
            runner,
            connections_manager,
            config,
            discovered_callback,
            updated_callback,
            lost_callback,
            transfer_update_callback,
            endpoint_to_target: HashMap::new(),
            sessions: HashMap::new(),
            discovery_cache: HashMap::new(),
            events_tx,
        };
        (manager, events_rx)
    }

    /// An advertisement appeared on `endpoint_id`.
    ///
    /// Dedup ladder: a live match (endpoint id, then device id) refreshes
    /// the existing session in place and fires "updated"; a discovery cache
    /// match re-adopts the cached target id onto a fresh session and fires
    /// "updated"; anything else is a first sighting and fires "discovered".
    pub fn on_share_target_discovered(
        &mut self,
        mut share_target: ShareTarget,
        endpoint_id: impl Into<String>,
        certificate: Option<DecryptedCertificate>,
    ) {
        let endpoint_id = endpoint_id.into();
        share_target.receive_disabled = false;

        if let Some(target_id) = self.find_live_target(&endpoint_id, &share_target) {
            share_target.id = target_id;
            // a device-id match relocates the target to its new endpoint
            self.endpoint_to_target.retain(|_, id| *id != target_id);
            self.endpoint_to_target.insert(endpoint_id.clone(), target_id);
            match self.sessions.get_mut(&target_id) {
                Some(session) => {
                    session.update_session_for_dedup(
                        share_target.clone(),
                        certificate,
                        endpoint_id.clone(),
                    );
                }
                None => {
                    warn!(target_id, "live target has no session");
                }
            }
            debug!(
                endpoint_id = %endpoint_id,
                target_id,
                "share target deduplicated onto live session"
            );
            (self.updated_callback)(&share_target);
            return;
        }

        let mut from_cache = false;
        if let Some(cached_target) = self.take_cached_target(&endpoint_id, &share_target) {
            share_target.id = cached_target.id;
            from_cache = true;
        }

        if self.sessions.contains_key(&share_target.id) {
            warn!(target_id = share_target.id, "target id collision in session map");
        }
        let session = OutgoingShareSession::new(
            self.clock.clone(),
            self.runner.clone(),
            self.connections_manager.clone(),
            self.config.clone(),
            endpoint_id.clone(),
            share_target.clone(),
            certificate,
            self.transfer_update_callback.clone(),
        );
        self.endpoint_to_target.insert(endpoint_id.clone(), share_target.id);
        self.sessions.insert(share_target.id, session);

        if from_cache {
            info!(
                endpoint_id = %endpoint_id,
                target_id = share_target.id,
                "share target re-enabled from discovery cache"
            );
            (self.updated_callback)(&share_target);
        } else {
            info!(
                endpoint_id = %endpoint_id,
                target_id = share_target.id,
                device_name = %share_target.device_name,
                "share target discovered"
            );
            (self.discovered_callback)(&share_target);
        }
    }

    /// The advertisement on `endpoint_id` disappeared.
    ///
    /// A connected session is left alone. Otherwise the target moves to the
    /// discovery cache as a receive-disabled copy for `retention`, after
    /// which it is gone for good and "lost" fires.
    pub fn on_share_target_lost(&mut self, endpoint_id: &str, retention: Duration) {
        let target_id = match self.endpoint_to_target.get(endpoint_id) {
            Some(&target_id) => target_id,
            None => {
                warn!(endpoint_id = %endpoint_id, "lost event for unknown endpoint");
                return;
            }
        };
        if let Some(session) = self.sessions.get(&target_id) {
            if session.is_connected() {
                debug!(
                    endpoint_id = %endpoint_id,
                    target_id,
                    "connected target survives advertisement loss"
                );
                return;
            }
        }

        // both maps are updated before the session is dropped
        self.endpoint_to_target.remove(endpoint_id);
        let session = match self.sessions.remove(&target_id) {
            Some(session) => session,
            None => {
                warn!(endpoint_id = %endpoint_id, target_id, "lost target has no session");
                return;
            }
        };

        let mut cached_target = session.share_target().clone();
        cached_target.receive_disabled = true;
        let entry = DiscoveryCacheEntry::new(
            &*self.runner,
            cached_target.clone(),
            endpoint_id,
            retention,
            self.events_tx.clone(),
        );
        self.discovery_cache.insert(endpoint_id.to_string(), entry);
        info!(
            endpoint_id = %endpoint_id,
            target_id,
            retention_secs = retention.as_secs(),
            "share target moved to discovery cache"
        );
        (self.updated_callback)(&cached_target);
    }

    /// Radio shutdown: every live endpoint goes through the lost flow
    pub fn all_targets_lost(&mut self, retention: Duration) {
        let endpoints: Vec<String> = self.endpoint_to_target.keys().cloned().collect();
        info!(targets = endpoints.len(), "all share targets lost");
        for endpoint_id in endpoints {
            self.on_share_target_lost(&endpoint_id, retention);
        }
    }

    /// Tear everything down without firing discovery callbacks.
    ///
    /// Connected sessions are force-disconnected, which reports a failed
    /// transfer update; cached entries are dropped, cancelling their
    /// retention timers.
    pub fn cleanup(&mut self) {
        info!(
            live = self.sessions.len(),
            cached = self.discovery_cache.len(),
            "cleaning up all share targets"
        );
        let mut sessions: Vec<OutgoingShareSession> =
            self.sessions.drain().map(|(_, session)| session).collect();
        self.endpoint_to_target.clear();
        for session in &mut sessions {
            if session.is_connected() {
                session.abort(TransferStatus::Failed);
            }
        }
        self.discovery_cache.clear();
    }

    /// Visit every known target, cached entries first, then live ones
    pub fn for_each_share_target(&self, mut callback: impl FnMut(&ShareTarget)) {
        for entry in self.discovery_cache.values() {
            callback(entry.share_target());
        }
        for session in self.sessions.values() {
            callback(session.share_target());
        }
    }

    pub fn get_session(&self, target_id: i64) -> Option<&OutgoingShareSession> {
        self.sessions.get(&target_id)
    }

    pub fn get_session_mut(&mut self, target_id: i64) -> Option<&mut OutgoingShareSession> {
        self.sessions.get_mut(&target_id)
    }

    /// Dispatch one service event on the service thread
    pub fn handle_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::DiscoveryCacheExpired { endpoint_id } => {
                self.on_discovery_cache_expired(&endpoint_id);
            }
        }
    }

    /// Drain every event already queued, without waiting
    pub fn process_pending_events(&mut self, events: &mut mpsc::UnboundedReceiver<ServiceEvent>) {
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }
    }

    /// Service loop: dispatch events until shutdown is signalled or the
    /// channel closes. Queued events are drained before shutdown wins.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<ServiceEvent>,
        shutdown: &mut mpsc::Receiver<()>,
    ) {
        info!("targets manager service loop started");
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        debug!("targets manager service loop stopped");
    }

    fn on_discovery_cache_expired(&mut self, endpoint_id: &str) {
        let entry = match self.discovery_cache.remove(endpoint_id) {
            Some(entry) => entry,
            None => {
                // rediscovered between the timer firing and this event
                warn!(endpoint_id = %endpoint_id, "cache expiry for an endpoint no longer cached");
                return;
            }
        };
        let share_target = entry.into_share_target();
        info!(
            endpoint_id = %endpoint_id,
            target_id = share_target.id,
            "share target retention expired"
        );
        (self.lost_callback)(&share_target);
    }

    /// Endpoint-id match wins over device-id match
    fn find_live_target(&self, endpoint_id: &str, share_target: &ShareTarget) -> Option<i64> {
        if let Some(&target_id) = self.endpoint_to_target.get(endpoint_id) {
            return Some(target_id);
        }
        let device_id = share_target.device_id.as_deref()?;
        self.sessions
            .values()
            .find(|session| session.share_target().device_id.as_deref() == Some(device_id))
            .map(|session| session.target_id())
    }

    fn take_cached_target(
        &mut self,
        endpoint_id: &str,
        share_target: &ShareTarget,
    ) -> Option<ShareTarget> {
        let key = if self.discovery_cache.contains_key(endpoint_id) {
            Some(endpoint_id.to_string())
        } else {
            share_target.device_id.as_deref().and_then(|device_id| {
                self.discovery_cache
                    .iter()
                    .find(|(_, entry)| {
                        entry.share_target().device_id.as_deref() == Some(device_id)
                    })
                    .map(|(cached_endpoint, _)| cached_endpoint.clone())
            })
        };
        let entry = self.discovery_cache.remove(&key?)?;
        Some(entry.into_share_target())
    }
}
