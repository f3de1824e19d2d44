//! Transfer engine configuration

/// Configuration for the outgoing transfer engine
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// How long to wait for both sides to accept after the introduction
    /// was sent (seconds)
    /// Default: 60
    pub mutual_acceptance_timeout_secs: u64,

    /// Grace period after a locally complete transfer before the connection
    /// is force-closed if the receiver never disconnects (seconds)
    /// Default: 60
    pub disconnect_delay_secs: u64,

    /// How long deferred sends wait for the transport to confirm a
    /// high-quality medium (seconds)
    /// Default: 30
    pub medium_upgrade_timeout_secs: u64,

    /// Total attachment size above which a high-quality medium is requested
    /// (bytes)
    /// Default: 1 MB
    pub high_quality_medium_threshold_bytes: u64,

    /// Minimum spacing between progress reports of one transfer
    /// (milliseconds)
    /// Default: 100
    pub min_progress_update_interval_ms: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            mutual_acceptance_timeout_secs: 60,
            disconnect_delay_secs: 60,
            medium_upgrade_timeout_secs: 30,
            high_quality_medium_threshold_bytes: 1024 * 1024, // 1 MB
            min_progress_update_interval_ms: 100,
        }
    }
}
