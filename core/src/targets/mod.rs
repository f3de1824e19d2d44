//! Share target discovery bookkeeping
//!
//! Contains:
//! - Targets manager: dedup of radio noise onto stable sessions
//! - Discovery cache: retention entries for transiently lost targets

pub mod cache;
pub mod manager;

pub use cache::DiscoveryCacheEntry;
pub use manager::OutgoingTargetsManager;
