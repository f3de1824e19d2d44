//! Payload transmission gating
//!
//! Holds payload sends back while a bandwidth upgrade is settling, then
//! releases them in order.

pub mod manager;

pub use manager::TransferManager;
