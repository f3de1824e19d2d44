//! Transport contracts and wire frames
//!
//! Contains:
//! - Connections: the traits the radio/transport layer implements
//!   (connecting, sending payloads, payload status callbacks)
//! - Frames: the introduction/response/cancel records exchanged with the
//!   receiving device, and their codec

pub mod connections;
pub mod frames;

// Re-export commonly used items
pub use connections::{
    ConnectCallback, Connection, ConnectionStatus, ConnectionsManager, Medium, Payload,
    PayloadContent, PayloadId, PayloadStatus, PayloadStatusListener, PayloadTransferUpdate,
    SharedPayloadListener,
};
pub use frames::{
    ConnectionResponseFrame, DecodeError, Frame, IntroductionFrame, ResponseStatus,
    WifiCredentials,
};
