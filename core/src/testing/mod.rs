//! Deterministic fakes for driving the core in tests
//!
//! No real radios, sockets or wall-clock time: tests script the transport
//! through [`FakeConnectionsManager`] and step timers with
//! [`FakeTaskRunner::fast_forward`].
//!
//! # Example
//!
//! ```ignore
//! let runner = Arc::new(FakeTaskRunner::new());
//! let connections = FakeConnectionsManager::new();
//!
//! // ... drive a session ...
//!
//! // The other side accepts
//! connection.deliver_frame(Some(Frame::ConnectionResponse(
//!     ConnectionResponseFrame { status: ResponseStatus::Accept },
//! )));
//!
//! // Let the mutual acceptance timeout fire
//! runner.fast_forward(Duration::from_secs(60));
//! ```

pub mod connections;
pub mod runner;

pub use connections::{ConnectRequest, FakeConnection, FakeConnectionsManager};
pub use runner::{FakeClock, FakeTaskRunner};
