//! fxrelay Relay
//!
//! Keeps one supervised WebSocket connection to the requests endpoint,
//! answers conversion requests with Euro-denominated replies, and replays
//! replies that could not be delivered across a reconnect.

pub mod config;
pub mod metrics;
pub mod outbox;
pub mod retry;
pub mod router;
pub mod supervisor;
pub mod transport;
pub mod watchdog;

pub use config::{LogFormat, RelayConfig};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use outbox::{Outbox, Outgoing};
pub use retry::{RetryBuffer, RetryEntry};
pub use router::{MessageRouter, Routed};
pub use supervisor::{ConnectionState, ConnectionSupervisor, ShutdownHandle, SupervisorConfig};
pub use transport::{Connector, FrameSink, FrameStream, Transport, WsConnector};
pub use watchdog::Watchdog;
