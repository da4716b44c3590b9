//! Resilient WebSocket connection.
//!
//! # Architecture
//!
//! - [`ResilientConnection`]: one logical connection over a replaceable physical socket,
//!   with an outbound FIFO queue and scheduled reconnects
//! - [`Connector`] / [`Socket`]: the seam to the physical socket
//! - [`WsConnector`]: the `tokio-tungstenite` implementation (feature `ws`)
//!
//! # Example
//!
//! ```ignore
//! let (mut connection, mut socket_events) = ResilientConnection::new(WsConnector, Config::default());
//! connection.connect("wss://telemetry.example.com/realtime")?;
//! connection.enqueue_message("subscribe".to_owned());
//!
//! while let Some(event) = socket_events.recv().await {
//!     connection.handle_socket_event(event);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
#[cfg(feature = "ws")]
pub mod socket;
pub mod traits;

pub use connection::{ConnectionEvent, ConnectionState, ListenerId, ResilientConnection};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
#[cfg(feature = "ws")]
pub use socket::{WsConnector, WsSocket};
pub use traits::*;
