#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use super::connection::ConnectionState;

/// Errors raised by the connection and the transport handle.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// `connect` was called while a connection was open or being opened
    AlreadyConnected(ConnectionState),
    /// The isolated transport context is no longer running
    ConnectionClosed,
    /// A listener lagged and missed events
    Lagged {
        /// Number of events that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected(state) => {
                write!(f, "connect called while connection is {state}")
            }
            Self::ConnectionClosed => write!(f, "transport worker has stopped"),
            Self::Lagged { count } => write!(f, "Listener lagged, missed {count} events"),
        }
    }
}

impl StdError for WsError {}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::AlreadyConnected(_) => crate::error::Kind::Validation,
            _ => crate::error::Kind::WebSocket,
        };
        crate::error::Error::with_source(kind, e)
    }
}
