#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
///
/// These never escape the connection task as `Err` values: they are logged and
/// rendered into [`ErrorEvent`](super::types::response::ErrorEvent) details.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The resolved endpoint could not be used to start a connection
    InvalidEndpoint(String),
    /// Error serializing an outbound payload
    Serialize(serde_json::Error),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Message stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::InvalidEndpoint(endpoint) => write!(f, "Invalid WebSocket endpoint: {endpoint}"),
            Self::Serialize(e) => write!(f, "Failed to serialize WebSocket message: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Lagged { count } => write!(f, "Message stream lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Serialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        match e {
            tokio_tungstenite::tungstenite::Error::Url(url_err) => {
                Self::InvalidEndpoint(url_err.to_string())
            }
            tokio_tungstenite::tungstenite::Error::HttpFormat(http_err) => {
                Self::InvalidEndpoint(http_err.to_string())
            }
            other => Self::Connection(other),
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}
