//! Error types for the realtime client.
//!
//! Every fallible transport or channel operation returns a [`RealtimeError`].
//! None of these are fatal to the process: connection failures are recovered by
//! the scheduled reconnect and channel failures surface as a status change.

/// Enumeration of realtime client errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RealtimeError {
    /// The relay base URL could not be turned into a socket URL
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    /// A timing or option in the client configuration is unusable
    #[error("Invalid realtime configuration: {0}")]
    InvalidConfig(String),

    /// The socket did not open before the connect timeout elapsed
    #[error("Realtime socket connect timeout after {0} ms")]
    ConnectTimeout(u64),

    /// The socket errored or closed before it finished opening
    #[error("Realtime socket connection error: {0}")]
    Connect(String),

    /// A frame was sent while no socket is open
    #[error("Realtime socket is not connected")]
    NotConnected,

    /// A channel operation that needs a completed join was attempted early
    #[error("Realtime channel {0} is not joined")]
    NotJoined(String),

    /// The broadcast or push was rejected before reaching the socket
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Frame encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Serialization(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RealtimeError>;
