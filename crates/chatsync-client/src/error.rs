//! Client error types.

use chatsync_core::{CommandError, SyncError};
use thiserror::Error;

/// Errors raised by the realtime transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake was refused with an auth status.
    #[error("handshake rejected with status {status}")]
    AuthRejected {
        /// HTTP status of the upgrade response.
        status: u16,
    },

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Stream error on an established connection.
    #[error("stream error: {0}")]
    Stream(String),
}

impl TransportError {
    /// Classify a websocket error from the connect phase.
    pub fn from_handshake(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;

        match err {
            Error::Http(response) => {
                let status = response.status().as_u16();
                if matches!(status, 401 | 403) {
                    Self::AuthRejected { status }
                } else {
                    Self::Connect(format!("upgrade refused with status {status}"))
                }
            },
            other => Self::Connect(other.to_string()),
        }
    }
}

/// Errors raised by the runtime and its handle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Engine could not be built.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Intent was rejected before it reached the runtime.
    #[error("command rejected: {0}")]
    Command(#[from] CommandError),

    /// The driver failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The runtime has stopped; the intent was not delivered.
    #[error("runtime stopped")]
    Stopped,

    /// The runtime task panicked or was cancelled.
    #[error("runtime task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for RuntimeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}
