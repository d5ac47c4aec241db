//! Error types for the chatsync core.
//!
//! One enum per layer: connection setup, outbound command construction,
//! event handlers, and the collaborator API. [`SyncError`] is what the
//! engine surfaces to callers of `handle`.

use std::time::Duration;

use chatsync_proto::ProtocolError;
use thiserror::Error;

/// Errors raised while configuring the connection manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Endpoint is not a valid absolute URL
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured
        endpoint: String,
        /// Parser message
        reason: String,
    },

    /// Endpoint scheme is not `ws` or `wss`
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// Heartbeat interval of zero would fire on every tick
    #[error("heartbeat interval must be non-zero (got {0:?})")]
    ZeroHeartbeat(Duration),
}

/// Errors raised while building an outbound command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Content is empty after trimming whitespace
    #[error("message content is empty")]
    EmptyContent,

    /// Username is empty after trimming whitespace
    #[error("username is empty")]
    EmptyUsername,

    /// Username or password missing from a sign-in
    #[error("username and password are required")]
    MissingCredentials,

    /// Frame could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<ProtocolError> for CommandError {
    fn from(err: ProtocolError) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Failure reported by an event handler.
///
/// Handler failures never propagate past the dispatcher; they are logged
/// and the remaining handlers still run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Wraps a message describing the failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by the collaborator API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Credential was rejected (401/403)
    #[error("credential rejected")]
    Unauthorized,

    /// Non-success status other than an auth rejection
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns true if the credential must be discarded.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }
}

/// Errors surfaced by the sync engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connection configuration was rejected
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Outbound command could not be built
    #[error("command error: {0}")]
    Command(#[from] CommandError),
}
