//! Protocol errors.

use thiserror::Error;

use crate::FrameKind;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match the envelope shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame `type` is not one this client understands.
    #[error("unsupported frame kind")]
    UnsupportedKind,

    /// A field the frame kind requires was absent.
    #[error("{kind} frame missing required field `{field}`")]
    MissingField {
        /// Kind of the offending frame.
        kind: FrameKind,
        /// Wire name of the absent field.
        field: &'static str,
    },

    /// An outbound-only kind arrived from the server.
    #[error("{0} is not an inbound frame kind")]
    NotInbound(FrameKind),
}

impl ProtocolError {
    /// Returns true if the frame was structurally valid JSON but semantically
    /// unusable. Callers log these at a lower level than parse failures.
    pub fn is_semantic(&self) -> bool {
        !matches!(self, Self::Json(_))
    }
}
