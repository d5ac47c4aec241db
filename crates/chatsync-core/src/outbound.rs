//! Outbound command encoding.
//!
//! Builds the text frames the client sends. Message content is trimmed and
//! rejected when nothing is left, so an empty message never reaches the wire.

use chatsync_proto::{OutboundCommand, RoomId};

use crate::error::CommandError;

/// Build a `message.send` command. Content is trimmed.
///
/// # Errors
///
/// - `CommandError::EmptyContent` if the content is empty after trimming
pub fn send_message(room_id: RoomId, content: &str) -> Result<OutboundCommand, CommandError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CommandError::EmptyContent);
    }
    Ok(OutboundCommand::SendMessage { room_id, content: content.to_string() })
}

/// Encode a `message.send` frame.
///
/// # Errors
///
/// - `CommandError::EmptyContent` if the content is empty after trimming
/// - `CommandError::Encode` if serialization fails
pub fn encode_send_message(room_id: RoomId, content: &str) -> Result<String, CommandError> {
    Ok(send_message(room_id, content)?.encode()?)
}

/// Encode a `message.read` frame.
///
/// # Errors
///
/// - `CommandError::Encode` if serialization fails
pub fn encode_mark_read(room_id: RoomId) -> Result<String, CommandError> {
    Ok(OutboundCommand::MarkRead { room_id }.encode()?)
}

/// Encode a `heartbeat` frame.
///
/// # Errors
///
/// - `CommandError::Encode` if serialization fails
pub fn encode_heartbeat() -> Result<String, CommandError> {
    Ok(OutboundCommand::Heartbeat.encode()?)
}
