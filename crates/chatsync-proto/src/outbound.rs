//! Client → server commands.

use crate::{FrameKind, RoomId, WireFrame, errors::Result};

/// Intent the client submits over the realtime connection.
///
/// Validation (non-empty content) happens before a command is built; this type
/// only knows how to lower itself onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Post `content` to a room.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message text.
        content: String,
    },
    /// Mark every message in a room as read by this client.
    MarkRead {
        /// Room that was read.
        room_id: RoomId,
    },
    /// Keepalive.
    Heartbeat,
}

impl OutboundCommand {
    /// Frame discriminator of this command.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::SendMessage { .. } => FrameKind::MessageSend,
            Self::MarkRead { .. } => FrameKind::MessageRead,
            Self::Heartbeat => FrameKind::Heartbeat,
        }
    }

    /// Lower the command into its wire envelope.
    pub fn to_wire(&self) -> WireFrame {
        let mut frame = WireFrame::new(self.kind());
        match self {
            Self::SendMessage { room_id, content } => {
                frame.chat_room_id = Some(*room_id);
                frame.content = Some(content.clone());
            },
            Self::MarkRead { room_id } => frame.chat_room_id = Some(*room_id),
            Self::Heartbeat => {},
        }
        frame
    }

    /// Serialize the command to JSON text.
    pub fn encode(&self) -> Result<String> {
        self.to_wire().encode()
    }
}
