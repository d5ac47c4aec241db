//! JSON frame envelope.
//!
//! Every realtime frame, in either direction, shares one flat shape: a `type`
//! discriminator plus optional fields. Which fields are meaningful depends on
//! the kind; [`crate::InboundEvent`] and [`crate::OutboundCommand`] enforce
//! that. Absent fields are omitted on encode and unknown fields are ignored on
//! decode, so newer servers can add fields without breaking older clients.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId, UserId, errors::Result};

/// Frame discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Client → server: post a message to a room.
    #[serde(rename = "message.send")]
    MessageSend,
    /// Client → server: mark a room read up to the latest message.
    #[serde(rename = "message.read")]
    MessageRead,
    /// Server → client: a message was posted to a room.
    #[serde(rename = "message.received")]
    MessageReceived,
    /// Server → client: per-message metadata changed.
    #[serde(rename = "message.updated")]
    MessageUpdated,
    /// Client → server: keepalive.
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Server → client: a friend went online or offline.
    #[serde(rename = "user.status")]
    UserStatus,
    /// Server → client: another member read a room up to a message.
    #[serde(rename = "messages.read")]
    MessagesRead,
    /// Any kind this client does not know.
    #[serde(other)]
    Unknown,
}

impl FrameKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageSend => "message.send",
            Self::MessageRead => "message.read",
            Self::MessageReceived => "message.received",
            Self::MessageUpdated => "message.updated",
            Self::Heartbeat => "heartbeat",
            Self::UserStatus => "user.status",
            Self::MessagesRead => "messages.read",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped frame envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    /// Frame discriminator.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Room the frame refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<RoomId>,
    /// Sender (or reader, or status subject) user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Sender display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Message the frame refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Number of members that have not yet seen the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    /// Presence flag for `user.status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

impl WireFrame {
    /// Empty frame of the given kind.
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            chat_room_id: None,
            sender_id: None,
            sender_name: None,
            content: None,
            message_id: None,
            unread_count: None,
            online: None,
        }
    }

    /// Parse a frame from its JSON text.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the frame to JSON text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
