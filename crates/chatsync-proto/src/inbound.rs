//! Typed server-pushed events.
//!
//! [`InboundEvent::decode`] lifts a [`WireFrame`] into a typed event, checking
//! that the fields each kind depends on are present. A frame that fails this
//! check is malformed; the dispatcher drops it.

use crate::{
    FrameKind, MessageId, RoomId, UserId, WireFrame,
    errors::{ProtocolError, Result},
};

/// Routing key for dispatch. One per inbound frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `message.received`
    MessageReceived,
    /// `message.updated`
    MessageUpdated,
    /// `messages.read`
    MessagesRead,
    /// `user.status`
    UserStatus,
}

impl EventKind {
    /// All inbound kinds, in wire-schema order.
    pub const ALL: [Self; 4] =
        [Self::MessageReceived, Self::MessageUpdated, Self::MessagesRead, Self::UserStatus];

    /// Frame discriminator for this event kind.
    pub fn frame_kind(self) -> FrameKind {
        match self {
            Self::MessageReceived => FrameKind::MessageReceived,
            Self::MessageUpdated => FrameKind::MessageUpdated,
            Self::MessagesRead => FrameKind::MessagesRead,
            Self::UserStatus => FrameKind::UserStatus,
        }
    }
}

/// A message was posted to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceived {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Server-assigned message id.
    pub message_id: MessageId,
    /// Author. `None` for system messages (joins, leaves).
    pub sender_id: Option<UserId>,
    /// Author display name. `None` for system messages.
    pub sender_name: Option<String>,
    /// Message text. Empty if the server sent none.
    pub content: String,
    /// Members that have not yet seen the message.
    pub unread_count: Option<u32>,
}

/// Metadata of an existing message changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdated {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Message that changed.
    pub message_id: MessageId,
    /// New unseen-by count, when the update carries one.
    pub unread_count: Option<u32>,
}

/// Another member read a room up to (and including) a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesRead {
    /// Room that was read.
    pub room_id: RoomId,
    /// Member who read it.
    pub reader_id: Option<UserId>,
    /// Last message covered by the receipt. `None` if the room was empty.
    pub message_id: Option<MessageId>,
}

/// A friend's presence changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatus {
    /// User whose presence changed.
    pub user_id: UserId,
    /// Username, when provided.
    pub username: Option<String>,
    /// New presence. Absent on the wire means offline.
    pub online: bool,
}

/// Parsed, immutable inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `message.received`
    MessageReceived(MessageReceived),
    /// `message.updated`
    MessageUpdated(MessageUpdated),
    /// `messages.read`
    MessagesRead(MessagesRead),
    /// `user.status`
    UserStatus(UserStatus),
}

impl InboundEvent {
    /// Parse JSON text into a typed event.
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_wire(WireFrame::decode(text)?)
    }

    /// Lift an envelope into a typed event.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnsupportedKind` for kinds this client does not know
    /// - `ProtocolError::NotInbound` for client → server kinds
    /// - `ProtocolError::MissingField` if a required field is absent
    pub fn from_wire(frame: WireFrame) -> Result<Self> {
        let kind = frame.kind;
        let require = |value: Option<u64>, field: &'static str| {
            value.ok_or(ProtocolError::MissingField { kind, field })
        };

        match kind {
            FrameKind::MessageReceived => Ok(Self::MessageReceived(MessageReceived {
                room_id: require(frame.chat_room_id, "chatRoomId")?,
                message_id: require(frame.message_id, "messageId")?,
                sender_id: frame.sender_id,
                sender_name: frame.sender_name,
                content: frame.content.unwrap_or_default(),
                unread_count: frame.unread_count,
            })),
            FrameKind::MessageUpdated => Ok(Self::MessageUpdated(MessageUpdated {
                room_id: require(frame.chat_room_id, "chatRoomId")?,
                message_id: require(frame.message_id, "messageId")?,
                unread_count: frame.unread_count,
            })),
            FrameKind::MessagesRead => Ok(Self::MessagesRead(MessagesRead {
                room_id: require(frame.chat_room_id, "chatRoomId")?,
                reader_id: frame.sender_id,
                message_id: frame.message_id,
            })),
            FrameKind::UserStatus => Ok(Self::UserStatus(UserStatus {
                user_id: require(frame.sender_id, "senderId")?,
                username: frame.sender_name,
                online: frame.online.unwrap_or(false),
            })),
            FrameKind::MessageSend | FrameKind::MessageRead | FrameKind::Heartbeat => {
                Err(ProtocolError::NotInbound(kind))
            },
            FrameKind::Unknown => Err(ProtocolError::UnsupportedKind),
        }
    }

    /// Routing key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::MessageUpdated(_) => EventKind::MessageUpdated,
            Self::MessagesRead(_) => EventKind::MessagesRead,
            Self::UserStatus(_) => EventKind::UserStatus,
        }
    }

    /// Room the event is scoped to. `None` for presence events.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::MessageReceived(e) => Some(e.room_id),
            Self::MessageUpdated(e) => Some(e.room_id),
            Self::MessagesRead(e) => Some(e.room_id),
            Self::UserStatus(_) => None,
        }
    }

    /// Lower the event back into its wire envelope.
    pub fn to_wire(&self) -> WireFrame {
        let mut frame = WireFrame::new(self.kind().frame_kind());
        match self {
            Self::MessageReceived(e) => {
                frame.chat_room_id = Some(e.room_id);
                frame.message_id = Some(e.message_id);
                frame.sender_id = e.sender_id;
                frame.sender_name.clone_from(&e.sender_name);
                frame.content = Some(e.content.clone());
                frame.unread_count = e.unread_count;
            },
            Self::MessageUpdated(e) => {
                frame.chat_room_id = Some(e.room_id);
                frame.message_id = Some(e.message_id);
                frame.unread_count = e.unread_count;
            },
            Self::MessagesRead(e) => {
                frame.chat_room_id = Some(e.room_id);
                frame.sender_id = e.reader_id;
                frame.message_id = e.message_id;
            },
            Self::UserStatus(e) => {
                frame.sender_id = Some(e.user_id);
                frame.sender_name.clone_from(&e.username);
                frame.online = Some(e.online);
            },
        }
        frame
    }

    /// Serialize the event to JSON text, as a server would push it.
    pub fn encode(&self) -> Result<String> {
        self.to_wire().encode()
    }
}
