//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a reader of the client could observe at one point
//! in time. Invariants operate on snapshots rather than live state so every
//! check sees one consistent view.

use chatsync_core::{ConnectionPhase, SyncSnapshot};
use chatsync_proto::{MessageId, RoomId};

/// Snapshot of the client's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSnapshot {
    /// Connection phase.
    pub phase: ConnectionPhase,
    /// Room list in display order.
    pub rooms: Vec<RoomSnapshot>,
    /// Room open in the message view.
    pub active_room: Option<RoomId>,
    /// Messages of the open room in display order.
    pub messages: Vec<MessageSnapshot>,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl SystemSnapshot {
    /// Disconnected client with nothing loaded.
    pub fn empty() -> Self {
        Self { phase: ConnectionPhase::Disconnected, rooms: Vec::new(), active_room: None, messages: Vec::new() }
    }

    /// Extract the observable parts of a published snapshot.
    pub fn from_sync(snapshot: &SyncSnapshot) -> Self {
        Self {
            phase: snapshot.phase,
            rooms: snapshot.rooms.iter().map(|room| RoomSnapshot::new(room.id, room.unread_count)).collect(),
            active_room: snapshot.active_room,
            messages: snapshot
                .messages
                .iter()
                .map(|message| MessageSnapshot::new(message.id, message.unread_count))
                .collect(),
        }
    }

    /// Set the active room.
    #[must_use]
    pub fn with_active_room(mut self, room_id: Option<RoomId>) -> Self {
        self.active_room = room_id;
        self
    }

    /// Append a room.
    #[must_use]
    pub fn with_room(mut self, room_id: RoomId, unread: u32) -> Self {
        self.rooms.push(RoomSnapshot::new(room_id, unread));
        self
    }

    /// Append messages with no unread members.
    #[must_use]
    pub fn with_messages(mut self, ids: impl IntoIterator<Item = MessageId>) -> Self {
        self.messages.extend(ids.into_iter().map(|id| MessageSnapshot::new(id, 0)));
        self
    }

    /// Room by id.
    pub fn room(&self, room_id: RoomId) -> Option<&RoomSnapshot> {
        self.rooms.iter().find(|room| room.id == room_id)
    }
}

/// Observable state of one room in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Room id.
    pub id: RoomId,
    /// Unread counter shown next to the room.
    pub unread: u32,
}

impl RoomSnapshot {
    /// Room with the given counter.
    pub fn new(id: RoomId, unread: u32) -> Self {
        Self { id, unread }
    }
}

/// Observable state of one message in the open room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Message id.
    pub id: MessageId,
    /// Members that have not read it.
    pub unread: u32,
}

impl MessageSnapshot {
    /// Message with the given counter.
    pub fn new(id: MessageId, unread: u32) -> Self {
        Self { id, unread }
    }
}
