//! Message stream of the open room.
//!
//! Holds the messages of at most one room, ordered by ascending id with no
//! duplicates. Realtime events for other rooms are ignored. History arrives
//! asynchronously after the room is opened; live messages that arrive in the
//! meantime are merged with it rather than overwritten.

use chatsync_proto::{Message, MessageId, MessageReceived, MessageUpdated, MessagesRead, RoomId};
use chrono::NaiveDateTime;
use tracing::{debug, trace};

/// Outcome of applying a `message.received` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChange {
    /// Appended after every existing message
    Appended,
    /// Inserted before a message with a higher id
    Inserted,
    /// Id already present; ignored
    Duplicate,
    /// Event is for a room that is not open; ignored
    OtherRoom,
}

/// Ordered message list for the open room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStreamReconciler {
    room_id: Option<RoomId>,
    /// Ascending by id, no duplicates
    messages: Vec<Message>,
    /// History for `room_id` requested and not yet applied
    history_pending: bool,
}

impl MessageStreamReconciler {
    /// Create a reconciler with no room open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Room currently open.
    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    /// Messages, ascending by id.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns true while history for the open room is outstanding.
    pub fn is_loading(&self) -> bool {
        self.history_pending
    }

    /// Highest message id held.
    pub fn last_id(&self) -> Option<MessageId> {
        self.messages.last().map(|message| message.id)
    }

    /// Switch to `room_id`, discarding the previous room's messages.
    ///
    /// History is marked as pending; the caller fetches it.
    pub fn open(&mut self, room_id: RoomId) {
        self.room_id = Some(room_id);
        self.messages.clear();
        self.history_pending = true;
    }

    /// Mark history as pending again for the open room without discarding
    /// what is held (used after a reconnect).
    pub fn begin_resync(&mut self) -> Option<RoomId> {
        let room_id = self.room_id?;
        self.history_pending = true;
        Some(room_id)
    }

    /// Close the open room.
    pub fn close(&mut self) {
        self.room_id = None;
        self.messages.clear();
        self.history_pending = false;
    }

    /// Apply fetched history for `room_id`.
    ///
    /// History for a room that is no longer open is discarded and false is
    /// returned. Otherwise history is merged with messages received live
    /// since the room was opened; where both hold the same id, the history
    /// entry wins.
    pub fn apply_history(&mut self, room_id: RoomId, history: Vec<Message>) -> bool {
        if self.room_id != Some(room_id) {
            debug!(room_id, open = ?self.room_id, "discarding history for closed room");
            return false;
        }

        let live = std::mem::take(&mut self.messages);
        let mut merged = history;
        merged.extend(live);
        // Stable sort keeps history ahead of live copies with the same id.
        merged.sort_by_key(|message| message.id);
        merged.dedup_by_key(|message| message.id);

        self.messages = merged;
        self.history_pending = false;
        debug!(room_id, messages = self.messages.len(), "history applied");
        true
    }

    /// History fetch for `room_id` failed. Live messages are kept.
    pub fn history_failed(&mut self, room_id: RoomId) {
        if self.room_id == Some(room_id) {
            self.history_pending = false;
        }
    }

    /// Apply a `message.received`.
    pub fn apply_received(&mut self, event: &MessageReceived, received_at: NaiveDateTime) -> StreamChange {
        if self.room_id != Some(event.room_id) {
            return StreamChange::OtherRoom;
        }

        let position = match self.messages.binary_search_by_key(&event.message_id, |m| m.id) {
            Ok(_) => {
                trace!(message_id = event.message_id, "duplicate message ignored");
                return StreamChange::Duplicate;
            },
            Err(position) => position,
        };

        let message = Message {
            id: event.message_id,
            sender_id: event.sender_id,
            sender_name: event.sender_name.clone(),
            content: Some(event.content.clone()),
            unread_count: event.unread_count.unwrap_or(0),
            edited: false,
            deleted: false,
            created_at: received_at,
        };

        let change = if position == self.messages.len() {
            StreamChange::Appended
        } else {
            StreamChange::Inserted
        };
        self.messages.insert(position, message);
        change
    }

    /// Apply a `message.updated`: only the unread count is replaced.
    ///
    /// Returns false if the room is not open, the message is unknown, or the
    /// update carries no count.
    pub fn apply_updated(&mut self, event: &MessageUpdated) -> bool {
        if self.room_id != Some(event.room_id) {
            return false;
        }
        let Some(unread) = event.unread_count else {
            return false;
        };
        match self.find_mut(event.message_id) {
            Some(message) => {
                message.unread_count = unread;
                true
            },
            None => false,
        }
    }

    /// Apply a `messages.read` receipt up to and including its message id.
    ///
    /// Every held message with id ≤ the receipt's id has its unread count
    /// decremented by one, never below zero. Returns how many messages were
    /// touched. Receipts without a message id touch nothing.
    pub fn apply_read(&mut self, event: &MessagesRead) -> usize {
        if self.room_id != Some(event.room_id) {
            return 0;
        }
        let Some(up_to) = event.message_id else {
            return 0;
        };

        let end = self.messages.partition_point(|message| message.id <= up_to);
        for message in &mut self.messages[..end] {
            message.unread_count = message.unread_count.saturating_sub(1);
        }
        end
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        let index = self.messages.binary_search_by_key(&id, |m| m.id).ok()?;
        self.messages.get_mut(index)
    }
}
