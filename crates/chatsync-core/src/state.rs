//! Reconciled client state and its read-only snapshot.

use chatsync_proto::{Friend, Message, Room, RoomId, UserId};

use crate::{
    connection::ConnectionPhase, messages::MessageStreamReconciler, presence::PresenceTracker,
    rooms::RoomReconciler,
};

/// State mutated by event handlers.
///
/// Each part is owned by its reconciler; handlers receive the whole value so
/// that one event can update several parts in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Room list and unread counters
    pub rooms: RoomReconciler,
    /// Messages of the open room
    pub messages: MessageStreamReconciler,
    /// Friend list and presence
    pub presence: PresenceTracker,
    /// Who signed in with a password, if anyone
    pub account: Option<Account>,
}

/// Identity returned by a password sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// User identifier
    pub user_id: UserId,
    /// Username
    pub username: String,
}

impl SyncState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the parts presentation needs.
    pub fn snapshot(&self, phase: ConnectionPhase) -> SyncSnapshot {
        SyncSnapshot {
            phase,
            rooms: self.rooms.rooms().to_vec(),
            active_room: self.rooms.active(),
            messages: self.messages.messages().to_vec(),
            loading_history: self.messages.is_loading(),
            friends: self.presence.sorted().into_iter().cloned().collect(),
            account: self.account.clone(),
        }
    }
}

/// Immutable view of the state, published to readers after each change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    /// Connection phase
    pub phase: ConnectionPhase,
    /// Rooms, most recently active first
    pub rooms: Vec<Room>,
    /// Room open in the message view
    pub active_room: Option<RoomId>,
    /// Messages of the open room, ascending by id
    pub messages: Vec<Message>,
    /// History for the open room is still loading
    pub loading_history: bool,
    /// Friends, online first
    pub friends: Vec<Friend>,
    /// Signed-in identity; unknown when the token came from elsewhere
    pub account: Option<Account>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        SyncState::new().snapshot(ConnectionPhase::Disconnected)
    }
}

impl SyncSnapshot {
    /// Look up a room.
    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == room_id)
    }

    /// Sum of unread counters across rooms.
    pub fn total_unread(&self) -> u64 {
        self.rooms.iter().map(|room| u64::from(room.unread_count)).sum()
    }
}
