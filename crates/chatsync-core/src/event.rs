//! Sync engine events and actions.

use chatsync_proto::{Friend, LoginRequest, LoginResponse, Message, Room, RoomId, UserId};

use crate::{
    connection::{CloseReason, ConnectionPhase},
    error::ApiError,
};

/// Events the caller feeds into the engine.
///
/// The caller is responsible for:
/// - Reporting transport lifecycle and received frames
/// - Delivering results of API requests the engine asked for
/// - Driving time forward via ticks
/// - Forwarding application intents (open room, send message, etc.)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Load the initial state and connect.
    Start,

    /// Time tick for timer processing.
    ///
    /// The caller should tick whenever `time_until_next_timer` elapses.
    Tick,

    /// Transport of `generation` finished its handshake.
    TransportOpened {
        /// Attempt the transport belongs to.
        generation: u64,
    },

    /// Transport of `generation` closed.
    TransportClosed {
        /// Attempt the transport belongs to.
        generation: u64,
        /// Why it closed.
        reason: CloseReason,
    },

    /// Transport of `generation` reported an error.
    TransportFailed {
        /// Attempt the transport belongs to.
        generation: u64,
        /// Error description.
        error: String,
    },

    /// Text frame received on transport `generation`.
    FrameReceived {
        /// Attempt the transport belongs to.
        generation: u64,
        /// Raw frame text.
        text: String,
    },

    /// Result of a room list fetch.
    RoomsLoaded(Result<Vec<Room>, ApiError>),

    /// Result of a history fetch.
    HistoryLoaded {
        /// Room the history was requested for.
        room_id: RoomId,
        /// Fetched messages.
        result: Result<Vec<Message>, ApiError>,
    },

    /// Result of a friend list fetch.
    FriendsLoaded(Result<Vec<Friend>, ApiError>),

    /// Result of opening a direct room with a friend.
    DirectRoomOpened(Result<Room, ApiError>),

    /// Result of a sign-in with username and password.
    LoggedIn(Result<LoginResponse, ApiError>),

    /// Result of adding a friend.
    FriendAdded(Result<(), ApiError>),

    /// Application wants to sign in with a username and password.
    LogIn(LoginRequest),

    /// Application wants to add a friend by username.
    AddFriend {
        /// Username to befriend (trimmed before sending).
        username: String,
    },

    /// Application opened a room.
    OpenRoom {
        /// Room to open.
        room_id: RoomId,
    },

    /// Application closed the open room.
    CloseRoom,

    /// Application wants a direct room with a friend.
    OpenDirectRoom {
        /// Friend to talk to.
        friend_id: UserId,
    },

    /// Application wants to send a message.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message text (trimmed before sending).
        content: String,
    },

    /// The session token changed (`None` = signed out).
    CredentialChanged(Option<String>),

    /// Tear everything down.
    Shutdown,
}

/// Actions the engine produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Establish a transport to `url`.
    OpenTransport {
        /// Attempt this transport belongs to.
        generation: u64,
        /// Endpoint with the token attached.
        url: String,
    },

    /// Tear down transport `generation`.
    CloseTransport {
        /// Attempt the transport belongs to.
        generation: u64,
        /// Why it is being closed.
        reason: CloseReason,
    },

    /// Write a text frame on transport `generation`.
    SendFrame {
        /// Attempt the transport belongs to.
        generation: u64,
        /// Encoded frame.
        text: String,
    },

    /// Fetch the room list and report back with `RoomsLoaded`.
    FetchRooms,

    /// Fetch history and report back with `HistoryLoaded`.
    FetchHistory {
        /// Room to fetch.
        room_id: RoomId,
    },

    /// Fetch the friend list and report back with `FriendsLoaded`.
    FetchFriends,

    /// Create (or find) a direct room and report back with `DirectRoomOpened`.
    OpenDirectRoom {
        /// Friend to talk to.
        friend_id: UserId,
    },

    /// Exchange credentials for a token and report back with `LoggedIn`.
    LogIn(LoginRequest),

    /// Add a friend and report back with `FriendAdded`.
    AddFriend {
        /// Trimmed username.
        username: String,
    },

    /// A sign-in produced a new token; store it before issuing further requests.
    StoreCredential(String),

    /// Connection phase changed.
    PhaseChanged(ConnectionPhase),

    /// The API rejected the credential; it must be discarded.
    SessionExpired,
}

impl SyncAction {
    /// Returns true for actions that perform a collaborator API request.
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            Self::FetchRooms
                | Self::FetchHistory { .. }
                | Self::FetchFriends
                | Self::OpenDirectRoom { .. }
                | Self::LogIn(_)
                | Self::AddFriend { .. }
        )
    }
}
