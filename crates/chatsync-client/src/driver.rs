//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from specific I/O
//! implementations. Production uses [`TokioDriver`](crate::TokioDriver) with
//! a real websocket and HTTP client; the harness supplies a scripted driver
//! so the same [`Runtime`](crate::Runtime) runs under simulation.

use std::{future::Future, time::Duration};

use chatsync_core::{SyncAction, SyncEvent, SyncSnapshot};
use chatsync_proto::{LoginRequest, RoomId, UserId};

/// What the driver produced while the runtime waited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// An event for the engine.
    Event(SyncEvent),
    /// The wait elapsed without an event; timers are due.
    Timeout,
    /// The application asked to stop, or every intent sender is gone.
    Shutdown,
}

/// A collaborator API request the driver performs in the background.
///
/// The result must come back through [`Driver::next_input`] as the matching
/// `SyncEvent` (`RoomsLoaded`, `HistoryLoaded`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// `GET /chatrooms`
    Rooms,
    /// `GET /chatrooms/{id}/messages`
    History {
        /// Room to fetch.
        room_id: RoomId,
    },
    /// `GET /friends`
    Friends,
    /// `POST /chatrooms` with one other member
    OpenDirectRoom {
        /// Friend to talk to.
        friend_id: UserId,
    },
    /// `POST /users/login`
    LogIn(LoginRequest),
    /// `POST /friends`
    AddFriend {
        /// Username to befriend.
        username: String,
    },
}

impl ApiRequest {
    /// The request an engine action asks for, if it is an API action.
    pub fn from_action(action: &SyncAction) -> Option<Self> {
        match action {
            SyncAction::FetchRooms => Some(Self::Rooms),
            SyncAction::FetchHistory { room_id } => Some(Self::History { room_id: *room_id }),
            SyncAction::FetchFriends => Some(Self::Friends),
            SyncAction::OpenDirectRoom { friend_id } => Some(Self::OpenDirectRoom { friend_id: *friend_id }),
            SyncAction::LogIn(request) => Some(Self::LogIn(request.clone())),
            SyncAction::AddFriend { username } => Some(Self::AddFriend { username: username.clone() }),
            _ => None,
        }
    }
}

/// Abstracts I/O operations for the runtime.
///
/// Transport methods are tagged with the generation the engine assigned, so
/// the driver can keep several transports apart while an old one winds down.
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Wait for the next input, for at most `timeout` (`None` = no limit).
    fn next_input(
        &mut self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Input, Self::Error>> + Send;

    /// Start establishing transport `generation` to `url`.
    ///
    /// Completion is reported later as `TransportOpened`, `TransportClosed`
    /// or `TransportFailed`.
    fn open_transport(
        &mut self,
        generation: u64,
        url: String,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Write a text frame on transport `generation`.
    fn send_frame(
        &mut self,
        generation: u64,
        text: String,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Tear down transport `generation`. No further notifications are needed.
    fn close_transport(&mut self, generation: u64) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Start an API request in the background.
    fn request(&mut self, request: ApiRequest) -> Result<(), Self::Error>;

    /// Store a credential obtained by signing in.
    fn store_credential(&mut self, token: String);

    /// Discard the stored credential.
    fn clear_credential(&mut self);

    /// Make the latest state visible to readers.
    fn publish(&mut self, snapshot: SyncSnapshot);

    /// Stop every background task and release resources.
    fn stop(&mut self);
}
