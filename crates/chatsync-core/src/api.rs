//! Collaborator seams: the request/response API and the credential store.
//!
//! The engine never calls these directly. It emits fetch actions; the
//! runtime performs them through a [`ChatApi`] and feeds the results back
//! as events. Keeping them behind traits lets the harness substitute
//! in-memory fakes.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chatsync_proto::{Friend, LoginRequest, LoginResponse, Message, Room, RoomId, UserId};

use crate::error::{ApiError, CommandError};

/// Request/response API used for sign-in, initial loads and room creation.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /chatrooms`
    async fn fetch_rooms(&self) -> Result<Vec<Room>, ApiError>;

    /// `GET /chatrooms/{id}/messages`
    async fn fetch_messages(&self, room_id: RoomId) -> Result<Vec<Message>, ApiError>;

    /// `GET /friends`
    async fn fetch_friends(&self) -> Result<Vec<Friend>, ApiError>;

    /// `POST /chatrooms` with a single other member; returns the room
    /// (existing or newly created).
    async fn open_direct_room(&self, friend_id: UserId) -> Result<Room, ApiError>;

    /// `POST /users/login`; exchanges a username and password for a token.
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;

    /// `POST /friends` with the username to befriend. The response has no body.
    async fn add_friend(&self, username: &str) -> Result<(), ApiError>;
}

/// Username to send to `POST /friends`, trimmed.
///
/// # Errors
///
/// - `CommandError::EmptyUsername` if nothing is left after trimming
pub fn friend_username(raw: &str) -> Result<&str, CommandError> {
    let username = raw.trim();
    if username.is_empty() { Err(CommandError::EmptyUsername) } else { Ok(username) }
}

/// Where the session token lives.
pub trait CredentialStore: Send + Sync {
    /// Current token, if signed in.
    fn token(&self) -> Option<String>;

    /// Store a new token.
    fn set(&self, token: String);

    /// Discard the token (session expired or signed out).
    fn clear(&self);
}

/// In-memory credential store shared between the runtime and API client.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedCredentials {
    /// Store holding `token`.
    pub fn new(token: Option<String>) -> Self {
        Self { inner: Arc::new(RwLock::new(token)) }
    }
}

impl CredentialStore for SharedCredentials {
    fn token(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, token: String) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
