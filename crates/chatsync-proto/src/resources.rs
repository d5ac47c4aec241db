//! Request/response API resources.
//!
//! These mirror the collaborator API's JSON bodies. Timestamps are the
//! server's local time without an offset, so they deserialize as
//! [`NaiveDateTime`].

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId, UserId};

/// Whether a room is a one-to-one conversation or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomKind {
    /// Exactly two members.
    Direct,
    /// Any number of members.
    Group,
}

/// Chat room summary as listed by `GET /chatrooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Direct or group.
    #[serde(rename = "type")]
    pub kind: RoomKind,
    /// Member display names.
    #[serde(default)]
    pub members: Vec<String>,
    /// Messages this client has not read.
    #[serde(default)]
    pub unread_count: u32,
    /// Creation time.
    pub created_at: NaiveDateTime,
}

/// Message as listed by `GET /chatrooms/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier, ascending within a room.
    pub id: MessageId,
    /// Author. `None` for system messages.
    #[serde(default)]
    pub sender_id: Option<UserId>,
    /// Author display name. `None` for system messages.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Message text. `None` once deleted.
    #[serde(default)]
    pub content: Option<String>,
    /// Members that have not yet seen the message.
    #[serde(default)]
    pub unread_count: u32,
    /// Content was edited after posting.
    #[serde(default)]
    pub edited: bool,
    /// Message was deleted; content is withheld.
    #[serde(default)]
    pub deleted: bool,
    /// Creation time (server time for history, receipt time for live pushes).
    pub created_at: NaiveDateTime,
}

/// Friend as listed by `GET /friends`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    /// User identifier.
    pub id: UserId,
    /// Username.
    pub username: String,
    /// Currently connected.
    #[serde(default)]
    pub online: bool,
}

/// Body of `POST /chatrooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Users to place in the room alongside the caller.
    pub user_ids: Vec<UserId>,
}

/// Body of `POST /users/login`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Plain-text password; never logged.
    pub password: String,
}

impl LoginRequest {
    /// Credentials for `username`.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest").field("username", &self.username).finish_non_exhaustive()
    }
}

/// Response of `POST /users/login`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Session token for the bearer header and the realtime endpoint.
    pub token: String,
    /// Signed-in user.
    pub user_id: UserId,
    /// Signed-in username.
    pub username: String,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Body of `POST /friends`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFriendRequest {
    /// Username of the user to befriend.
    pub username: String,
}
