//! HTTP implementation of the collaborator API.
//!
//! Every request except the sign-in carries the current token from the
//! [`CredentialStore`] as a bearer header. A 401 or 403 maps to
//! [`ApiError::Unauthorized`]; the engine reacts by expiring the session.

use std::time::Duration;

use async_trait::async_trait;
use chatsync_core::{ApiError, ChatApi, CredentialStore};
use chatsync_proto::{
    AddFriendRequest, CreateRoomRequest, Friend, LoginRequest, LoginResponse, Message, Room, RoomId, UserId,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::RuntimeError;

/// Longest error body kept in [`ApiError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed [`ChatApi`].
#[derive(Debug, Clone)]
pub struct HttpApi<C> {
    client: reqwest::Client,
    base: Url,
    credentials: C,
}

impl<C: CredentialStore> HttpApi<C> {
    /// Client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Config` if the URL is not an absolute http(s) URL or
    ///   the HTTP client cannot be built
    pub fn new(base_url: &str, credentials: C, timeout: Duration) -> Result<Self, RuntimeError> {
        let mut base = Url::parse(base_url)
            .map_err(|err| RuntimeError::Config(format!("api base {base_url:?}: {err}")))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(RuntimeError::Config(format!("api base must be http(s): {base_url}")));
        }

        // Relative joins replace the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RuntimeError::Config(err.to_string()))?;

        Ok(Self { client, base, credentials })
    }

    /// Base URL requests are resolved against.
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|err| ApiError::Transport(err.to_string()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let response = send(self.authorize(self.client.get(url))).await?;
        decode(response).await
    }

    async fn post<B: serde::Serialize + Sync>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");
        send(self.authorize(self.client.post(url).json(body))).await
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request.send().await.map_err(|err| ApiError::Transport(err.to_string()))?;
    let status = response.status();

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(ApiError::Unauthorized);
    }

    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
        }
        return Err(ApiError::Status { status: status.as_u16(), body });
    }

    Ok(response)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response.json::<T>().await.map_err(|err| ApiError::Decode(err.to_string()))
}

#[async_trait]
impl<C: CredentialStore> ChatApi for HttpApi<C> {
    async fn fetch_rooms(&self) -> Result<Vec<Room>, ApiError> {
        self.get("chatrooms").await
    }

    async fn fetch_messages(&self, room_id: RoomId) -> Result<Vec<Message>, ApiError> {
        self.get(&format!("chatrooms/{room_id}/messages")).await
    }

    async fn fetch_friends(&self) -> Result<Vec<Friend>, ApiError> {
        self.get("friends").await
    }

    async fn open_direct_room(&self, friend_id: UserId) -> Result<Room, ApiError> {
        let response = self.post("chatrooms", &CreateRoomRequest { user_ids: vec![friend_id] }).await?;
        decode(response).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let url = self.endpoint("users/login")?;
        debug!(%url, username = %request.username, "POST");
        // No bearer header on sign-in.
        let response = send(self.client.post(url).json(request)).await?;
        decode(response).await
    }

    async fn add_friend(&self, username: &str) -> Result<(), ApiError> {
        self.post("friends", &AddFriendRequest { username: username.to_string() }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chatsync_core::SharedCredentials;

    use super::*;

    #[test]
    fn base_gets_trailing_slash() {
        let api = HttpApi::new("http://host:8080/api", SharedCredentials::default(), Duration::from_secs(1))
            .unwrap();

        assert_eq!(api.base().as_str(), "http://host:8080/api/");
        assert_eq!(api.endpoint("chatrooms/4/messages").unwrap().as_str(), "http://host:8080/api/chatrooms/4/messages");
    }

    #[test]
    fn rejects_non_http_base() {
        let err = HttpApi::new("ws://host/api", SharedCredentials::default(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
