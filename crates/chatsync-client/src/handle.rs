//! Application-facing handle to a running client.
//!
//! [`spawn_client`] builds the engine, the tokio driver and the HTTP API,
//! and runs the [`Runtime`] on its own task. The returned [`ClientHandle`]
//! forwards intents to that task and exposes the published snapshots.

use std::sync::Arc;

use chatsync_core::{
    ChatApi, CommandError, CredentialStore, SharedCredentials, SyncEngine, SyncEvent, SyncSnapshot,
    api::friend_username, outbound,
};
use chatsync_proto::{LoginRequest, RoomId, UserId};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::info;

use crate::{
    config::ClientConfig,
    driver::Input,
    env::SystemEnv,
    error::RuntimeError,
    http::HttpApi,
    runtime::Runtime,
    tokio_driver::TokioDriver,
};

/// Something the application asks the running client to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Open a room in the message view.
    OpenRoom(RoomId),
    /// Close the message view.
    CloseRoom,
    /// Open (or create) the direct room with a friend.
    OpenDirectRoom(UserId),
    /// Send a message to a room.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message text.
        content: String,
    },
    /// Store a new token and reconnect with it.
    SignIn(String),
    /// Exchange a username and password for a token, then reconnect.
    LogIn(LoginRequest),
    /// Add a friend by username and reload the friend list.
    AddFriend(String),
    /// Discard the token and disconnect.
    SignOut,
    /// Stop the client.
    Shutdown,
}

impl Intent {
    /// Runtime input for this intent, applying credential changes to `store`
    /// first so API requests issued afterwards carry the new token.
    pub fn into_input(self, store: &impl CredentialStore) -> Input {
        match self {
            Self::OpenRoom(room_id) => Input::Event(SyncEvent::OpenRoom { room_id }),
            Self::CloseRoom => Input::Event(SyncEvent::CloseRoom),
            Self::OpenDirectRoom(friend_id) => Input::Event(SyncEvent::OpenDirectRoom { friend_id }),
            Self::SendMessage { room_id, content } => {
                Input::Event(SyncEvent::SendMessage { room_id, content })
            },
            Self::SignIn(token) => {
                store.set(token.clone());
                Input::Event(SyncEvent::CredentialChanged(Some(token)))
            },
            Self::LogIn(request) => Input::Event(SyncEvent::LogIn(request)),
            Self::AddFriend(username) => Input::Event(SyncEvent::AddFriend { username }),
            Self::SignOut => {
                store.clear();
                Input::Event(SyncEvent::CredentialChanged(None))
            },
            Self::Shutdown => Input::Shutdown,
        }
    }
}

/// Cloneable handle to a running client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    intents: mpsc::Sender<Intent>,
    snapshots: watch::Receiver<SyncSnapshot>,
}

impl ClientHandle {
    /// Handle over raw channels. Used by [`spawn_client`].
    pub fn new(intents: mpsc::Sender<Intent>, snapshots: watch::Receiver<SyncSnapshot>) -> Self {
        Self { intents, snapshots }
    }

    /// Open `room_id`: zero its counter, load history, mark it read.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn open_room(&self, room_id: RoomId) -> Result<(), RuntimeError> {
        self.submit(Intent::OpenRoom(room_id)).await
    }

    /// Close the message view.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn close_room(&self) -> Result<(), RuntimeError> {
        self.submit(Intent::CloseRoom).await
    }

    /// Open the direct room with `friend_id`, creating it if needed.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn open_direct_room(&self, friend_id: UserId) -> Result<(), RuntimeError> {
        self.submit(Intent::OpenDirectRoom(friend_id)).await
    }

    /// Send `content` to `room_id`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Command` if the content is empty after trimming
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn send_message(&self, room_id: RoomId, content: impl Into<String>) -> Result<(), RuntimeError> {
        let content = content.into();
        outbound::send_message(room_id, &content)?;
        self.submit(Intent::SendMessage { room_id, content }).await
    }

    /// Replace the session token.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Config` if the token is blank
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn sign_in(&self, token: impl Into<String>) -> Result<(), RuntimeError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(RuntimeError::Config("token is blank".into()));
        }
        self.submit(Intent::SignIn(token)).await
    }

    /// Sign in with a username and password.
    ///
    /// The token returned by the API replaces the current one and the
    /// connection is re-established with it. A rejected sign-in is logged
    /// and leaves the current session alone.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Command` if the username or password is blank
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn login(&self, username: &str, password: &str) -> Result<(), RuntimeError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(CommandError::MissingCredentials.into());
        }
        self.submit(Intent::LogIn(LoginRequest::new(username.trim(), password))).await
    }

    /// Add `username` as a friend; the friend list reloads once it succeeds.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Command` if the username is blank
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn add_friend(&self, username: &str) -> Result<(), RuntimeError> {
        let username = friend_username(username)?;
        self.submit(Intent::AddFriend(username.to_string())).await
    }

    /// Discard the session token and disconnect.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the client has stopped
    pub async fn sign_out(&self) -> Result<(), RuntimeError> {
        self.submit(Intent::SignOut).await
    }

    /// Ask the client to stop. Succeeds if it already has.
    pub async fn shutdown(&self) {
        if self.intents.send(Intent::Shutdown).await.is_err() {
            info!("client already stopped");
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published state.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published state satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the client stops first
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SyncSnapshot, RuntimeError>
    where
        F: FnMut(&SyncSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots.wait_for(|snapshot| predicate(snapshot)).await.map_err(|_| RuntimeError::Stopped)?;
        Ok(snapshot.clone())
    }

    async fn submit(&self, intent: Intent) -> Result<(), RuntimeError> {
        self.intents.send(intent).await.map_err(|_| RuntimeError::Stopped)
    }
}

/// Task running the client; resolves when it stops.
pub type ClientTask = JoinHandle<Result<(), RuntimeError>>;

/// Start a client against the configured realtime and HTTP endpoints.
///
/// # Errors
///
/// - `RuntimeError::Config` if the API base URL is invalid
/// - `RuntimeError::Sync` if the realtime endpoint is invalid
pub fn spawn_client(
    config: ClientConfig,
    credentials: SharedCredentials,
) -> Result<(ClientHandle, ClientTask), RuntimeError> {
    let api = HttpApi::new(&config.api_base, credentials.clone(), config.request_timeout)?;
    spawn_client_with(config, credentials, Arc::new(api), |_| {})
}

/// Start a client with a custom API and a hook to register application
/// handlers on the engine before it starts.
///
/// # Errors
///
/// - `RuntimeError::Sync` if the realtime endpoint is invalid
pub fn spawn_client_with<F>(
    config: ClientConfig,
    credentials: SharedCredentials,
    api: Arc<dyn ChatApi>,
    setup: F,
) -> Result<(ClientHandle, ClientTask), RuntimeError>
where
    F: FnOnce(&mut SyncEngine<SystemEnv>),
{
    let env = SystemEnv::new();
    let mut engine = SyncEngine::new(env, config.sync.clone(), credentials.token())?;
    setup(&mut engine);

    let (intent_tx, intent_rx) = mpsc::channel(config.intent_capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());

    let driver = TokioDriver::new(env, api, credentials, intent_rx, snapshot_tx, &config);
    let runtime = Runtime::new(driver, engine);

    let task = tokio::spawn(async move { runtime.run().await.map_err(RuntimeError::from) });

    Ok((ClientHandle::new(intent_tx, snapshot_rx), task))
}

#[cfg(test)]
mod tests {
    use chatsync_core::CommandError;

    use super::*;

    #[test]
    fn sign_in_stores_token_before_the_event() {
        let store = SharedCredentials::default();

        let input = Intent::SignIn("t".into()).into_input(&store);

        assert_eq!(store.token().as_deref(), Some("t"));
        assert_eq!(input, Input::Event(SyncEvent::CredentialChanged(Some("t".into()))));
    }

    #[test]
    fn sign_out_clears_token() {
        let store = SharedCredentials::new(Some("t".into()));

        let input = Intent::SignOut.into_input(&store);

        assert_eq!(store.token(), None);
        assert_eq!(input, Input::Event(SyncEvent::CredentialChanged(None)));
    }

    #[tokio::test]
    async fn blank_message_is_rejected_locally() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_snap_tx, snap_rx) = watch::channel(SyncSnapshot::default());
        let handle = ClientHandle::new(tx, snap_rx);

        let err = handle.send_message(1, "   ").await.unwrap_err();

        assert!(matches!(err, RuntimeError::Command(CommandError::EmptyContent)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn login_and_add_friend_become_engine_events() {
        let store = SharedCredentials::default();

        let input = Intent::LogIn(LoginRequest::new("kim", "pw")).into_input(&store);
        assert_eq!(input, Input::Event(SyncEvent::LogIn(LoginRequest::new("kim", "pw"))));
        // The token is stored only once the API answers.
        assert_eq!(store.token(), None);

        let input = Intent::AddFriend("lee".into()).into_input(&store);
        assert_eq!(input, Input::Event(SyncEvent::AddFriend { username: "lee".into() }));
    }

    #[tokio::test]
    async fn blank_login_and_friend_are_rejected_locally() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_snap_tx, snap_rx) = watch::channel(SyncSnapshot::default());
        let handle = ClientHandle::new(tx, snap_rx);

        let err = handle.login(" ", "pw").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command(CommandError::MissingCredentials)));
        let err = handle.add_friend("\t").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command(CommandError::EmptyUsername)));
        assert!(rx.try_recv().is_err());

        handle.add_friend(" lee ").await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), Intent::AddFriend("lee".into()));
    }

    #[tokio::test]
    async fn stopped_client_reports_stopped() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let (_snap_tx, snap_rx) = watch::channel(SyncSnapshot::default());
        let handle = ClientHandle::new(tx, snap_rx);

        assert!(matches!(handle.open_room(1).await, Err(RuntimeError::Stopped)));
        handle.shutdown().await;
    }
}
