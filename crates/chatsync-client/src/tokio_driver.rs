//! Tokio driver: real websocket transports and background API requests.
//!
//! Everything asynchronous the driver starts (transport tasks, API calls)
//! reports back on one event channel, so the runtime only ever waits on
//! three sources: that channel, application intents and the next timer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chatsync_core::{ChatApi, CredentialStore, Environment, SharedCredentials, SyncEvent, SyncSnapshot};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};
use tracing::{debug, trace, warn};

use crate::{
    config::ClientConfig,
    driver::{ApiRequest, Driver, Input},
    env::SystemEnv,
    error::TransportError,
    handle::Intent,
    transport::{self, TransportHandle},
};

/// [`Driver`] backed by tokio, tokio-tungstenite and a [`ChatApi`].
pub struct TokioDriver {
    env: SystemEnv,
    api: Arc<dyn ChatApi>,
    credentials: SharedCredentials,
    intents: mpsc::Receiver<Intent>,
    events_tx: mpsc::Sender<SyncEvent>,
    events_rx: mpsc::Receiver<SyncEvent>,
    transports: HashMap<u64, TransportHandle>,
    requests: JoinSet<()>,
    snapshots: watch::Sender<SyncSnapshot>,
    outbound_capacity: usize,
}

impl TokioDriver {
    /// Create a driver reading intents from `intents` and publishing to
    /// `snapshots`.
    pub fn new(
        env: SystemEnv,
        api: Arc<dyn ChatApi>,
        credentials: SharedCredentials,
        intents: mpsc::Receiver<Intent>,
        snapshots: watch::Sender<SyncSnapshot>,
        config: &ClientConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));

        Self {
            env,
            api,
            credentials,
            intents,
            events_tx,
            events_rx,
            transports: HashMap::new(),
            requests: JoinSet::new(),
            snapshots,
            outbound_capacity: config.outbound_capacity,
        }
    }

    /// Number of transports currently tracked.
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Drop the handle of a transport whose task has reported its end.
    ///
    /// The engine only asks to close transports it gives up on; a peer close
    /// or a refused handshake ends the task on its own.
    fn forget_ended(&mut self, event: &SyncEvent) {
        let (SyncEvent::TransportClosed { generation, .. } | SyncEvent::TransportFailed { generation, .. }) = event
        else {
            return;
        };
        if self.transports.remove(generation).is_some() {
            trace!(generation, "transport ended");
        }
    }
}

async fn perform(api: Arc<dyn ChatApi>, request: ApiRequest) -> SyncEvent {
    match request {
        ApiRequest::Rooms => SyncEvent::RoomsLoaded(api.fetch_rooms().await),
        ApiRequest::History { room_id } => {
            SyncEvent::HistoryLoaded { room_id, result: api.fetch_messages(room_id).await }
        },
        ApiRequest::Friends => SyncEvent::FriendsLoaded(api.fetch_friends().await),
        ApiRequest::OpenDirectRoom { friend_id } => {
            SyncEvent::DirectRoomOpened(api.open_direct_room(friend_id).await)
        },
        ApiRequest::LogIn(request) => SyncEvent::LoggedIn(api.login(&request).await),
        ApiRequest::AddFriend { username } => SyncEvent::FriendAdded(api.add_friend(&username).await),
    }
}

async fn sleep_or_forever(env: SystemEnv, timeout: Option<Duration>) {
    match timeout {
        Some(duration) => env.sleep(duration).await,
        None => std::future::pending().await,
    }
}

impl Driver for TokioDriver {
    type Error = TransportError;

    async fn next_input(&mut self, timeout: Option<Duration>) -> Result<Input, Self::Error> {
        while self.requests.try_join_next().is_some() {}

        let timer = sleep_or_forever(self.env, timeout);

        tokio::select! {
            biased;

            event = self.events_rx.recv() => {
                // The driver holds a sender, so the channel never closes.
                let Some(event) = event else { return Ok(Input::Shutdown) };
                self.forget_ended(&event);
                Ok(Input::Event(event))
            },

            intent = self.intents.recv() => match intent {
                Some(intent) => Ok(intent.into_input(&self.credentials)),
                None => {
                    debug!("every client handle dropped");
                    Ok(Input::Shutdown)
                },
            },

            () = timer => Ok(Input::Timeout),
        }
    }

    async fn open_transport(&mut self, generation: u64, url: String) -> Result<(), Self::Error> {
        let handle = transport::spawn(generation, url, self.events_tx.clone(), self.outbound_capacity);
        if let Some(previous) = self.transports.insert(generation, handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn send_frame(&mut self, generation: u64, text: String) -> Result<(), Self::Error> {
        match self.transports.get(&generation) {
            Some(handle) => {
                if let Err(err) = handle.send(text) {
                    warn!(generation, error = %err, "frame dropped");
                }
            },
            None => trace!(generation, "no transport for frame"),
        }
        Ok(())
    }

    async fn close_transport(&mut self, generation: u64) -> Result<(), Self::Error> {
        if let Some(handle) = self.transports.remove(&generation) {
            handle.close();
        }
        Ok(())
    }

    fn request(&mut self, request: ApiRequest) -> Result<(), Self::Error> {
        debug!(?request, "api request");
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();

        self.requests.spawn(async move {
            let event = perform(api, request).await;
            if events.send(event).await.is_err() {
                trace!("runtime gone before api result");
            }
        });
        Ok(())
    }

    fn store_credential(&mut self, token: String) {
        self.credentials.set(token);
    }

    fn clear_credential(&mut self) {
        self.credentials.clear();
    }

    fn publish(&mut self, snapshot: SyncSnapshot) {
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn stop(&mut self) {
        for (_, handle) in self.transports.drain() {
            handle.abort();
        }
        self.requests.abort_all();
    }
}

impl Drop for TokioDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
