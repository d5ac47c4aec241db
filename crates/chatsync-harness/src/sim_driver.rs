//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` stands in for the tokio driver and for the server at once. It
//! implements [`Driver`] so the same [`Runtime`](chatsync_client::Runtime)
//! loop runs in production and in simulation, while transports and API
//! requests are answered from a [`SimBackend`] after a fixed virtual latency.
//!
//! Inputs come from a timeline ordered by virtual time. When the runtime
//! waits, the driver jumps the [`SimEnv`] clock to whichever comes first:
//! the next scripted input or the engine's timer deadline.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chatsync_client::{ApiRequest, Driver, Input};
use chatsync_core::{ApiError, CloseReason, SyncEvent, SyncSnapshot};
use chatsync_proto::{Friend, LoginResponse, Message, Room, RoomId, UserId};
use tracing::trace;

use crate::{
    invariants::{InvariantRegistry, SystemSnapshot, Violation},
    sim_env::SimEnv,
};

/// Error type for simulation driver.
#[derive(Debug, Clone)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

/// Server-side data the driver answers API requests from.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    /// `GET /chatrooms`
    pub rooms: Vec<Room>,
    /// `GET /chatrooms/{id}/messages`
    pub histories: HashMap<RoomId, Vec<Message>>,
    /// `GET /friends`
    pub friends: Vec<Friend>,
    /// `POST /chatrooms` result per friend
    pub direct_rooms: HashMap<UserId, Room>,
    /// `POST /users/login`: username to user id and password
    pub accounts: HashMap<String, (UserId, String)>,
    /// `POST /friends`: users that exist but are not friends yet
    pub strangers: Vec<Friend>,
    /// Every request and handshake is refused with 401.
    pub reject_credentials: bool,
}

impl SimBackend {
    fn answer(&mut self, request: ApiRequest) -> SyncEvent {
        if self.reject_credentials {
            return match request {
                ApiRequest::Rooms => SyncEvent::RoomsLoaded(Err(ApiError::Unauthorized)),
                ApiRequest::History { room_id } => {
                    SyncEvent::HistoryLoaded { room_id, result: Err(ApiError::Unauthorized) }
                },
                ApiRequest::Friends => SyncEvent::FriendsLoaded(Err(ApiError::Unauthorized)),
                ApiRequest::OpenDirectRoom { .. } => SyncEvent::DirectRoomOpened(Err(ApiError::Unauthorized)),
                ApiRequest::LogIn(_) => SyncEvent::LoggedIn(Err(ApiError::Unauthorized)),
                ApiRequest::AddFriend { .. } => SyncEvent::FriendAdded(Err(ApiError::Unauthorized)),
            };
        }

        match request {
            ApiRequest::Rooms => SyncEvent::RoomsLoaded(Ok(self.rooms.clone())),
            ApiRequest::History { room_id } => SyncEvent::HistoryLoaded {
                room_id,
                result: Ok(self.histories.get(&room_id).cloned().unwrap_or_default()),
            },
            ApiRequest::Friends => SyncEvent::FriendsLoaded(Ok(self.friends.clone())),
            ApiRequest::OpenDirectRoom { friend_id } => {
                SyncEvent::DirectRoomOpened(self.direct_rooms.get(&friend_id).cloned().ok_or_else(|| {
                    ApiError::Status { status: 404, body: format!("no user {friend_id}") }
                }))
            },
            ApiRequest::LogIn(request) => SyncEvent::LoggedIn(match self.accounts.get(&request.username) {
                Some((user_id, password)) if *password == request.password => Ok(LoginResponse {
                    token: format!("{}-token", request.username),
                    user_id: *user_id,
                    username: request.username,
                }),
                _ => Err(ApiError::Unauthorized),
            }),
            ApiRequest::AddFriend { username } => {
                let Some(index) = self.strangers.iter().position(|user| user.username == username) else {
                    return SyncEvent::FriendAdded(Err(ApiError::Status {
                        status: 400,
                        body: format!("no user {username}"),
                    }));
                };
                let friend = self.strangers.remove(index);
                self.friends.push(friend);
                SyncEvent::FriendAdded(Ok(()))
            },
        }
    }
}

/// Virtual latencies and the end of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Delay between `open_transport` and its outcome.
    pub connect_latency: Duration,
    /// Delay between an API request and its result.
    pub api_latency: Duration,
    /// The run ends once the clock would pass this point.
    pub horizon: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            connect_latency: Duration::from_millis(50),
            api_latency: Duration::from_millis(20),
            horizon: Duration::from_secs(600),
        }
    }
}

/// A transport the client asked to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    /// Connection attempt.
    pub generation: u64,
    /// URL including the token query.
    pub url: String,
    /// Virtual time of the request.
    pub at: Duration,
}

/// Something on the timeline.
#[derive(Debug, Clone)]
enum Scripted {
    /// Deliver as is.
    Event(SyncEvent),
    /// Server finishes the handshake of a generation.
    Accept(u64),
    /// Server pushes a frame on whatever transport is open.
    Push(String),
    /// Server drops whatever transport is open.
    DropTransport,
    /// Server-side room list changes.
    SetRooms(Vec<Room>),
    /// Server-side history of a room changes.
    SetHistory(RoomId, Vec<Message>),
    /// Application stops the client.
    Shutdown,
}

#[derive(Default)]
struct SharedState {
    timeline: BTreeMap<(Duration, u64), Scripted>,
    next_seq: u64,
    backend: SimBackend,
    refuse_connects: usize,
    refused: HashSet<u64>,
    live: Option<u64>,
    opened: Vec<OpenRecord>,
    closed: Vec<u64>,
    sent: Vec<(u64, String)>,
    requests: Vec<ApiRequest>,
    credential_clears: usize,
    stored_credentials: Vec<String>,
    latest: Option<SyncSnapshot>,
    publishes: usize,
    violations: Vec<Violation>,
    stopped: bool,
}

impl SharedState {
    fn schedule(&mut self, at: Duration, item: Scripted) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timeline.insert((at, seq), item);
    }

    /// Turn a timeline entry into an input, if it still applies.
    fn resolve(&mut self, item: Scripted) -> Option<Input> {
        match item {
            Scripted::Event(event) => Some(Input::Event(event)),
            Scripted::Accept(generation) => {
                if self.closed.contains(&generation) {
                    trace!(generation, "handshake finished after client gave up");
                    return None;
                }
                self.live = Some(generation);
                Some(Input::Event(SyncEvent::TransportOpened { generation }))
            },
            Scripted::Push(text) => {
                self.live.map(|generation| Input::Event(SyncEvent::FrameReceived { generation, text }))
            },
            Scripted::DropTransport => self.live.take().map(|generation| {
                Input::Event(SyncEvent::TransportClosed {
                    generation,
                    reason: CloseReason::Error("connection reset".into()),
                })
            }),
            Scripted::SetRooms(rooms) => {
                self.backend.rooms = rooms;
                None
            },
            Scripted::SetHistory(room_id, messages) => {
                self.backend.histories.insert(room_id, messages);
                None
            },
            Scripted::Shutdown => Some(Input::Shutdown),
        }
    }
}

/// Simulation driver for deterministic testing.
///
/// Clones share state, so a test keeps one clone for scripting and
/// inspection while the runtime owns the other.
#[derive(Clone)]
pub struct SimDriver {
    env: SimEnv,
    config: SimConfig,
    state: Arc<Mutex<SharedState>>,
    invariants: Option<Arc<InvariantRegistry>>,
}

impl SimDriver {
    /// Driver answering from `backend` on `env`'s clock.
    pub fn new(env: SimEnv, backend: SimBackend, config: SimConfig) -> Self {
        let state = SharedState { backend, ..SharedState::default() };
        Self { env, config, state: Arc::new(Mutex::new(state)), invariants: None }
    }

    /// Check every published snapshot against `registry`.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(Arc::new(registry));
        self
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` at virtual time `at`.
    pub fn schedule(&self, at: Duration, event: SyncEvent) {
        self.lock().schedule(at, Scripted::Event(event));
    }

    /// Push a frame at `at` on the transport open at that moment.
    pub fn push_frame(&self, at: Duration, text: impl Into<String>) {
        self.lock().schedule(at, Scripted::Push(text.into()));
    }

    /// Drop the transport open at `at`.
    pub fn drop_transport(&self, at: Duration) {
        self.lock().schedule(at, Scripted::DropTransport);
    }

    /// Stop the client at `at`.
    pub fn shutdown_at(&self, at: Duration) {
        self.lock().schedule(at, Scripted::Shutdown);
    }

    /// Replace the server-side room list at `at`.
    pub fn set_rooms_at(&self, at: Duration, rooms: Vec<Room>) {
        self.lock().schedule(at, Scripted::SetRooms(rooms));
    }

    /// Replace the server-side history of `room_id` at `at`.
    pub fn set_history_at(&self, at: Duration, room_id: RoomId, messages: Vec<Message>) {
        self.lock().schedule(at, Scripted::SetHistory(room_id, messages));
    }

    /// Refuse the next `count` handshakes.
    pub fn refuse_connects(&self, count: usize) {
        self.lock().refuse_connects = count;
    }

    /// Refuse the handshake of connection attempt `generation`.
    pub fn refuse_generation(&self, generation: u64) {
        self.lock().refused.insert(generation);
    }

    /// Change what the server answers.
    pub fn update_backend(&self, update: impl FnOnce(&mut SimBackend)) {
        update(&mut self.lock().backend);
    }

    /// Every transport the client asked to open.
    pub fn opened(&self) -> Vec<OpenRecord> {
        self.lock().opened.clone()
    }

    /// Generations the client closed.
    pub fn closed(&self) -> Vec<u64> {
        self.lock().closed.clone()
    }

    /// Every frame the client wrote, with its generation.
    pub fn sent(&self) -> Vec<(u64, String)> {
        self.lock().sent.clone()
    }

    /// Frame texts the client wrote, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.lock().sent.iter().map(|(_, text)| text.clone()).collect()
    }

    /// API requests the client made.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().requests.clone()
    }

    /// Times the client discarded its credential.
    pub fn credential_clears(&self) -> usize {
        self.lock().credential_clears
    }

    /// Tokens the client stored after signing in, in order.
    pub fn stored_credentials(&self) -> Vec<String> {
        self.lock().stored_credentials.clone()
    }

    /// Transport the server considers open.
    pub fn live_generation(&self) -> Option<u64> {
        self.lock().live
    }

    /// Last published snapshot.
    pub fn latest(&self) -> Option<SyncSnapshot> {
        self.lock().latest.clone()
    }

    /// Number of snapshots published.
    pub fn publishes(&self) -> usize {
        self.lock().publishes
    }

    /// Invariant violations seen so far.
    pub fn violations(&self) -> Vec<Violation> {
        self.lock().violations.clone()
    }

    /// Whether the runtime stopped the driver.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Virtual clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    fn poll_timeline(&self, timeout: Option<Duration>) -> Input {
        let mut state = self.lock();

        loop {
            if state.stopped {
                return Input::Shutdown;
            }

            let now = self.env.elapsed();
            let deadline = timeout.map(|timeout| now + timeout);
            let next = state.timeline.first_key_value().map(|((at, _), _)| *at);

            // Scripted items win ties with the engine's timer.
            let due = next.filter(|at| deadline.is_none_or(|deadline| *at <= deadline));

            if let Some(at) = due {
                if at > self.config.horizon {
                    return Input::Shutdown;
                }
                let Some((_, item)) = state.timeline.pop_first() else {
                    return Input::Shutdown;
                };
                self.env.advance_to(at);
                if let Some(input) = state.resolve(item) {
                    return input;
                }
                continue;
            }

            let Some(deadline) = deadline else {
                return Input::Shutdown;
            };
            if deadline > self.config.horizon {
                return Input::Shutdown;
            }
            self.env.advance_to(deadline);
            return Input::Timeout;
        }
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn next_input(&mut self, timeout: Option<Duration>) -> Result<Input, Self::Error> {
        Ok(self.poll_timeline(timeout))
    }

    async fn open_transport(&mut self, generation: u64, url: String) -> Result<(), Self::Error> {
        let at = self.env.elapsed() + self.config.connect_latency;
        let mut state = self.lock();
        state.opened.push(OpenRecord { generation, url, at: self.env.elapsed() });

        let refused = state.refused.remove(&generation);
        if refused || state.refuse_connects > 0 {
            if !refused {
                state.refuse_connects -= 1;
            }
            let error = "connection refused".to_string();
            state.schedule(at, Scripted::Event(SyncEvent::TransportFailed { generation, error }));
        } else if state.backend.reject_credentials {
            let reason = CloseReason::AuthRejected;
            state.schedule(at, Scripted::Event(SyncEvent::TransportClosed { generation, reason }));
        } else {
            state.schedule(at, Scripted::Accept(generation));
        }
        Ok(())
    }

    async fn send_frame(&mut self, generation: u64, text: String) -> Result<(), Self::Error> {
        let mut state = self.lock();
        if state.live != Some(generation) {
            return Err(SimDriverError(format!("frame on generation {generation} which is not open")));
        }
        state.sent.push((generation, text));
        Ok(())
    }

    async fn close_transport(&mut self, generation: u64) -> Result<(), Self::Error> {
        let mut state = self.lock();
        state.closed.push(generation);
        if state.live == Some(generation) {
            state.live = None;
        }
        Ok(())
    }

    fn request(&mut self, request: ApiRequest) -> Result<(), Self::Error> {
        let at = self.env.elapsed() + self.config.api_latency;
        let mut state = self.lock();
        state.requests.push(request.clone());
        let answer = state.backend.answer(request);
        state.schedule(at, Scripted::Event(answer));
        Ok(())
    }

    fn store_credential(&mut self, token: String) {
        self.lock().stored_credentials.push(token);
    }

    fn clear_credential(&mut self) {
        self.lock().credential_clears += 1;
    }

    fn publish(&mut self, snapshot: SyncSnapshot) {
        let violations = match &self.invariants {
            Some(registry) => registry.check_all(&SystemSnapshot::from_sync(&snapshot)).err(),
            None => None,
        };

        let mut state = self.lock();
        if let Some(violations) = violations {
            state.violations.extend(violations);
        }
        state.latest = Some(snapshot);
        state.publishes += 1;
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.stopped = true;
        state.live = None;
    }
}
