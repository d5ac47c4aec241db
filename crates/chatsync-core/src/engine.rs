//! Sync engine.
//!
//! Composes the connection manager, the dispatcher and the reconcilers into
//! one Sans-IO state machine. Every input (transport notification, API
//! result, timer, local intent) is a [`SyncEvent`] passed to
//! [`SyncEngine::handle`]; every side effect is a [`SyncAction`] for the
//! driver to execute.
//!
//! # Subscriptions
//!
//! The room list and presence handlers are registered once at construction.
//! The message stream handlers are registered when a room is opened and
//! withdrawn when it is closed, so they always come after the room list
//! handlers in dispatch order.

use chatsync_proto::{EventKind, InboundEvent, LoginResponse, RoomId};
use tracing::{debug, info, warn};

use crate::{
    api::friend_username,
    connection::{ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionPhase},
    dispatch::{Delivery, Dispatcher, HandlerResult, SubscriberOwner, SubscriptionId},
    env::Environment,
    error::{ApiError, CommandError, HandlerError, SyncError},
    event::{SyncAction, SyncEvent},
    outbound,
    rooms::RoomChange,
    state::{Account, SyncSnapshot, SyncState},
};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Realtime endpoint (`ws://` or `wss://`), without the token
    pub endpoint: String,
    /// Connection lifecycle settings
    pub connection: ConnectionConfig,
    /// Reload the room list and open room history after every reconnect
    pub resync_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connection: ConnectionConfig::default(),
            resync_on_reconnect: true,
        }
    }
}

impl SyncConfig {
    /// Default configuration for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), ..Default::default() }
    }
}

/// Sync engine.
pub struct SyncEngine<E: Environment> {
    env: E,
    config: SyncConfig,
    connection: ConnectionManager<E::Instant>,
    dispatcher: Dispatcher<SyncState, SyncAction>,
    state: SyncState,
    started: bool,
}

impl<E: Environment> SyncEngine<E> {
    /// Create an engine. Nothing happens until [`SyncEvent::Start`].
    ///
    /// # Errors
    ///
    /// - `SyncError::Connection` if the endpoint or connection config is invalid
    pub fn new(env: E, config: SyncConfig, token: Option<String>) -> Result<Self, SyncError> {
        let connection =
            ConnectionManager::new(&config.endpoint, token, config.connection.clone(), env.now())?;

        let mut dispatcher = Dispatcher::new();
        register_room_handlers(&mut dispatcher);
        register_presence_handlers(&mut dispatcher);

        Ok(Self { env, config, connection, dispatcher, state: SyncState::new(), started: false })
    }

    /// Reconciled state.
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Copy of the state for publication.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.state.snapshot(self.connection.phase())
    }

    /// Connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.connection.phase()
    }

    /// Connection manager, for inspection.
    pub fn connection(&self) -> &ConnectionManager<E::Instant> {
        &self.connection
    }

    /// Configuration in effect.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Environment the engine reads time from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// How long the driver may wait before the next [`SyncEvent::Tick`].
    pub fn time_until_next_timer(&self) -> Option<std::time::Duration> {
        self.connection.time_until_next_timer(self.env.now())
    }

    /// Register an application handler for `kind`.
    ///
    /// Application handlers run after the engine's own handlers for events
    /// already subscribed at the time of registration.
    pub fn subscribe<F>(&mut self, kind: EventKind, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&mut SyncState, &Delivery) -> HandlerResult<SyncAction> + Send + 'static,
    {
        self.dispatcher.subscribe(kind, SubscriberOwner::External(name.into()), handler)
    }

    /// Remove an application handler.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// - `SyncError::Command` if a message has no content after trimming
    pub fn handle(&mut self, event: SyncEvent) -> Result<Vec<SyncAction>, SyncError> {
        let now = self.env.now();

        match event {
            SyncEvent::Start => self.handle_start(now),
            SyncEvent::Tick => {
                let actions = self.connection.tick(now);
                self.lower(actions)
            },
            SyncEvent::TransportOpened { generation } => self.handle_opened(generation, now),
            SyncEvent::TransportClosed { generation, reason } => {
                let actions = self.connection.handle_closed(generation, reason, now);
                self.lower(actions)
            },
            SyncEvent::TransportFailed { generation, error } => {
                let actions = self.connection.handle_error(generation, error, now);
                self.lower(actions)
            },
            SyncEvent::FrameReceived { generation, text } => {
                Ok(self.handle_frame(generation, &text, now))
            },
            SyncEvent::RoomsLoaded(result) => match result {
                Ok(rooms) => {
                    self.state.rooms.replace(rooms);
                    Ok(Vec::new())
                },
                Err(err) => {
                    self.state.rooms.reload_failed();
                    self.api_failure("rooms", err, now)
                },
            },
            SyncEvent::HistoryLoaded { room_id, result } => match result {
                Ok(history) => {
                    self.state.messages.apply_history(room_id, history);
                    Ok(Vec::new())
                },
                Err(err) => {
                    self.state.messages.history_failed(room_id);
                    self.api_failure("history", err, now)
                },
            },
            SyncEvent::FriendsLoaded(result) => match result {
                Ok(friends) => {
                    self.state.presence.replace(friends);
                    Ok(Vec::new())
                },
                Err(err) => self.api_failure("friends", err, now),
            },
            SyncEvent::DirectRoomOpened(result) => match result {
                Ok(room) => {
                    let mut actions = self.request_rooms();
                    actions.extend(self.open_room(room.id)?);
                    Ok(actions)
                },
                Err(err) => self.api_failure("direct room", err, now),
            },
            SyncEvent::LoggedIn(result) => match result {
                Ok(session) => self.signed_in(session, now),
                Err(err) => {
                    warn!(error = %err, "sign in failed");
                    Ok(Vec::new())
                },
            },
            SyncEvent::FriendAdded(result) => match result {
                Ok(()) => Ok(vec![SyncAction::FetchFriends]),
                Err(err) => self.api_failure("add friend", err, now),
            },
            SyncEvent::OpenRoom { room_id } => self.open_room(room_id),
            SyncEvent::CloseRoom => {
                self.close_room();
                Ok(Vec::new())
            },
            SyncEvent::OpenDirectRoom { friend_id } => {
                Ok(vec![SyncAction::OpenDirectRoom { friend_id }])
            },
            SyncEvent::SendMessage { room_id, content } => self.send_message(room_id, &content),
            SyncEvent::LogIn(request) => {
                if request.username.trim().is_empty() || request.password.is_empty() {
                    return Err(CommandError::MissingCredentials.into());
                }
                Ok(vec![SyncAction::LogIn(request)])
            },
            SyncEvent::AddFriend { username } => {
                let username = friend_username(&username)?.to_string();
                Ok(vec![SyncAction::AddFriend { username }])
            },
            SyncEvent::CredentialChanged(token) => self.handle_credential(token, now),
            SyncEvent::Shutdown => {
                info!("shutting down");
                let actions = self.connection.shutdown(now);
                self.lower(actions)
            },
        }
    }

    fn handle_start(&mut self, now: E::Instant) -> Result<Vec<SyncAction>, SyncError> {
        if self.started {
            debug!("start ignored, already started");
            return Ok(Vec::new());
        }
        self.started = true;

        let mut actions = self.request_rooms();
        actions.push(SyncAction::FetchFriends);

        let connect = self.connection.connect(now);
        actions.extend(self.lower(connect)?);
        Ok(actions)
    }

    fn handle_opened(&mut self, generation: u64, now: E::Instant) -> Result<Vec<SyncAction>, SyncError> {
        let opened = self.connection.handle_opened(generation, now);
        if opened.is_empty() {
            return Ok(Vec::new());
        }

        let mut actions = self.lower(opened)?;

        if self.connection.opens() > 1 && self.config.resync_on_reconnect {
            info!(generation, "reconnected, resynchronizing");
            actions.extend(self.request_rooms());
            if let Some(room_id) = self.state.messages.begin_resync() {
                actions.push(SyncAction::FetchHistory { room_id });
            }
        }

        // A room opened while disconnected has not been marked read yet.
        if let Some(room_id) = self.state.rooms.active() {
            actions.extend(self.send_mark_read(room_id)?);
        }

        Ok(actions)
    }

    fn handle_frame(&mut self, generation: u64, text: &str, now: E::Instant) -> Vec<SyncAction> {
        if generation != self.connection.generation() || self.connection.phase() != ConnectionPhase::Open {
            debug!(generation, current = self.connection.generation(), "frame from stale transport dropped");
            return Vec::new();
        }

        self.connection.record_inbound(generation, now);
        self.dispatcher.dispatch_text(&mut self.state, text, self.env.wall_clock())
    }

    fn handle_credential(
        &mut self,
        token: Option<String>,
        now: E::Instant,
    ) -> Result<Vec<SyncAction>, SyncError> {
        let signed_in = token.is_some();
        self.state.account = None;
        let changes = self.connection.set_token(token, now);
        let mut actions = self.lower(changes)?;

        if signed_in && self.started {
            actions.extend(self.request_rooms());
            actions.push(SyncAction::FetchFriends);
        }
        Ok(actions)
    }

    fn signed_in(&mut self, session: LoginResponse, now: E::Instant) -> Result<Vec<SyncAction>, SyncError> {
        let LoginResponse { token, user_id, username } = session;
        info!(user_id, %username, "signed in");

        // Requests issued below must already carry the new token.
        let mut actions = vec![SyncAction::StoreCredential(token.clone())];
        actions.extend(self.handle_credential(Some(token), now)?);
        self.state.account = Some(Account { user_id, username });
        Ok(actions)
    }

    fn open_room(&mut self, room_id: RoomId) -> Result<Vec<SyncAction>, SyncError> {
        let mut actions = Vec::new();
        self.state.rooms.open(room_id);

        if self.state.messages.room_id() != Some(room_id) {
            debug!(room_id, "opening room");
            self.state.messages.open(room_id);
            if !self.dispatcher.is_subscribed(&SubscriberOwner::MessageStream) {
                register_stream_handlers(&mut self.dispatcher);
            }
            actions.push(SyncAction::FetchHistory { room_id });
        }

        actions.extend(self.send_mark_read(room_id)?);
        Ok(actions)
    }

    fn close_room(&mut self) {
        self.state.messages.close();
        self.state.rooms.close();
        self.dispatcher.unsubscribe_owner(&SubscriberOwner::MessageStream);
    }

    fn send_message(&mut self, room_id: RoomId, content: &str) -> Result<Vec<SyncAction>, SyncError> {
        let frame = outbound::encode_send_message(room_id, content)?;

        let Some(action) = self.connection.send(frame) else {
            return Ok(Vec::new());
        };

        self.state.rooms.note_local_send(room_id);
        Ok(vec![self.lower_one(action)?])
    }

    fn send_mark_read(&mut self, room_id: RoomId) -> Result<Option<SyncAction>, SyncError> {
        let frame = outbound::encode_mark_read(room_id)?;
        self.connection.send(frame).map(|action| self.lower_one(action)).transpose()
    }

    /// `FetchRooms` unless a reload is already in flight.
    fn request_rooms(&mut self) -> Vec<SyncAction> {
        if self.state.rooms.begin_reload() { vec![SyncAction::FetchRooms] } else { Vec::new() }
    }

    fn api_failure(
        &mut self,
        what: &'static str,
        err: ApiError,
        now: E::Instant,
    ) -> Result<Vec<SyncAction>, SyncError> {
        if !err.is_auth_rejection() {
            warn!(what, error = %err, transient = err.is_transient(), "api request failed");
            return Ok(Vec::new());
        }

        if !self.connection.has_token() {
            debug!(what, "credential already discarded");
            return Ok(Vec::new());
        }

        warn!(what, "credential rejected, session expired");
        self.state.account = None;
        let changes = self.connection.set_token(None, now);
        let mut actions = self.lower(changes)?;
        actions.push(SyncAction::SessionExpired);
        Ok(actions)
    }

    fn lower(&self, actions: Vec<ConnectionAction>) -> Result<Vec<SyncAction>, SyncError> {
        actions.into_iter().map(|action| self.lower_one(action)).collect()
    }

    fn lower_one(&self, action: ConnectionAction) -> Result<SyncAction, SyncError> {
        Ok(match action {
            ConnectionAction::Open { generation, url } => SyncAction::OpenTransport { generation, url },
            ConnectionAction::Send { generation, frame } => SyncAction::SendFrame { generation, text: frame },
            ConnectionAction::Heartbeat { generation } => {
                SyncAction::SendFrame { generation, text: outbound::encode_heartbeat()? }
            },
            ConnectionAction::Close { generation, reason } => SyncAction::CloseTransport { generation, reason },
            ConnectionAction::PhaseChanged(phase) => SyncAction::PhaseChanged(phase),
        })
    }
}

fn unexpected(owner: &str, delivery: &Delivery) -> HandlerError {
    HandlerError::new(format!("{owner} handler got {:?}", delivery.event.kind()))
}

fn register_room_handlers(dispatcher: &mut Dispatcher<SyncState, SyncAction>) {
    dispatcher.subscribe(EventKind::MessageReceived, SubscriberOwner::Rooms, |state, delivery| {
        let InboundEvent::MessageReceived(event) = &delivery.event else {
            return Err(unexpected("rooms", delivery));
        };
        match state.rooms.apply_message_received(event.room_id, event.message_id) {
            RoomChange::ReloadRequested => Ok(vec![SyncAction::FetchRooms]),
            RoomChange::Promoted { .. } | RoomChange::AwaitingReload | RoomChange::Duplicate => Ok(Vec::new()),
        }
    });

    dispatcher.subscribe(EventKind::MessagesRead, SubscriberOwner::Rooms, |state, delivery| {
        let InboundEvent::MessagesRead(event) = &delivery.event else {
            return Err(unexpected("rooms", delivery));
        };
        state.rooms.apply_messages_read(event.room_id);
        Ok(Vec::new())
    });
}

fn register_presence_handlers(dispatcher: &mut Dispatcher<SyncState, SyncAction>) {
    dispatcher.subscribe(EventKind::UserStatus, SubscriberOwner::Presence, |state, delivery| {
        let InboundEvent::UserStatus(event) = &delivery.event else {
            return Err(unexpected("presence", delivery));
        };
        state.presence.apply_status(event);
        Ok(Vec::new())
    });
}

fn register_stream_handlers(dispatcher: &mut Dispatcher<SyncState, SyncAction>) {
    dispatcher.subscribe(EventKind::MessageReceived, SubscriberOwner::MessageStream, |state, delivery| {
        let InboundEvent::MessageReceived(event) = &delivery.event else {
            return Err(unexpected("message stream", delivery));
        };
        state.messages.apply_received(event, delivery.received_at);
        Ok(Vec::new())
    });

    dispatcher.subscribe(EventKind::MessageUpdated, SubscriberOwner::MessageStream, |state, delivery| {
        let InboundEvent::MessageUpdated(event) = &delivery.event else {
            return Err(unexpected("message stream", delivery));
        };
        state.messages.apply_updated(event);
        Ok(Vec::new())
    });

    dispatcher.subscribe(EventKind::MessagesRead, SubscriberOwner::MessageStream, |state, delivery| {
        let InboundEvent::MessagesRead(event) = &delivery.event else {
            return Err(unexpected("message stream", delivery));
        };
        state.messages.apply_read(event);
        Ok(Vec::new())
    });
}

#[cfg(test)]
mod tests {
    use std::{
        ops::Sub,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use chatsync_proto::{Message, MessageId, Room, RoomKind};
    use chrono::{DateTime, NaiveDateTime};

    use super::*;
    use crate::{connection::CloseReason, error::CommandError};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Instant(Duration);

    impl Sub for Instant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            self.0.saturating_sub(rhs.0)
        }
    }

    /// Manual clock shared with the test body.
    #[derive(Clone, Default)]
    struct TestEnv {
        now: Arc<Mutex<Duration>>,
    }

    impl TestEnv {
        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant(*self.now.lock().unwrap())
        }

        fn wall_clock(&self) -> NaiveDateTime {
            let elapsed = self.now.lock().unwrap().as_secs();
            DateTime::from_timestamp(1_700_000_000 + elapsed as i64, 0).unwrap().naive_utc()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }
    }

    fn room(id: RoomId, unread: u32) -> Room {
        Room {
            id,
            kind: RoomKind::Direct,
            members: vec!["kim".into()],
            unread_count: unread,
            created_at: DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
        }
    }

    fn message(id: MessageId, unread: u32) -> Message {
        Message {
            id,
            sender_id: Some(1),
            sender_name: Some("kim".into()),
            content: Some(format!("#{id}")),
            unread_count: unread,
            edited: false,
            deleted: false,
            created_at: DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
        }
    }

    fn engine() -> (SyncEngine<TestEnv>, TestEnv) {
        let env = TestEnv::default();
        let engine = SyncEngine::new(env.clone(), SyncConfig::default(), Some("tok".into())).unwrap();
        (engine, env)
    }

    /// Engine started, connected, with `rooms` loaded.
    fn connected(rooms: Vec<Room>) -> (SyncEngine<TestEnv>, TestEnv, u64) {
        let (mut engine, env) = engine();
        engine.handle(SyncEvent::Start).unwrap();
        let generation = engine.connection().generation();
        engine.handle(SyncEvent::TransportOpened { generation }).unwrap();
        engine.handle(SyncEvent::RoomsLoaded(Ok(rooms))).unwrap();
        (engine, env, generation)
    }

    fn frame(engine: &mut SyncEngine<TestEnv>, generation: u64, text: &str) -> Vec<SyncAction> {
        engine.handle(SyncEvent::FrameReceived { generation, text: text.into() }).unwrap()
    }

    fn room_ids(engine: &SyncEngine<TestEnv>) -> Vec<RoomId> {
        engine.state().rooms.rooms().iter().map(|r| r.id).collect()
    }

    fn opens(actions: &[SyncAction]) -> usize {
        actions.iter().filter(|a| matches!(a, SyncAction::OpenTransport { .. })).count()
    }

    #[test]
    fn start_loads_and_connects() {
        let (mut engine, _) = engine();

        let actions = engine.handle(SyncEvent::Start).unwrap();

        assert_eq!(actions, vec![
            SyncAction::FetchRooms,
            SyncAction::FetchFriends,
            SyncAction::PhaseChanged(ConnectionPhase::Connecting),
            SyncAction::OpenTransport { generation: 1, url: "ws://localhost:8080/ws?token=tok".into() },
        ]);
        assert!(engine.handle(SyncEvent::Start).unwrap().is_empty());
    }

    #[test]
    fn message_moves_room_to_front_with_unread() {
        let (mut engine, _, generation) = connected(vec![room(2, 0), room(1, 0)]);

        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":1,"messageId":5,"content":"hi"}"#);

        assert_eq!(room_ids(&engine), vec![1, 2]);
        assert_eq!(engine.state().rooms.get(1).unwrap().unread_count, 1);
    }

    #[test]
    fn unknown_room_triggers_single_reload() {
        let (mut engine, _, generation) = connected(vec![room(1, 0)]);

        let first = frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":7,"messageId":1}"#);
        let second = frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":8,"messageId":2}"#);

        assert_eq!(first, vec![SyncAction::FetchRooms]);
        assert!(second.is_empty());
        assert_eq!(room_ids(&engine), vec![1]);
    }

    #[test]
    fn read_receipt_scenario() {
        let (mut engine, _, generation) = connected(vec![room(1, 0)]);
        engine.handle(SyncEvent::OpenRoom { room_id: 1 }).unwrap();
        engine
            .handle(SyncEvent::HistoryLoaded { room_id: 1, result: Ok(vec![message(10, 2), message(11, 2)]) })
            .unwrap();

        frame(&mut engine, generation, r#"{"type":"messages.read","chatRoomId":1,"senderId":3,"messageId":11}"#);

        let unread: Vec<u32> = engine.state().messages.messages().iter().map(|m| m.unread_count).collect();
        assert_eq!(unread, vec![1, 1]);
    }

    #[test]
    fn open_room_fetches_history_and_marks_read() {
        let (mut engine, _, generation) = connected(vec![room(1, 4)]);

        let actions = engine.handle(SyncEvent::OpenRoom { room_id: 1 }).unwrap();

        assert_eq!(actions, vec![
            SyncAction::FetchHistory { room_id: 1 },
            SyncAction::SendFrame { generation, text: r#"{"type":"message.read","chatRoomId":1}"#.into() },
        ]);
        assert_eq!(engine.state().rooms.get(1).unwrap().unread_count, 0);
    }

    #[test]
    fn open_room_is_exempt_from_unread() {
        let (mut engine, _, generation) = connected(vec![room(1, 0), room(2, 0)]);
        engine.handle(SyncEvent::OpenRoom { room_id: 2 }).unwrap();

        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":2,"messageId":1}"#);
        assert_eq!(engine.state().rooms.get(2).unwrap().unread_count, 0);
        assert_eq!(engine.state().messages.messages().len(), 1);

        engine.handle(SyncEvent::OpenRoom { room_id: 1 }).unwrap();
        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":2,"messageId":2}"#);
        assert_eq!(engine.state().rooms.get(2).unwrap().unread_count, 1);
        assert!(engine.state().messages.messages().is_empty());
    }

    #[test]
    fn closing_room_withdraws_stream_handlers() {
        let (mut engine, _, generation) = connected(vec![room(1, 0)]);
        engine.handle(SyncEvent::OpenRoom { room_id: 1 }).unwrap();
        engine.handle(SyncEvent::CloseRoom).unwrap();

        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":1,"messageId":1}"#);

        assert!(engine.state().messages.messages().is_empty());
        assert_eq!(engine.state().rooms.get(1).unwrap().unread_count, 1);
    }

    #[test]
    fn redelivered_message_does_not_count_twice() {
        let (mut engine, _, generation) = connected(vec![room(1, 0), room(2, 0)]);
        let text = r#"{"type":"message.received","chatRoomId":2,"messageId":9}"#;

        frame(&mut engine, generation, text);
        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":1,"messageId":10}"#);
        frame(&mut engine, generation, text);

        assert_eq!(engine.state().rooms.get(2).unwrap().unread_count, 1);
        assert_eq!(room_ids(&engine), vec![1, 2]);
    }

    #[test]
    fn send_trims_and_promotes_room() {
        let (mut engine, _, generation) = connected(vec![room(1, 0), room(2, 0)]);

        let actions = engine.handle(SyncEvent::SendMessage { room_id: 2, content: "  yo ".into() }).unwrap();

        assert_eq!(actions, vec![SyncAction::SendFrame {
            generation,
            text: r#"{"type":"message.send","chatRoomId":2,"content":"yo"}"#.into(),
        }]);
        assert_eq!(room_ids(&engine), vec![2, 1]);
    }

    #[test]
    fn empty_message_is_rejected() {
        let (mut engine, _, _) = connected(vec![room(1, 0)]);

        let err = engine.handle(SyncEvent::SendMessage { room_id: 1, content: " \n".into() }).unwrap_err();

        assert_eq!(err, SyncError::Command(CommandError::EmptyContent));
    }

    #[test]
    fn send_while_disconnected_is_dropped() {
        let (mut engine, _) = engine();

        let actions = engine.handle(SyncEvent::SendMessage { room_id: 1, content: "hi".into() }).unwrap();

        assert!(actions.is_empty());
    }

    #[test]
    fn close_schedules_exactly_one_attempt() {
        let (mut engine, env, generation) = connected(vec![]);

        engine.handle(SyncEvent::TransportClosed { generation, reason: CloseReason::Normal }).unwrap();
        // Duplicate notification for the same transport.
        engine.handle(SyncEvent::TransportFailed { generation, error: "reset".into() }).unwrap();

        env.advance(Duration::from_millis(2_999));
        assert_eq!(opens(&engine.handle(SyncEvent::Tick).unwrap()), 0);

        env.advance(Duration::from_millis(1));
        let actions = engine.handle(SyncEvent::Tick).unwrap();
        assert_eq!(opens(&actions), 1);

        let retry = engine.connection().generation();
        engine.handle(SyncEvent::TransportFailed { generation: retry, error: "refused".into() }).unwrap();
        env.advance(Duration::from_secs(3));
        assert_eq!(opens(&engine.handle(SyncEvent::Tick).unwrap()), 1);
        assert_eq!(opens(&engine.handle(SyncEvent::Tick).unwrap()), 0);
    }

    #[test]
    fn heartbeat_sent_while_open() {
        let (mut engine, env, generation) = connected(vec![]);

        env.advance(Duration::from_secs(30));
        let actions = engine.handle(SyncEvent::Tick).unwrap();

        assert_eq!(actions, vec![SyncAction::SendFrame { generation, text: r#"{"type":"heartbeat"}"#.into() }]);
    }

    #[test]
    fn reconnect_resyncs_rooms_and_history() {
        let (mut engine, env, generation) = connected(vec![room(1, 0)]);
        engine.handle(SyncEvent::OpenRoom { room_id: 1 }).unwrap();
        engine.handle(SyncEvent::HistoryLoaded { room_id: 1, result: Ok(vec![message(1, 0)]) }).unwrap();

        engine.handle(SyncEvent::TransportClosed { generation, reason: CloseReason::Normal }).unwrap();
        env.advance(Duration::from_secs(3));
        engine.handle(SyncEvent::Tick).unwrap();
        let retry = engine.connection().generation();
        let actions = engine.handle(SyncEvent::TransportOpened { generation: retry }).unwrap();

        assert_eq!(actions, vec![
            SyncAction::PhaseChanged(ConnectionPhase::Open),
            SyncAction::FetchRooms,
            SyncAction::FetchHistory { room_id: 1 },
            SyncAction::SendFrame { generation: retry, text: r#"{"type":"message.read","chatRoomId":1}"#.into() },
        ]);
        // Held messages survive until history lands.
        assert_eq!(engine.state().messages.messages().len(), 1);
    }

    #[test]
    fn frames_from_stale_transport_are_dropped() {
        let (mut engine, env, generation) = connected(vec![room(1, 0)]);
        engine.handle(SyncEvent::TransportClosed { generation, reason: CloseReason::Normal }).unwrap();
        env.advance(Duration::from_secs(3));
        engine.handle(SyncEvent::Tick).unwrap();

        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":1,"messageId":1}"#);

        assert_eq!(engine.state().rooms.get(1).unwrap().unread_count, 0);
    }

    #[test]
    fn unauthorized_load_expires_session() {
        let (mut engine, env, generation) = connected(vec![]);

        let actions = engine.handle(SyncEvent::FriendsLoaded(Err(ApiError::Unauthorized))).unwrap();

        assert_eq!(actions, vec![
            SyncAction::CloseTransport { generation, reason: CloseReason::CredentialCleared },
            SyncAction::PhaseChanged(ConnectionPhase::Disconnected),
            SyncAction::SessionExpired,
        ]);
        assert!(engine.handle(SyncEvent::RoomsLoaded(Err(ApiError::Unauthorized))).unwrap().is_empty());

        env.advance(Duration::from_secs(60));
        assert!(engine.handle(SyncEvent::Tick).unwrap().is_empty());
    }

    #[test]
    fn new_credential_reconnects_and_reloads() {
        let (mut engine, _, _) = connected(vec![]);
        engine.handle(SyncEvent::CredentialChanged(None)).unwrap();

        let actions = engine.handle(SyncEvent::CredentialChanged(Some("fresh".into()))).unwrap();

        assert_eq!(opens(&actions), 1);
        assert!(actions.contains(&SyncAction::FetchRooms));
        assert!(actions.contains(&SyncAction::FetchFriends));
    }

    #[test]
    fn direct_room_reloads_and_opens() {
        let (mut engine, _, generation) = connected(vec![]);

        let actions = engine.handle(SyncEvent::OpenDirectRoom { friend_id: 4 }).unwrap();
        assert_eq!(actions, vec![SyncAction::OpenDirectRoom { friend_id: 4 }]);

        let actions = engine.handle(SyncEvent::DirectRoomOpened(Ok(room(9, 0)))).unwrap();
        assert_eq!(actions, vec![
            SyncAction::FetchRooms,
            SyncAction::FetchHistory { room_id: 9 },
            SyncAction::SendFrame { generation, text: r#"{"type":"message.read","chatRoomId":9}"#.into() },
        ]);
        assert_eq!(engine.state().rooms.active(), Some(9));
    }

    #[test]
    fn password_sign_in_stores_token_then_reconnects() {
        let (mut engine, _) = engine();
        engine.handle(SyncEvent::Start).unwrap();
        engine.handle(SyncEvent::CredentialChanged(None)).unwrap();

        let request = chatsync_proto::LoginRequest::new("kim", "pw");
        let actions = engine.handle(SyncEvent::LogIn(request.clone())).unwrap();
        assert_eq!(actions, vec![SyncAction::LogIn(request)]);

        let session = LoginResponse { token: "fresh".into(), user_id: 7, username: "kim".into() };
        let actions = engine.handle(SyncEvent::LoggedIn(Ok(session))).unwrap();

        assert_eq!(actions[0], SyncAction::StoreCredential("fresh".into()));
        assert_eq!(opens(&actions), 1);
        assert!(actions.contains(&SyncAction::FetchFriends));
        assert_eq!(engine.snapshot().account, Some(Account { user_id: 7, username: "kim".into() }));

        engine.handle(SyncEvent::CredentialChanged(None)).unwrap();
        assert_eq!(engine.snapshot().account, None);
    }

    #[test]
    fn failed_sign_in_keeps_the_session() {
        let (mut engine, _, generation) = connected(vec![]);

        let actions = engine.handle(SyncEvent::LoggedIn(Err(ApiError::Unauthorized))).unwrap();

        assert!(actions.is_empty());
        assert_eq!(engine.phase(), ConnectionPhase::Open);
        assert_eq!(engine.connection().generation(), generation);
        assert_eq!(
            engine.handle(SyncEvent::LogIn(chatsync_proto::LoginRequest::new(" ", "pw"))).unwrap_err(),
            SyncError::Command(CommandError::MissingCredentials)
        );
    }

    #[test]
    fn added_friend_reloads_friend_list() {
        let (mut engine, _, _) = connected(vec![]);

        let actions = engine.handle(SyncEvent::AddFriend { username: "  lee ".into() }).unwrap();
        assert_eq!(actions, vec![SyncAction::AddFriend { username: "lee".into() }]);

        let actions = engine.handle(SyncEvent::FriendAdded(Ok(()))).unwrap();
        assert_eq!(actions, vec![SyncAction::FetchFriends]);

        let actions = engine
            .handle(SyncEvent::FriendAdded(Err(ApiError::Status { status: 404, body: String::new() })))
            .unwrap();
        assert!(actions.is_empty());

        let err = engine.handle(SyncEvent::AddFriend { username: " ".into() }).unwrap_err();
        assert_eq!(err, SyncError::Command(CommandError::EmptyUsername));
    }

    #[test]
    fn presence_updates_friends() {
        let (mut engine, _, generation) = connected(vec![]);
        engine
            .handle(SyncEvent::FriendsLoaded(Ok(vec![chatsync_proto::Friend {
                id: 4,
                username: "lee".into(),
                online: false,
            }])))
            .unwrap();

        frame(&mut engine, generation, r#"{"type":"user.status","senderId":4,"online":true}"#);

        assert_eq!(engine.state().presence.is_online(4), Some(true));
    }

    #[test]
    fn external_handler_runs_after_engine_handlers() {
        let (mut engine, _, generation) = connected(vec![room(1, 0)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.subscribe(EventKind::MessageReceived, "test", move |state, _| {
            sink.lock().unwrap().push(state.rooms.get(1).map(|r| r.unread_count));
            Ok(Vec::new())
        });

        frame(&mut engine, generation, r#"{"type":"message.received","chatRoomId":1,"messageId":1}"#);

        assert_eq!(*seen.lock().unwrap(), vec![Some(1)]);
    }

    #[test]
    fn shutdown_stops_everything() {
        let (mut engine, env, generation) = connected(vec![]);

        let actions = engine.handle(SyncEvent::Shutdown).unwrap();
        assert!(actions.contains(&SyncAction::CloseTransport { generation, reason: CloseReason::Shutdown }));

        env.advance(Duration::from_secs(120));
        assert!(engine.handle(SyncEvent::Tick).unwrap().is_empty());
        assert_eq!(engine.time_until_next_timer(), None);
    }
}
