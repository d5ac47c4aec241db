//! End-to-end scenarios on virtual time.
//!
//! Each test scripts the server side on a [`SimDriver`] timeline, runs the
//! production runtime loop to completion and inspects what the client wrote
//! and published.

use std::time::Duration;

use chatsync_client::ApiRequest;
use chatsync_core::{Account, ConnectionPhase, SyncEvent};
use chatsync_harness::{
    InvariantRegistry, NeverOpenWhileDisconnected, SimBackend, SimConfig, SimDriver, Simulation,
};
use chatsync_proto::{Friend, LoginRequest, Message, MessageId, Room, RoomId, RoomKind};
use chrono::{DateTime, NaiveDateTime};
use serde_json::json;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn ms(m: u64) -> Duration {
    Duration::from_millis(m)
}

fn epoch() -> NaiveDateTime {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap().naive_utc()
}

fn room(id: RoomId, unread: u32) -> Room {
    Room { id, kind: RoomKind::Group, members: vec!["kim".into(), "lee".into()], unread_count: unread, created_at: epoch() }
}

fn message(id: MessageId, unread: u32) -> Message {
    Message {
        id,
        sender_id: Some(7),
        sender_name: Some("kim".into()),
        content: Some(format!("message {id}")),
        unread_count: unread,
        edited: false,
        deleted: false,
        created_at: epoch(),
    }
}

fn received(room_id: RoomId, message_id: MessageId, unread: u32) -> String {
    json!({
        "type": "message.received",
        "chatRoomId": room_id,
        "senderId": 7,
        "senderName": "kim",
        "content": format!("message {message_id}"),
        "messageId": message_id,
        "unreadCount": unread,
    })
    .to_string()
}

fn read_receipt(room_id: RoomId, up_to: MessageId) -> String {
    json!({ "type": "messages.read", "chatRoomId": room_id, "senderId": 8, "messageId": up_to }).to_string()
}

async fn run(sim: Simulation) -> SimDriver {
    let driver = sim.run().await.unwrap();
    assert!(driver.violations().is_empty(), "invariant violations: {:?}", driver.violations());
    driver
}

#[tokio::test]
async fn push_moves_room_to_front_with_unread() {
    let backend = SimBackend { rooms: vec![room(2, 0), room(1, 0)], ..SimBackend::default() };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().push_frame(secs(1), received(1, 100, 1));
    sim.driver().shutdown_at(secs(2));

    let driver = run(sim).await;

    let snapshot = driver.latest().unwrap();
    assert_eq!(snapshot.rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(snapshot.room(1).unwrap().unread_count, 1);
    assert_eq!(snapshot.room(2).unwrap().unread_count, 0);
}

#[tokio::test]
async fn unknown_room_triggers_one_reload() {
    let backend = SimBackend { rooms: vec![room(1, 0)], ..SimBackend::default() };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().set_rooms_at(ms(500), vec![room(9, 1), room(1, 0)]);
    sim.driver().push_frame(secs(1), received(9, 1, 1));
    sim.driver().push_frame(secs(1), received(9, 2, 1));
    sim.driver().shutdown_at(secs(2));

    let driver = run(sim).await;

    let reloads = driver.requests().iter().filter(|r| **r == ApiRequest::Rooms).count();
    assert_eq!(reloads, 2, "initial load plus one coalesced reload");
    assert_eq!(driver.latest().unwrap().rooms.first().map(|r| r.id), Some(9));
}

#[tokio::test]
async fn read_receipt_decrements_prefix() {
    let backend = SimBackend {
        rooms: vec![room(5, 0)],
        histories: [(5, vec![message(10, 2), message(11, 2), message(12, 2)])].into(),
        ..SimBackend::default()
    };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().schedule(secs(1), SyncEvent::OpenRoom { room_id: 5 });
    sim.driver().push_frame(secs(2), read_receipt(5, 11));
    sim.driver().shutdown_at(secs(3));

    let driver = run(sim).await;

    let snapshot = driver.latest().unwrap();
    let unread: Vec<_> = snapshot.messages.iter().map(|m| (m.id, m.unread_count)).collect();
    assert_eq!(unread, vec![(10, 1), (11, 1), (12, 2)]);
}

#[tokio::test]
async fn open_room_marks_read_and_stays_exempt() {
    let backend = SimBackend {
        rooms: vec![room(1, 4), room(2, 1)],
        histories: [(1, vec![message(1, 0)])].into(),
        ..SimBackend::default()
    };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().schedule(secs(1), SyncEvent::OpenRoom { room_id: 1 });
    sim.driver().push_frame(secs(2), received(1, 2, 1));
    sim.driver().push_frame(secs(2), received(2, 50, 1));
    sim.driver().shutdown_at(secs(3));

    let driver = run(sim).await;

    assert!(driver.sent_texts().contains(&r#"{"type":"message.read","chatRoomId":1}"#.to_string()));
    let snapshot = driver.latest().unwrap();
    assert_eq!(snapshot.active_room, Some(1));
    assert_eq!(snapshot.room(1).unwrap().unread_count, 0);
    assert_eq!(snapshot.room(2).unwrap().unread_count, 2);
    assert_eq!(snapshot.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn room_opened_while_connecting_is_marked_read_on_open() {
    let backend = SimBackend { rooms: vec![room(3, 2)], ..SimBackend::default() };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    // Handshake completes at 50ms.
    sim.driver().schedule(ms(10), SyncEvent::OpenRoom { room_id: 3 });
    sim.driver().shutdown_at(secs(1));

    let driver = run(sim).await;

    assert_eq!(driver.sent_texts(), vec![r#"{"type":"message.read","chatRoomId":3}"#.to_string()]);
}

#[tokio::test]
async fn send_message_writes_trimmed_frame() {
    let backend = SimBackend { rooms: vec![room(2, 0), room(4, 0)], ..SimBackend::default() };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().schedule(secs(1), SyncEvent::SendMessage { room_id: 4, content: "  hi there ".into() });
    sim.driver().schedule(secs(1), SyncEvent::SendMessage { room_id: 4, content: "   ".into() });
    sim.driver().shutdown_at(secs(2));

    let driver = run(sim).await;

    assert_eq!(driver.sent_texts(), vec![
        r#"{"type":"message.send","chatRoomId":4,"content":"hi there"}"#.to_string()
    ]);
    assert_eq!(driver.latest().unwrap().rooms.first().map(|r| r.id), Some(4));
}

#[tokio::test]
async fn send_while_disconnected_is_dropped() {
    let sim = Simulation::new(Simulation::config(), Some("tok"), SimBackend::default()).unwrap();
    sim.driver().refuse_connects(usize::MAX);
    sim.driver().schedule(secs(1), SyncEvent::SendMessage { room_id: 1, content: "hello".into() });
    sim.driver().shutdown_at(secs(2));

    let driver = run(sim).await;

    assert!(driver.sent().is_empty());
}

#[tokio::test]
async fn heartbeat_every_interval_while_open() {
    let sim = Simulation::new(Simulation::config(), Some("tok"), SimBackend::default()).unwrap();
    sim.driver().shutdown_at(secs(95));

    let driver = run(sim).await;

    let heartbeats = driver.sent_texts().iter().filter(|t| *t == r#"{"type":"heartbeat"}"#).count();
    assert_eq!(heartbeats, 3);
}

#[tokio::test]
async fn no_heartbeat_while_disconnected() {
    let sim = Simulation::new(Simulation::config(), Some("tok"), SimBackend::default()).unwrap();
    // Open at 50ms, one heartbeat at 30.05s, dropped at 40s, every reconnect refused.
    sim.driver().drop_transport(secs(40));
    for generation in 2..=40 {
        sim.driver().refuse_generation(generation);
    }
    sim.driver().shutdown_at(secs(100));

    let driver = run(sim).await;

    assert_eq!(driver.sent_texts(), vec![r#"{"type":"heartbeat"}"#.to_string()]);
    assert!(driver.opened().len() > 10);
}

#[tokio::test]
async fn close_then_refusal_retries_at_fixed_delay() {
    let sim = Simulation::new(Simulation::config(), Some("tok"), SimBackend::default()).unwrap();
    sim.driver().drop_transport(secs(1));
    sim.driver().refuse_generation(2);
    sim.driver().shutdown_at(secs(10));

    let driver = run(sim).await;

    let attempts: Vec<_> = driver.opened().iter().map(|o| (o.generation, o.at)).collect();
    assert_eq!(attempts, vec![(1, Duration::ZERO), (2, secs(4)), (3, ms(7050))]);
    assert!(driver.opened().iter().all(|o| o.url == "ws://sim.local/ws?token=tok"));
    assert_eq!(driver.closed().last(), Some(&3), "shutdown closes the live attempt");
}

#[tokio::test]
async fn reconnect_resyncs_rooms_and_open_history() {
    let backend = SimBackend {
        rooms: vec![room(1, 0)],
        histories: [(1, vec![message(1, 0), message(2, 0)])].into(),
        ..SimBackend::default()
    };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().schedule(secs(1), SyncEvent::OpenRoom { room_id: 1 });
    // Message 3 is posted while the client is away.
    sim.driver().drop_transport(secs(2));
    sim.driver().set_history_at(secs(3), 1, vec![message(1, 0), message(2, 0), message(3, 1)]);
    sim.driver().shutdown_at(secs(10));

    let driver = run(sim).await;

    let requests = driver.requests();
    assert_eq!(requests.iter().filter(|r| **r == ApiRequest::Rooms).count(), 2);
    assert_eq!(requests.iter().filter(|r| **r == ApiRequest::History { room_id: 1 }).count(), 2);

    let reads = driver.sent_texts().iter().filter(|t| *t == r#"{"type":"message.read","chatRoomId":1}"#).count();
    assert_eq!(reads, 2, "marked read on open and again after reconnect");

    let snapshot = driver.latest().unwrap();
    assert_eq!(snapshot.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn direct_room_is_created_and_opened() {
    let backend = SimBackend {
        rooms: vec![room(1, 0)],
        direct_rooms: [(7, Room { kind: RoomKind::Direct, ..room(9, 0) })].into(),
        ..SimBackend::default()
    };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().update_backend(|b| b.rooms.insert(0, Room { kind: RoomKind::Direct, ..room(9, 0) }));
    sim.driver().schedule(secs(1), SyncEvent::OpenDirectRoom { friend_id: 7 });
    sim.driver().shutdown_at(secs(2));

    let driver = run(sim).await;

    assert!(driver.requests().contains(&ApiRequest::OpenDirectRoom { friend_id: 7 }));
    assert!(driver.requests().contains(&ApiRequest::History { room_id: 9 }));
    let snapshot = driver.latest().unwrap();
    assert_eq!(snapshot.active_room, Some(9));
    assert!(snapshot.room(9).is_some());
}

#[tokio::test]
async fn rejected_credential_expires_session_once() {
    let backend = SimBackend { rooms: vec![room(1, 0)], reject_credentials: true, ..SimBackend::default() };
    let mut registry = InvariantRegistry::standard();
    registry.add(NeverOpenWhileDisconnected::new(true));
    let sim =
        Simulation::with_registry(Simulation::config(), Some("tok"), backend, SimConfig::default(), registry)
            .unwrap();
    sim.driver().shutdown_at(secs(30));

    let driver = run(sim).await;

    assert_eq!(driver.credential_clears(), 1);
    assert_eq!(driver.latest().unwrap().phase, ConnectionPhase::Disconnected);
    assert!(driver.opened().len() <= 1, "no reconnect without a credential: {:?}", driver.opened());
}

#[tokio::test]
async fn sign_in_after_expiry_reconnects_and_reloads() {
    let sim = Simulation::new(Simulation::config(), None, SimBackend { rooms: vec![room(1, 0)], ..SimBackend::default() })
        .unwrap();
    sim.driver().schedule(secs(5), SyncEvent::CredentialChanged(Some("fresh".into())));
    sim.driver().shutdown_at(secs(6));

    let driver = run(sim).await;

    let opened = driver.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].url, "ws://sim.local/ws?token=fresh");
    assert_eq!(opened[0].at, secs(5));
    assert_eq!(driver.requests().iter().filter(|r| **r == ApiRequest::Rooms).count(), 2);
}

#[tokio::test]
async fn malformed_frames_do_not_disturb_state() {
    let backend = SimBackend { rooms: vec![room(1, 0)], ..SimBackend::default() };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().push_frame(secs(1), "not json");
    sim.driver().push_frame(secs(1), r#"{"type":"message.received","chatRoomId":1}"#);
    sim.driver().push_frame(secs(1), r#"{"type":"room.invite","chatRoomId":1}"#);
    sim.driver().push_frame(secs(2), received(1, 5, 1));
    sim.driver().shutdown_at(secs(3));

    let driver = run(sim).await;

    assert_eq!(driver.latest().unwrap().room(1).unwrap().unread_count, 1);
}

#[tokio::test]
async fn password_sign_in_connects_with_issued_token() {
    let backend = SimBackend {
        rooms: vec![room(1, 0)],
        accounts: [("kim".to_string(), (7, "pw".to_string()))].into(),
        ..SimBackend::default()
    };
    let sim = Simulation::new(Simulation::config(), None, backend).unwrap();
    sim.driver().schedule(secs(1), SyncEvent::LogIn(LoginRequest::new("kim", "wrong")));
    sim.driver().schedule(secs(2), SyncEvent::LogIn(LoginRequest::new("kim", "pw")));
    sim.driver().shutdown_at(secs(3));

    let driver = run(sim).await;

    assert_eq!(driver.stored_credentials(), vec!["kim-token".to_string()]);
    let opened = driver.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].url, "ws://sim.local/ws?token=kim-token");
    let snapshot = driver.latest().unwrap();
    assert_eq!(snapshot.phase, ConnectionPhase::Open);
    assert_eq!(snapshot.account, Some(Account { user_id: 7, username: "kim".into() }));
    assert_eq!(driver.credential_clears(), 0);
}

#[tokio::test]
async fn added_friend_appears_after_reload() {
    let lee = Friend { id: 8, username: "lee".into(), online: true };
    let backend = SimBackend { strangers: vec![lee.clone()], ..SimBackend::default() };
    let sim = Simulation::new(Simulation::config(), Some("tok"), backend).unwrap();
    sim.driver().schedule(secs(1), SyncEvent::AddFriend { username: "park".into() });
    sim.driver().schedule(secs(2), SyncEvent::AddFriend { username: " lee ".into() });
    sim.driver().shutdown_at(secs(3));

    let driver = run(sim).await;

    let requests = driver.requests();
    assert!(requests.contains(&ApiRequest::AddFriend { username: "lee".into() }));
    // Initial load plus one reload; the failed add does not reload.
    assert_eq!(requests.iter().filter(|r| **r == ApiRequest::Friends).count(), 2);
    assert_eq!(driver.latest().unwrap().friends, vec![lee]);
}
