//! Property-based tests for frame decoding.
//!
//! Decoding is the boundary between the network and the reconcilers, so it
//! must never panic on hostile input and must preserve every field it
//! accepts.

use chatsync_proto::{
    EventKind, InboundEvent, MessageReceived, MessageUpdated, MessagesRead, OutboundCommand,
    UserStatus, WireFrame,
};
use proptest::prelude::*;

/// Strategy for generating arbitrary inbound events.
fn arbitrary_event() -> impl Strategy<Value = InboundEvent> {
    prop_oneof![
        (
            any::<u64>(),
            any::<u64>(),
            proptest::option::of(any::<u64>()),
            proptest::option::of("[a-z]{1,12}"),
            ".{0,64}",
            proptest::option::of(0u32..100),
        )
            .prop_map(|(room_id, message_id, sender_id, sender_name, content, unread_count)| {
                InboundEvent::MessageReceived(MessageReceived {
                    room_id,
                    message_id,
                    sender_id,
                    sender_name,
                    content,
                    unread_count,
                })
            }),
        (any::<u64>(), any::<u64>(), proptest::option::of(0u32..100)).prop_map(
            |(room_id, message_id, unread_count)| {
                InboundEvent::MessageUpdated(MessageUpdated { room_id, message_id, unread_count })
            }
        ),
        (any::<u64>(), proptest::option::of(any::<u64>()), proptest::option::of(any::<u64>()))
            .prop_map(|(room_id, reader_id, message_id)| {
                InboundEvent::MessagesRead(MessagesRead { room_id, reader_id, message_id })
            }),
        (any::<u64>(), proptest::option::of("[a-z]{1,12}"), any::<bool>()).prop_map(
            |(user_id, username, online)| {
                InboundEvent::UserStatus(UserStatus { user_id, username, online })
            }
        ),
    ]
}

proptest! {
    #[test]
    fn prop_inbound_events_survive_the_wire(event in arbitrary_event()) {
        let text = event.encode().expect("encode should succeed");
        let decoded = InboundEvent::decode(&text).expect("decode should succeed");

        prop_assert_eq!(decoded, event);
    }

    #[test]
    fn prop_decode_never_panics(text in ".{0,256}") {
        let _ = InboundEvent::decode(&text);
    }

    #[test]
    fn prop_decode_never_panics_on_json_objects(
        kind in "[a-z.]{0,20}",
        room in proptest::option::of(any::<i64>()),
        message in proptest::option::of(any::<i64>()),
    ) {
        let mut object = serde_json::Map::new();
        object.insert("type".into(), kind.into());
        if let Some(room) = room {
            object.insert("chatRoomId".into(), room.into());
        }
        if let Some(message) = message {
            object.insert("messageId".into(), message.into());
        }
        let text = serde_json::Value::Object(object).to_string();

        if let Ok(event) = InboundEvent::decode(&text) {
            prop_assert!(EventKind::ALL.contains(&event.kind()));
        }
    }

    #[test]
    fn prop_outbound_commands_are_never_inbound(room_id in any::<u64>(), content in ".{1,32}") {
        let commands = [
            OutboundCommand::SendMessage { room_id, content },
            OutboundCommand::MarkRead { room_id },
            OutboundCommand::Heartbeat,
        ];
        for command in commands {
            let frame = WireFrame::decode(&command.encode().expect("encode")).expect("decode");
            prop_assert_eq!(frame.kind, command.kind());
            prop_assert!(InboundEvent::from_wire(frame).is_err());
        }
    }
}
