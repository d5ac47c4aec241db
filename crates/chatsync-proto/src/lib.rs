//! Protocol
//!
//! Wire schema shared by every chatsync crate: the JSON text frames exchanged
//! over the realtime connection and the resources returned by the
//! request/response API.
//!
//! # Frames
//!
//! Every frame is a single JSON object with a `type` discriminator and a flat
//! set of optional fields. [`WireFrame`] is the untyped envelope; inbound
//! frames are lifted into [`InboundEvent`] and local intents are lowered from
//! [`OutboundCommand`].
//!
//! # Resources
//!
//! [`Room`], [`Message`] and [`Friend`] mirror the collaborator API's JSON
//! bodies and double as the client's in-memory model. [`LoginRequest`],
//! [`LoginResponse`], [`AddFriendRequest`] and [`CreateRoomRequest`] are
//! request and response bodies only.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod frame;
mod inbound;
mod outbound;
mod resources;

pub use errors::{ProtocolError, Result};
pub use frame::{FrameKind, WireFrame};
pub use inbound::{EventKind, InboundEvent, MessageReceived, MessageUpdated, MessagesRead, UserStatus};
pub use outbound::OutboundCommand;
pub use resources::{
    AddFriendRequest, CreateRoomRequest, Friend, LoginRequest, LoginResponse, Message, Room, RoomKind,
};

/// Server-assigned chat room identifier.
pub type RoomId = u64;

/// Server-assigned message identifier. Increases monotonically within a room.
pub type MessageId = u64;

/// Server-assigned user identifier.
pub type UserId = u64;
