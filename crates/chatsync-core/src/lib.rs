//! Core
//!
//! Sans-IO synchronization logic for a realtime chat client: the connection
//! lifecycle, inbound event routing, and the reconcilers that keep the room
//! list and the open room's messages consistent with server pushes.
//!
//! # Architecture
//!
//! Every component is a pure state machine. Methods take the current time as
//! input and return actions for a driver to execute; nothing here opens a
//! socket, spawns a task or reads a clock. The [`SyncEngine`] composes the
//! components behind a single `handle(event) -> actions` entry point, and the
//! client crate's runtime drives it with real I/O.
//!
//! # Components
//!
//! - [`ConnectionManager`]: connect, heartbeat, reconnect, shutdown
//! - [`Dispatcher`]: decode frames and fan out to subscribed handlers
//! - [`RoomReconciler`]: recency order and unread counters
//! - [`MessageStreamReconciler`]: ordered, deduplicated messages of the open room
//! - [`PresenceTracker`]: friend online flags
//! - [`outbound`]: encode `message.send`, `message.read` and `heartbeat`
//! - [`SyncEngine`]: all of the above behind [`SyncEvent`] / [`SyncAction`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod api;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod env;
pub mod error;
pub mod event;
pub mod messages;
pub mod outbound;
pub mod presence;
pub mod reconnect;
pub mod rooms;
pub mod state;

pub use api::{ChatApi, CredentialStore, SharedCredentials};
pub use connection::{
    CloseReason, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionPhase,
};
pub use dispatch::{Delivery, Dispatcher, HandlerResult, SubscriberOwner, SubscriptionId};
pub use engine::{SyncConfig, SyncEngine};
pub use env::Environment;
pub use error::{ApiError, CommandError, ConnectionError, HandlerError, SyncError};
pub use event::{SyncAction, SyncEvent};
pub use messages::{MessageStreamReconciler, StreamChange};
pub use presence::PresenceTracker;
pub use reconnect::ReconnectPolicy;
pub use rooms::{RoomChange, RoomReconciler};
pub use state::{Account, SyncSnapshot, SyncState};
