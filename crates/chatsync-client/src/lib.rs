//! Client
//!
//! Runs the Sans-IO [`SyncEngine`](chatsync_core::SyncEngine) against real
//! I/O: a WebSocket per connection attempt (tokio-tungstenite), the
//! request/response API over HTTP (reqwest), and tokio timers.
//!
//! # Architecture
//!
//! ```text
//! ClientHandle --intents--> TokioDriver <--events-- transport tasks / API tasks
//!                                |
//!                             Runtime --handle()--> SyncEngine
//!                                |
//!            watch::Receiver <--publish-- SyncSnapshot
//! ```
//!
//! The [`Runtime`] is generic over a [`Driver`], so the simulation harness
//! runs the same loop with a scripted driver and a manual clock.
//!
//! # Components
//!
//! - [`spawn_client`]: build everything and run it on a task
//! - [`ClientHandle`]: intents in, snapshots out
//! - [`Runtime`]: the event loop
//! - [`TokioDriver`]: production [`Driver`]
//! - [`HttpApi`]: reqwest implementation of [`ChatApi`](chatsync_core::ChatApi)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod handle;
pub mod http;
pub mod runtime;
pub mod tokio_driver;
pub mod transport;

pub use config::ClientConfig;
pub use driver::{ApiRequest, Driver, Input};
pub use env::SystemEnv;
pub use error::{RuntimeError, TransportError};
pub use handle::{ClientHandle, ClientTask, Intent, spawn_client, spawn_client_with};
pub use http::HttpApi;
pub use runtime::Runtime;
pub use tokio_driver::TokioDriver;
