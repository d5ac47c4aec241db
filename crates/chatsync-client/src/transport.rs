//! WebSocket transport.
//!
//! Each establishment attempt runs in its own task: it connects, then
//! bridges the socket to channels. Outbound frames arrive on an mpsc queue;
//! everything the socket reports is forwarded to the runtime as
//! [`SyncEvent`]s tagged with the attempt's generation. Protocol logic stays
//! in the Sans-IO engine.

use chatsync_core::{CloseReason, SyncEvent};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, trace, warn};

use crate::error::TransportError;

/// Commands from the runtime to a transport task.
#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

/// Handle to a transport task.
#[derive(Debug)]
pub struct TransportHandle {
    generation: u64,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    /// Generation this transport belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame. Frames queued before the socket opens are dropped.
    ///
    /// # Errors
    ///
    /// - `TransportError::Stream` if the queue is full or the task has ended
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.commands.try_send(Command::Send(text)).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Stream("outbound queue full".into()),
            TrySendError::Closed(_) => TransportError::Stream("transport task ended".into()),
        })
    }

    /// Close the socket gracefully. The task reports nothing further.
    ///
    /// A task too backed up to take the close request is aborted instead.
    pub fn close(self) {
        match self.commands.try_send(Command::Close) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => self.task.abort(),
            Err(TrySendError::Closed(_)) => {
                trace!(generation = self.generation, "transport already ended");
            },
        }
    }

    /// Stop the task without a close handshake.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn a transport task for `generation`.
pub fn spawn(
    generation: u64,
    url: String,
    events: mpsc::Sender<SyncEvent>,
    capacity: usize,
) -> TransportHandle {
    let (commands, command_rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_transport(generation, url, command_rx, events));
    TransportHandle { generation, commands, task }
}

async fn run_transport(
    generation: u64,
    url: String,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SyncEvent>,
) {
    debug!(generation, "connecting");

    let connected = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
        // Closed (or handle dropped) before the handshake finished.
        _ = wait_for_close(&mut commands) => {
            debug!(generation, "closed during handshake");
            return;
        },
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(err) => {
            let event = match TransportError::from_handshake(err) {
                TransportError::AuthRejected { status } => {
                    warn!(generation, status, "token rejected during handshake");
                    SyncEvent::TransportClosed { generation, reason: CloseReason::AuthRejected }
                },
                err => SyncEvent::TransportFailed { generation, error: err.to_string() },
            };
            let _ = events.send(event).await;
            return;
        },
    };

    if events.send(SyncEvent::TransportOpened { generation }).await.is_err() {
        return;
    }

    let (mut ws_write, mut ws_read) = ws_stream.split();

    let outcome = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(err) = ws_write.send(Message::Text(text.into())).await {
                        break Some(SyncEvent::TransportFailed { generation, error: err.to_string() });
                    }
                },
                Some(Command::Close) | None => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    let _ = ws_write.close().await;
                    break None;
                },
            },
            message = ws_read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let event = SyncEvent::FrameReceived { generation, text: text.to_string() };
                    if events.send(event).await.is_err() {
                        break None;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(generation, ?frame, "peer closed");
                    break Some(SyncEvent::TransportClosed { generation, reason: CloseReason::Normal });
                },
                Some(Ok(Message::Binary(_))) => trace!(generation, "binary frame ignored"),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                Some(Err(err)) => {
                    break Some(SyncEvent::TransportFailed { generation, error: stream_error(&err) });
                },
                None => {
                    break Some(SyncEvent::TransportClosed { generation, reason: CloseReason::Normal });
                },
            },
        }
    };

    if let Some(event) = outcome {
        let _ = events.send(event).await;
    }
}

/// Resolve once a close is requested or the handle is dropped.
async fn wait_for_close(commands: &mut mpsc::Receiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Close) | None => return,
            Some(Command::Send(_)) => trace!("send before open dropped"),
        }
    }
}

fn stream_error(err: &tungstenite::Error) -> String {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            "connection closed".to_string()
        },
        other => other.to_string(),
    }
}
