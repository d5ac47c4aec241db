//! Realtime connection lifecycle.
//!
//! Owns the single websocket connection: establishment with the session
//! token, the heartbeat timer while open, and the reconnect loop after a
//! close. Uses the action pattern: methods take time as input and return
//! actions for the driver to execute, so the manager never touches a socket.
//!
//! # State Machine
//!
//! ```text
//!                 connect            opened
//! ┌──────────────┐───────>┌────────────┐──────>┌──────┐
//! │ Disconnected │        │ Connecting │       │ Open │
//! └──────────────┘<───┐   └────────────┘       └──────┘
//!        ^            │      │    ^               │
//!        │ no token / │      │    │ delay elapsed │
//!        │ shutdown   │ close│    │               │ close/error
//!        │            │      v    │               │
//!        │         ┌──────────────────┐           │
//!        └─────────│ ReconnectPending │<──────────┘
//!                  └──────────────────┘
//! ```
//!
//! Every establishment attempt gets a fresh generation number. Transport
//! notifications carry the generation they belong to; notifications from a
//! superseded attempt are ignored, so a late close from an old socket can
//! never tear down its replacement.

use std::{
    fmt,
    ops::Sub,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};
use url::Url;

use crate::{error::ConnectionError, reconnect::ReconnectPolicy};

/// Interval at which a heartbeat is sent while the connection is open.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Time allowed for the transport to report the connection as open.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameter carrying the session token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Lifecycle phase of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// No connection and no attempt scheduled
    Disconnected,
    /// Establishment requested, waiting for the transport to open
    Connecting,
    /// Connection open; frames may be sent
    Open,
    /// Connection closed; a new attempt is scheduled
    ReconnectPending,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ReconnectPending => "reconnect-pending",
        };
        f.write_str(name)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection cleanly
    Normal,
    /// Server refused the session token during establishment
    AuthRejected,
    /// Transport reported an error
    Error(String),
    /// Transport did not open within the handshake timeout
    HandshakeTimeout,
    /// No inbound traffic within the idle timeout
    IdleTimeout,
    /// Session token was cleared
    CredentialCleared,
    /// Local shutdown
    Shutdown,
}

impl CloseReason {
    /// Returns true if the close was requested locally.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::CredentialCleared | Self::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("closed by peer"),
            Self::AuthRejected => f.write_str("token rejected"),
            Self::Error(message) => write!(f, "transport error: {message}"),
            Self::HandshakeTimeout => f.write_str("handshake timeout"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::CredentialCleared => f.write_str("credential cleared"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Actions returned by the connection manager.
///
/// The driver executes these:
/// - `Open`: establish a transport to `url`, tagged with `generation`
/// - `Send`: write a text frame on the transport of `generation`
/// - `Heartbeat`: encode and send a heartbeat on the transport of `generation`
/// - `Close`: tear down the transport of `generation`
/// - `PhaseChanged`: the lifecycle phase changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Establish a new transport
    Open {
        /// Attempt this transport belongs to
        generation: u64,
        /// Endpoint with the session token attached
        url: String,
    },
    /// Write a text frame
    Send {
        /// Transport to write on
        generation: u64,
        /// Encoded frame
        frame: String,
    },
    /// Heartbeat timer fired
    Heartbeat {
        /// Transport to write on
        generation: u64,
    },
    /// Tear down a transport
    Close {
        /// Transport to close
        generation: u64,
        /// Why it is being closed
        reason: CloseReason,
    },
    /// Lifecycle phase changed
    PhaseChanged(ConnectionPhase),
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Interval between heartbeats while open
    pub heartbeat_interval: Duration,
    /// Time allowed for the transport to open
    pub handshake_timeout: Duration,
    /// Close the connection after this long without inbound traffic.
    /// `None` disables the check.
    pub idle_timeout: Option<Duration>,
    /// Delay schedule for reconnect attempts
    pub reconnect: ReconnectPolicy,
    /// Stay disconnected after the server rejects the token instead of
    /// retrying with the same token
    pub stop_on_auth_rejection: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: None,
            reconnect: ReconnectPolicy::default(),
            stop_on_auth_rejection: false,
        }
    }
}

/// Connection manager.
///
/// Pure state machine: no I/O, no Environment storage. Time is passed as
/// parameters to methods that need it.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    phase: ConnectionPhase,
    config: ConnectionConfig,
    endpoint: Url,
    token: Option<String>,
    /// Generation of the current (or most recent) attempt
    generation: u64,
    /// When the current phase was entered
    phase_since: I,
    /// Heartbeat timer anchor while open
    last_heartbeat: Option<I>,
    /// Last inbound frame on the current transport
    last_inbound: I,
    /// Delay of the pending reconnect
    reconnect_delay: Duration,
    /// Consecutive closes since the last successful open
    failures: u32,
    /// Number of times a transport reached Open
    opens: u64,
    shut_down: bool,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a manager in [`ConnectionPhase::Disconnected`].
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidEndpoint` if `endpoint` does not parse
    /// - `ConnectionError::UnsupportedScheme` if it is not `ws`/`wss`
    /// - `ConnectionError::ZeroHeartbeat` if the heartbeat interval is zero
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        config: ConnectionConfig,
        now: I,
    ) -> Result<Self, ConnectionError> {
        let endpoint = Url::parse(endpoint).map_err(|err| ConnectionError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        })?;

        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConnectionError::UnsupportedScheme(endpoint.scheme().to_string()));
        }

        if config.heartbeat_interval.is_zero() {
            return Err(ConnectionError::ZeroHeartbeat(config.heartbeat_interval));
        }

        Ok(Self {
            phase: ConnectionPhase::Disconnected,
            config,
            endpoint,
            token,
            generation: 0,
            phase_since: now,
            last_heartbeat: None,
            last_inbound: now,
            reconnect_delay: Duration::ZERO,
            failures: 0,
            opens: 0,
            shut_down: false,
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Generation of the current (or most recent) establishment attempt.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if a session token is held.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Consecutive closes since the last successful open.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Number of times a transport reached Open.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.opens
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Endpoint URL with the token attached, or `None` without a token.
    #[must_use]
    pub fn connection_url(&self) -> Option<String> {
        let token = self.token.as_deref()?;
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        Some(url.into())
    }

    /// Begin establishing a connection.
    ///
    /// No-op without a token, after shutdown, or while an attempt is
    /// already in flight or open.
    pub fn connect(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.shut_down {
            debug!("connect ignored after shutdown");
            return Vec::new();
        }

        if matches!(self.phase, ConnectionPhase::Connecting | ConnectionPhase::Open) {
            debug!(phase = %self.phase, "connect ignored, attempt already active");
            return Vec::new();
        }

        let Some(url) = self.connection_url() else {
            debug!("connect ignored, no session token");
            return Vec::new();
        };

        self.generation += 1;
        self.enter(ConnectionPhase::Connecting, now);

        debug!(generation = self.generation, "opening connection");

        vec![
            ConnectionAction::PhaseChanged(ConnectionPhase::Connecting),
            ConnectionAction::Open { generation: self.generation, url },
        ]
    }

    /// Transport of `generation` reports the connection open.
    pub fn handle_opened(&mut self, generation: u64, now: I) -> Vec<ConnectionAction> {
        if generation != self.generation || self.phase != ConnectionPhase::Connecting {
            debug!(generation, current = self.generation, phase = %self.phase, "stale open ignored");
            return Vec::new();
        }

        self.enter(ConnectionPhase::Open, now);
        self.last_heartbeat = Some(now);
        self.last_inbound = now;
        self.failures = 0;
        self.opens += 1;

        info!(generation, "connection open");

        vec![ConnectionAction::PhaseChanged(ConnectionPhase::Open)]
    }

    /// Inbound traffic arrived on the transport of `generation`.
    pub fn record_inbound(&mut self, generation: u64, now: I) {
        if generation == self.generation && self.phase == ConnectionPhase::Open {
            self.last_inbound = now;
        }
    }

    /// Transport of `generation` closed.
    pub fn handle_closed(
        &mut self,
        generation: u64,
        reason: CloseReason,
        now: I,
    ) -> Vec<ConnectionAction> {
        if !self.is_live(generation) {
            debug!(generation, current = self.generation, %reason, "stale close ignored");
            return Vec::new();
        }

        self.disconnect(reason, false, now)
    }

    /// Transport of `generation` reported an error.
    ///
    /// The transport is closed explicitly; reconnect then follows as for any
    /// other close.
    pub fn handle_error(
        &mut self,
        generation: u64,
        error: impl Into<String>,
        now: I,
    ) -> Vec<ConnectionAction> {
        if !self.is_live(generation) {
            debug!(generation, current = self.generation, "stale error ignored");
            return Vec::new();
        }

        self.disconnect(CloseReason::Error(error.into()), true, now)
    }

    /// Send a frame if the connection is open.
    ///
    /// Returns `None` (the frame is dropped) in any other phase.
    pub fn send(&mut self, frame: String) -> Option<ConnectionAction> {
        if self.phase != ConnectionPhase::Open {
            debug!(phase = %self.phase, "send dropped, connection not open");
            return None;
        }

        Some(ConnectionAction::Send { generation: self.generation, frame })
    }

    /// Replace the session token.
    ///
    /// Clearing the token closes any live connection and stops the reconnect
    /// loop. Supplying a token while disconnected starts a connection; while
    /// connecting or open, the new token is used from the next attempt.
    pub fn set_token(&mut self, token: Option<String>, now: I) -> Vec<ConnectionAction> {
        self.token = token;

        if self.token.is_some() {
            return match self.phase {
                ConnectionPhase::Disconnected => self.connect(now),
                _ => Vec::new(),
            };
        }

        match self.phase {
            ConnectionPhase::Disconnected => Vec::new(),
            ConnectionPhase::ReconnectPending => {
                info!("session token cleared, reconnect cancelled");
                self.enter(ConnectionPhase::Disconnected, now);
                vec![ConnectionAction::PhaseChanged(ConnectionPhase::Disconnected)]
            },
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                self.disconnect(CloseReason::CredentialCleared, true, now)
            },
        }
    }

    /// Tear down the connection permanently.
    ///
    /// Cancels the heartbeat and reconnect timers. Idempotent.
    pub fn shutdown(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;

        match self.phase {
            ConnectionPhase::Disconnected => Vec::new(),
            ConnectionPhase::ReconnectPending => {
                self.enter(ConnectionPhase::Disconnected, now);
                vec![ConnectionAction::PhaseChanged(ConnectionPhase::Disconnected)]
            },
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                self.disconnect(CloseReason::Shutdown, true, now)
            },
        }
    }

    /// Process timers (handshake timeout, heartbeat, idle timeout, reconnect).
    ///
    /// Call this whenever [`time_until_next_timer`](Self::time_until_next_timer)
    /// elapses. Calling it early is harmless.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            ConnectionPhase::Disconnected => Vec::new(),
            ConnectionPhase::Connecting => {
                let elapsed = now - self.phase_since;
                if elapsed > self.config.handshake_timeout {
                    warn!(generation = self.generation, ?elapsed, "handshake timeout");
                    return self.disconnect(CloseReason::HandshakeTimeout, true, now);
                }
                Vec::new()
            },
            ConnectionPhase::ReconnectPending => {
                if now - self.phase_since >= self.reconnect_delay {
                    debug!(attempt = self.failures, "reconnect delay elapsed");
                    return self.connect(now);
                }
                Vec::new()
            },
            ConnectionPhase::Open => {
                if let Some(idle) = self.config.idle_timeout {
                    let elapsed = now - self.last_inbound;
                    if elapsed > idle {
                        warn!(generation = self.generation, ?elapsed, "idle timeout");
                        return self.disconnect(CloseReason::IdleTimeout, true, now);
                    }
                }

                let due = match self.last_heartbeat {
                    None => true,
                    Some(last) => now - last >= self.config.heartbeat_interval,
                };

                if due {
                    self.last_heartbeat = Some(now);
                    return vec![ConnectionAction::Heartbeat { generation: self.generation }];
                }
                Vec::new()
            },
        }
    }

    /// Time until the next timer is due, or `None` if no timer is armed.
    #[must_use]
    pub fn time_until_next_timer(&self, now: I) -> Option<Duration> {
        match self.phase {
            ConnectionPhase::Disconnected => None,
            ConnectionPhase::Connecting => {
                // Fires once strictly past the timeout.
                let deadline = self.config.handshake_timeout + Duration::from_millis(1);
                Some(deadline.saturating_sub(now - self.phase_since))
            },
            ConnectionPhase::ReconnectPending => {
                Some(self.reconnect_delay.saturating_sub(now - self.phase_since))
            },
            ConnectionPhase::Open => {
                let heartbeat = match self.last_heartbeat {
                    None => Duration::ZERO,
                    Some(last) => self.config.heartbeat_interval.saturating_sub(now - last),
                };
                let idle = self.config.idle_timeout.map(|idle| {
                    (idle + Duration::from_millis(1)).saturating_sub(now - self.last_inbound)
                });
                Some(idle.map_or(heartbeat, |idle| idle.min(heartbeat)))
            },
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        generation == self.generation
            && matches!(self.phase, ConnectionPhase::Connecting | ConnectionPhase::Open)
    }

    fn enter(&mut self, phase: ConnectionPhase, now: I) {
        self.phase = phase;
        self.phase_since = now;
        if phase != ConnectionPhase::Open {
            self.last_heartbeat = None;
        }
    }

    /// Leave Connecting/Open and decide whether to schedule a reconnect.
    fn disconnect(
        &mut self,
        reason: CloseReason,
        close_transport: bool,
        now: I,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if close_transport {
            actions.push(ConnectionAction::Close {
                generation: self.generation,
                reason: reason.clone(),
            });
        }

        self.enter(ConnectionPhase::Disconnected, now);

        let retry = !self.shut_down
            && self.token.is_some()
            && !(reason == CloseReason::AuthRejected && self.config.stop_on_auth_rejection);

        if !retry {
            info!(generation = self.generation, %reason, "connection closed");
            actions.push(ConnectionAction::PhaseChanged(ConnectionPhase::Disconnected));
            return actions;
        }

        self.failures = self.failures.saturating_add(1);
        self.reconnect_delay = self.config.reconnect.delay(self.failures);
        self.enter(ConnectionPhase::ReconnectPending, now);

        warn!(
            generation = self.generation,
            %reason,
            attempt = self.failures,
            delay = ?self.reconnect_delay,
            "connection closed, reconnect scheduled"
        );

        actions.push(ConnectionAction::PhaseChanged(ConnectionPhase::ReconnectPending));
        actions
    }
}
