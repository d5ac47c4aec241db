//! Deterministic simulation harness for chatsync.
//!
//! Runs the production [`Runtime`] loop with a [`SimDriver`] in place of the
//! tokio driver and a [`SimEnv`] manual clock in place of the system clock.
//! Transports, pushes, drops and API answers are scripted on a virtual
//! timeline, so reconnect delays and heartbeat intervals cost nothing and
//! every run replays identically.
//!
//! # Chaos
//!
//! [`ChaosPlan`] scatters server pushes over the timeline with a seeded RNG:
//! jitter reorders them, some arrive twice, some are followed by a dropped
//! transport.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the checks
//! every run must pass.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod invariants;
pub mod sim_driver;
pub mod sim_env;

pub use chaos::{ChaosConfig, ChaosPlan, ChaosSummary};
pub use invariants::{
    ActiveRoomKnown, Invariant, InvariantRegistry, InvariantResult, MessageSnapshot, MessagesAscending,
    NeverOpenWhileDisconnected, RoomSnapshot, SystemSnapshot, UniqueRooms, Violation,
};
pub use sim_driver::{OpenRecord, SimBackend, SimConfig, SimDriver, SimDriverError};
pub use sim_env::{SimEnv, SimInstant};

use chatsync_client::Runtime;
use chatsync_core::{SyncConfig, SyncEngine, SyncError};

/// Endpoint used by simulated clients.
pub const SIM_ENDPOINT: &str = "ws://sim.local/ws";

/// A client wired to a simulated server.
pub struct Simulation {
    runtime: Runtime<SimDriver, SimEnv>,
    driver: SimDriver,
}

impl Simulation {
    /// Client signed in with `token`, answered from `backend`, checked
    /// against the standard invariants.
    ///
    /// # Errors
    ///
    /// - `SyncError::Connection` if `config` is invalid
    pub fn new(config: SyncConfig, token: Option<&str>, backend: SimBackend) -> Result<Self, SyncError> {
        Self::with_registry(config, token, backend, SimConfig::default(), InvariantRegistry::standard())
    }

    /// Client with explicit latencies and invariants.
    ///
    /// # Errors
    ///
    /// - `SyncError::Connection` if `config` is invalid
    pub fn with_registry(
        config: SyncConfig,
        token: Option<&str>,
        backend: SimBackend,
        sim: SimConfig,
        registry: InvariantRegistry,
    ) -> Result<Self, SyncError> {
        let env = SimEnv::new();
        let engine = SyncEngine::new(env.clone(), config, token.map(str::to_string))?;
        let driver = SimDriver::new(env, backend, sim).with_invariants(registry);
        let runtime = Runtime::new(driver.clone(), engine);
        Ok(Self { runtime, driver })
    }

    /// Default configuration pointed at [`SIM_ENDPOINT`].
    pub fn config() -> SyncConfig {
        SyncConfig::new(SIM_ENDPOINT)
    }

    /// Script handle sharing state with the runtime's driver.
    pub fn driver(&self) -> &SimDriver {
        &self.driver
    }

    /// The engine, for registering handlers before the run.
    pub fn engine_mut(&mut self) -> &mut SyncEngine<SimEnv> {
        self.runtime.engine_mut()
    }

    /// Run until shutdown, the horizon, or an idle timeline.
    ///
    /// # Errors
    ///
    /// - `SimDriverError` if the client wrote to a transport that was not open
    pub async fn run(self) -> Result<SimDriver, SimDriverError> {
        self.runtime.run().await?;
        Ok(self.driver)
    }
}
