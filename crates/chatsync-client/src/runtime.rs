//! Generic runtime for sync orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`SyncEngine`]: Sans-IO sync state machine
//! - [`Driver`]: platform-specific I/O
//!
//! All inputs are serialized through one loop: the runtime waits on the
//! driver until the engine's next timer is due, feeds whatever arrived into
//! the engine, executes the resulting actions, and publishes a snapshot.

use chatsync_core::{Environment, SyncAction, SyncEngine, SyncEvent};
use tracing::{debug, info, warn};

use crate::driver::{ApiRequest, Driver, Input};

/// Generic runtime that orchestrates the engine and a driver.
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `E`: Environment the engine reads time from
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    engine: SyncEngine<E>,
}

impl<D, E> Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    /// Create a runtime around an engine that has not been started yet.
    pub fn new(driver: D, engine: SyncEngine<E>) -> Self {
        Self { driver, engine }
    }

    /// Run the event loop until the driver reports [`Input::Shutdown`].
    ///
    /// # Errors
    ///
    /// Returns an error if the driver encounters an I/O error.
    pub async fn run(mut self) -> Result<(), D::Error> {
        self.step(SyncEvent::Start).await?;

        while self.turn().await? {}

        info!("runtime stopping");
        self.step(SyncEvent::Shutdown).await?;
        self.driver.stop();
        Ok(())
    }

    /// Wait for one input and process it.
    ///
    /// Returns `false` once the driver asks to shut down.
    pub async fn turn(&mut self) -> Result<bool, D::Error> {
        let timeout = self.engine.time_until_next_timer();

        match self.driver.next_input(timeout).await? {
            Input::Event(event) => self.step(event).await?,
            Input::Timeout => self.step(SyncEvent::Tick).await?,
            Input::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    /// Feed one event into the engine, execute its actions and publish.
    ///
    /// Engine errors (a rejected intent) are logged; they never stop the loop.
    pub async fn step(&mut self, event: SyncEvent) -> Result<(), D::Error> {
        match self.engine.handle(event) {
            Ok(actions) => self.execute(actions).await?,
            Err(err) => warn!(error = %err, "event rejected"),
        }

        self.driver.publish(self.engine.snapshot());
        Ok(())
    }

    async fn execute(&mut self, actions: Vec<SyncAction>) -> Result<(), D::Error> {
        for action in actions {
            if let Some(request) = ApiRequest::from_action(&action) {
                self.driver.request(request)?;
                continue;
            }

            match action {
                SyncAction::OpenTransport { generation, url } => {
                    self.driver.open_transport(generation, url).await?;
                },
                SyncAction::SendFrame { generation, text } => {
                    self.driver.send_frame(generation, text).await?;
                },
                SyncAction::CloseTransport { generation, reason } => {
                    debug!(generation, %reason, "closing transport");
                    self.driver.close_transport(generation).await?;
                },
                SyncAction::PhaseChanged(phase) => info!(%phase, "connection phase changed"),
                SyncAction::SessionExpired => {
                    warn!("session expired, discarding credential");
                    self.driver.clear_credential();
                },
                SyncAction::StoreCredential(token) => self.driver.store_credential(token),
                SyncAction::FetchRooms
                | SyncAction::FetchHistory { .. }
                | SyncAction::FetchFriends
                | SyncAction::OpenDirectRoom { .. }
                | SyncAction::LogIn(_)
                | SyncAction::AddFriend { .. } => {},
            }
        }
        Ok(())
    }

    /// The engine, for inspection.
    pub fn engine(&self) -> &SyncEngine<E> {
        &self.engine
    }

    /// The engine, for registering application handlers before `run`.
    pub fn engine_mut(&mut self) -> &mut SyncEngine<E> {
        &mut self.engine
    }

    /// The driver, for inspection.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The driver, for scripting inputs in tests.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
