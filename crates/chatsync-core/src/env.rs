//! Environment abstraction for deterministic testing.
//!
//! Decouples sync logic from system resources (monotonic time, wall-clock
//! time, sleeping). Production uses the real clocks; simulation uses a manual
//! clock that tests advance explicitly.

use std::{future::Future, ops::Sub, time::Duration};

use chrono::NaiveDateTime;

/// Abstract environment providing time and async primitives.
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual instant.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current time (monotonic). Drives heartbeat and reconnect timers.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time. Stamps messages received over the realtime
    /// connection, since pushes carry no server timestamp.
    fn wall_clock(&self) -> NaiveDateTime;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not sync logic).
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
