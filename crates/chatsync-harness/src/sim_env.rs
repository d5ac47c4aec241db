//! Simulated environment with a manual clock.
//!
//! Time only moves when the simulation moves it: the [`SimDriver`] advances
//! the clock to the next scripted input or timer deadline, so a run covering
//! minutes of heartbeats and reconnect delays finishes instantly and
//! replays identically.
//!
//! [`SimDriver`]: crate::SimDriver

use std::{
    ops::Sub,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chatsync_core::Environment;
use chrono::{DateTime, NaiveDateTime};

/// Wall-clock time at virtual zero (2023-11-14T22:13:20).
const WALL_CLOCK_ORIGIN: i64 = 1_700_000_000;

/// Virtual instant: time elapsed since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Elapsed virtual time.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Environment whose clock is advanced explicitly.
///
/// Clones share the clock.
#[derive(Debug, Clone, Default)]
pub struct SimEnv {
    elapsed: Arc<Mutex<Duration>>,
}

impl SimEnv {
    /// Environment at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time since start.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Move the clock forward to `at`. Earlier targets leave it unchanged.
    pub fn advance_to(&self, at: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        if at > *elapsed {
            *elapsed = at;
        }
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn wall_clock(&self) -> NaiveDateTime {
        let elapsed = self.elapsed();
        DateTime::from_timestamp(WALL_CLOCK_ORIGIN + elapsed.as_secs() as i64, elapsed.subsec_nanos())
            .unwrap_or_default()
            .naive_utc()
    }

    /// Advances the clock by `duration` immediately; the future is ready.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}
