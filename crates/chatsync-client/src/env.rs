//! Production Environment implementation using system clocks.
//!
//! `SystemEnv` reads the monotonic clock for timers and the local wall clock
//! for message receipt times, and sleeps on the tokio timer. Server
//! timestamps carry no offset and are in the server's local time, so receipt
//! times use local time as well.

use std::time::Duration;

use chatsync_core::Environment;
use chrono::NaiveDateTime;

/// Production environment using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
