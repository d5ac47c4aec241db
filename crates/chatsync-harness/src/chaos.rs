//! Seeded chaotic delivery.
//!
//! Turns an ordered list of server pushes into a timeline with jitter
//! (reordering), duplicates and transport drops. The same seed always
//! produces the same timeline.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::SimDriver;

/// How hostile the network is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaosConfig {
    /// Nominal gap between consecutive pushes.
    pub spacing: Duration,
    /// Upper bound of extra delay per push; larger than `spacing` reorders.
    pub max_jitter: Duration,
    /// Probability a push is delivered twice.
    pub duplicate_rate: f64,
    /// Probability the transport drops right after a push.
    pub drop_rate: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(200),
            max_jitter: Duration::from_millis(600),
            duplicate_rate: 0.2,
            drop_rate: 0.05,
        }
    }
}

/// What a plan put on the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosSummary {
    /// Pushes scheduled, duplicates included.
    pub pushes: usize,
    /// Duplicate pushes.
    pub duplicates: usize,
    /// Transport drops.
    pub drops: usize,
    /// Time of the last scheduled entry.
    pub last: Duration,
}

/// Seeded scheduler of chaotic deliveries.
#[derive(Debug, Clone)]
pub struct ChaosPlan {
    rng: ChaCha8Rng,
    config: ChaosConfig,
}

impl ChaosPlan {
    /// Plan driven by `seed`.
    pub fn new(seed: u64, config: ChaosConfig) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed), config }
    }

    fn jitter(&mut self) -> Duration {
        let max = self.config.max_jitter.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(0..=max))
    }

    /// Schedule `frames` on `driver` starting at `start`.
    pub fn schedule(&mut self, driver: &SimDriver, start: Duration, frames: &[String]) -> ChaosSummary {
        let mut summary = ChaosSummary { last: start, ..ChaosSummary::default() };

        for (index, frame) in frames.iter().enumerate() {
            let nominal = start + self.config.spacing * index as u32;

            let at = nominal + self.jitter();
            driver.push_frame(at, frame.clone());
            summary.pushes += 1;
            summary.last = summary.last.max(at);

            if self.rng.gen_bool(self.config.duplicate_rate) {
                let again = nominal + self.jitter();
                driver.push_frame(again, frame.clone());
                summary.pushes += 1;
                summary.duplicates += 1;
                summary.last = summary.last.max(again);
            }

            if self.rng.gen_bool(self.config.drop_rate) {
                let drop_at = at + Duration::from_millis(1);
                driver.drop_transport(drop_at);
                summary.drops += 1;
                summary.last = summary.last.max(drop_at);
            }
        }

        summary
    }
}
