//! Reconnect delay policy.

use std::time::Duration;

/// Delay before the first reconnect attempt after a close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Upper bound for [`ReconnectPolicy::CappedExponential`] when built with
/// [`ReconnectPolicy::capped_exponential`].
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// How long to wait before each reconnect attempt.
///
/// Neither variant limits the number of attempts: the loop continues for as
/// long as a credential is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, never exceeding `max`.
    CappedExponential {
        /// Delay before the first attempt.
        base: Duration,
        /// Ceiling for any single delay.
        max: Duration,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Exponential policy starting at `base` and capped at the default ceiling.
    pub fn capped_exponential(base: Duration) -> Self {
        Self::CappedExponential { base, max: DEFAULT_MAX_RECONNECT_DELAY.max(base) }
    }

    /// Delay before the given attempt (1-based; 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::CappedExponential { base, max } => {
                let exponent = attempt.saturating_sub(1);
                let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            },
        }
    }
}
