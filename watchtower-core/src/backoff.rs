//! Extra delay applied between polling ticks while a stream keeps failing.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_MS: u64 = 5_000;
const DEFAULT_MAX_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_JITTER_RATIO: f32 = 0.2;

/// Bounded exponential backoff. The delay after `n` consecutive failures is
/// `min(base * 2^(n-1), max)` plus up to `jitter_ratio` of random jitter,
/// never exceeding `max`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Fraction of the computed delay added as random jitter (0 disables).
    pub jitter_ratio: f32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_MS,
            max_ms: DEFAULT_MAX_MS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter_ratio: f32) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            jitter_ratio,
        }
    }

    /// No extra delay; failures retry on the next regular tick.
    pub fn none() -> Self {
        Self {
            base_ms: 0,
            max_ms: 0,
            jitter_ratio: 0.0,
        }
    }

    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Deterministic part of the delay.
    pub fn ceiling_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 || self.base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(32);
        let scaled = self.base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(scaled.min(self.max_ms))
    }

    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let ceiling = self.ceiling_for(consecutive_failures);
        if ceiling.is_zero() || self.jitter_ratio <= 0.0 {
            return ceiling;
        }

        let ratio = self.jitter_ratio.min(1.0) as f64;
        let spread = (ceiling.as_millis() as f64 * ratio) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        let total = (ceiling.as_millis() as u64).saturating_add(jitter);
        Duration::from_millis(total.min(self.max_ms))
    }
}
