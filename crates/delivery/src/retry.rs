//! Retry policy with exponential backoff and deterministic jitter.

use std::time::Duration;

use campaign_core::config::DeliveryConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a member gets at most
    /// `max_retries + 1` attempts.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `failed_attempt` (1-based).
    ///
    /// `initial * multiplier^(failed_attempt - 1)`, capped at `max_backoff_ms`.
    /// With jitter on, the delay is scaled into [0.75, 1.25) by a hash of the
    /// member and attempt, so members that failed together spread out while a
    /// given member's schedule stays reproducible.
    pub fn backoff_after(&self, failed_attempt: u32, member: &Uuid) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_backoff_ms as f64);

        let final_ms = if self.jitter {
            let unit = (mix(member.as_u128(), failed_attempt) >> 11) as f64 / (1u64 << 53) as f64;
            (capped_ms * (0.75 + unit * 0.5)).min(self.max_backoff_ms as f64)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

/// splitmix64 over the member id folded with the attempt number.
fn mix(member: u128, attempt: u32) -> u64 {
    let mut z = (member as u64) ^ ((member >> 64) as u64) ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
