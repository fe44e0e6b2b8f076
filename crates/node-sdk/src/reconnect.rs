//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

use tn_domain::config::ReconnectConfig;

/// Controls how the connection manager retries reopening the data channel.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Maximum number of consecutive failures before giving up.
    /// `0` means unlimited retries.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_attempts: cfg.max_attempts,
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // Add ~25% jitter so many nodes dropped together do not retry in lockstep.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn should_give_up(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) derived from the attempt number.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}
