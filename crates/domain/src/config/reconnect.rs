use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect back-off
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Back-off policy for reopening the data channel.  `max_attempts = 0`
/// retries forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_1000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_60000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub backoff_factor: f64,
    #[serde(default = "d_5")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

fn d_1000() -> u64 {
    1000
}
fn d_60000() -> u64 {
    60_000
}
fn d_factor() -> f64 {
    2.0
}
fn d_5() -> u32 {
    5
}
