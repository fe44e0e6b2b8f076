use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client node behavior
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name sent with the client registration.
    #[serde(default = "d_name")]
    pub name: String,
    /// Period of the batched publish flush.
    #[serde(default = "d_15")]
    pub publish_interval_ms: u64,
    /// `wait_for_connection` budget: attempts × interval.
    #[serde(default = "d_50")]
    pub wait_max_retries: u32,
    #[serde(default = "d_100")]
    pub wait_interval_ms: u64,
    /// Reconnect in the background when the data channel drops.
    #[serde(default)]
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: d_name(),
            publish_interval_ms: 15,
            wait_max_retries: 50,
            wait_interval_ms: 100,
            auto_reconnect: false,
        }
    }
}

fn d_name() -> String {
    "rust node".into()
}
fn d_15() -> u64 {
    15
}
fn d_50() -> u32 {
    50
}
fn d_100() -> u64 {
    100
}
