use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Master node endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the master node lives and how the control channel talks to it.
///
/// Only the service port is configured here; the data channel port is
/// learned from the server configuration reply during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8102")]
    pub service_port: u16,
    /// Use `https`/`wss` instead of `http`/`ws`.
    #[serde(default)]
    pub use_tls: bool,
    /// Timeout for a single control channel round trip.
    #[serde(default = "d_5000")]
    pub request_timeout_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            service_port: 8102,
            use_tls: false,
            request_timeout_ms: 5000,
        }
    }
}

impl MasterConfig {
    /// Base URL of the request/reply service endpoint.
    pub fn service_base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.service_port)
    }

    /// URL of the topic data stream for `client_id` on `port`.
    pub fn topic_data_url(&self, port: u16, client_id: &str) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{port}?clientID={client_id}", self.host)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "localhost".into()
}
fn d_8102() -> u16 {
    8102
}
fn d_5000() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_tls_flag() {
        let mut cfg = MasterConfig::default();
        assert_eq!(cfg.service_base_url(), "http://localhost:8102");
        assert_eq!(
            cfg.topic_data_url(8104, "abc"),
            "ws://localhost:8104?clientID=abc"
        );

        cfg.use_tls = true;
        cfg.host = "master.local".into();
        assert_eq!(cfg.service_base_url(), "https://master.local:8102");
        assert_eq!(
            cfg.topic_data_url(8104, "abc"),
            "wss://master.local:8104?clientID=abc"
        );
    }
}
