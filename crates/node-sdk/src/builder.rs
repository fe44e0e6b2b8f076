//! Builder pattern for constructing a [`ClientNode`].

use std::sync::Arc;
use std::time::Duration;

use tn_domain::config::{ConfigSeverity, NodeConfig};
use tn_domain::error::{Error, Result};

use crate::client::ClientNode;
use crate::codec::{FrameCodec, JsonCodec};
use crate::reconnect::ReconnectBackoff;
use crate::transport::{NetTransport, Transport};

/// Fluent builder for [`ClientNode`].
///
/// # Example
///
/// ```rust,no_run
/// # use tn_node_sdk::ClientNodeBuilder;
/// let node = ClientNodeBuilder::new()
///     .host("master.local")
///     .service_port(8102)
///     .name("pose tracker")
///     .publish_interval(std::time::Duration::from_millis(15))
///     .auto_reconnect(true)
///     .build()
///     .unwrap();
/// ```
pub struct ClientNodeBuilder {
    pub(crate) config: NodeConfig,
    pub(crate) reconnect_backoff: Option<ReconnectBackoff>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) codec: Option<Arc<dyn FrameCodec>>,
}

impl ClientNodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            reconnect_backoff: None,
            transport: None,
            codec: None,
        }
    }

    /// Start from a loaded configuration.  Later setters override it.
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    // ── Master node ──────────────────────────────────────────────────

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.master.host = host.into();
        self
    }

    /// Port of the master node's service endpoint (default 8102).
    pub fn service_port(mut self, port: u16) -> Self {
        self.config.master.service_port = port;
        self
    }

    pub fn use_tls(mut self, tls: bool) -> Self {
        self.config.master.use_tls = tls;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.config.master.request_timeout_ms = d.as_millis() as u64;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Name sent with the client registration.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.client.name = name.into();
        self
    }

    /// Override the batched publish period (default 15ms).
    pub fn publish_interval(mut self, d: Duration) -> Self {
        self.config.client.publish_interval_ms = d.as_millis() as u64;
        self
    }

    /// Default budget of [`ClientNode::wait_for_connection`].
    pub fn wait_budget(mut self, retries: u32, interval: Duration) -> Self {
        self.config.client.wait_max_retries = retries;
        self.config.client.wait_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Reconnect in the background when the data channel drops.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.client.auto_reconnect = enabled;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.reconnect_backoff = Some(backoff);
        self
    }

    // ── Transport ────────────────────────────────────────────────────

    /// Replace the network transport (HTTP + WebSocket) entirely.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Frame codec of the default transport (default JSON).
    pub fn codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Build the [`ClientNode`].
    pub fn build(self) -> Result<ClientNode> {
        let issues = self.config.validate();
        for warning in issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Warning)
        {
            tracing::warn!(%warning, "config warning");
        }
        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }

        let backoff = self
            .reconnect_backoff
            .unwrap_or_else(|| ReconnectBackoff::from(&self.config.reconnect));
        let transport = match self.transport {
            Some(t) => t,
            None => {
                let codec = self.codec.unwrap_or_else(|| Arc::new(JsonCodec));
                Arc::new(NetTransport::new(codec))
            }
        };

        Ok(ClientNode::from_parts(self.config, backoff, transport))
    }
}

impl Default for ClientNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
