mod client;
mod master;
mod reconnect;

pub use client::*;
pub use master::*;
pub use reconnect::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl NodeConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.master.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "master.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.master.service_port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "master.service_port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.client.publish_interval_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "client.publish_interval_ms".into(),
                message: "flush interval must be greater than 0".into(),
            });
        }

        if self.client.wait_max_retries == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "client.wait_max_retries".into(),
                message: "wait_for_connection will time out immediately".into(),
            });
        }

        if self.reconnect.backoff_factor < 1.0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "reconnect.backoff_factor".into(),
                message: "factor below 1.0 shrinks the delay between attempts".into(),
            });
        }

        if self.reconnect.max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "reconnect.max_attempts".into(),
                message: "reconnect retries forever".into(),
            });
        }

        errors
    }

    /// Whether [`validate`](Self::validate) reported any hard errors.
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
