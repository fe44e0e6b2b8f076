use serde::Serialize;

/// Structured trace events emitted across all topicnode crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ServiceCall {
        topic: String,
        duration_ms: u64,
        ok: bool,
    },
    ConnectionStateChanged {
        from: String,
        to: String,
    },
    SubscriptionRegistered {
        kind: String,
        key: String,
        local_subscribers: usize,
    },
    SubscriptionReleased {
        kind: String,
        key: String,
    },
    ComponentAnnounced {
        topic: Option<String>,
        matched_subscriptions: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tn_event");
    }
}
