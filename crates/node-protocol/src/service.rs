//! The control channel envelope.
//!
//! A request names the service by `topic` and carries at most one body
//! field.  A reply carries a payload field or an `error` field; the
//! absence of `error` signals success.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use tn_domain::error::{Error, Result};

use crate::profile::{ComponentList, ComponentProfile};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_subscription: Option<TopicSubscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_list: Option<ComponentList>,
}

impl ServiceRequest {
    /// A request with no body.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_client(mut self, client: ClientSpec) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_session(mut self, session: serde_json::Value) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_topic_subscription(mut self, sub: TopicSubscription) -> Self {
        self.topic_subscription = Some(sub);
        self
    }

    pub fn with_component_list(mut self, list: ComponentList) -> Self {
        self.component_list = Some(list);
        self
    }
}

/// Body of the topic subscription service.  Empty lists are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscription {
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsubscribe_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe_topic_regexp: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsubscribe_topic_regexp: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe_components: Vec<ComponentProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsubscribe_components: Vec<ComponentProfile>,
}

impl TopicSubscription {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// True when the request would neither add nor remove anything.
    pub fn is_empty(&self) -> bool {
        self.subscribe_topics.is_empty()
            && self.unsubscribe_topics.is_empty()
            && self.subscribe_topic_regexp.is_empty()
            && self.unsubscribe_topic_regexp.is_empty()
            && self.subscribe_components.is_empty()
            && self.unsubscribe_components.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<SuccessReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_list: Option<ComponentList>,
}

impl ServiceReply {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            success: Some(SuccessReply {
                title: Some(title.into()),
                message: None,
            }),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorReply {
                title: None,
                message: message.into(),
                stack: None,
            }),
            ..Default::default()
        }
    }

    /// Turn an `error` reply into [`Error::Protocol`].
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(Error::Protocol(err.to_string())),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) => write!(f, "{title}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specifications
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client as known to the master node.  `id` is assigned on
/// registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ClientSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentProfile>,
}

/// Server configuration returned by the server-config query.
///
/// Ports arrive as strings from some master node versions and as numbers
/// from others; both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_ethernet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_wlan: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub port_service_rest: Option<u16>,
    #[serde(
        default,
        deserialize_with = "de_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub port_topic_data_ws: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constants_json: Option<String>,
}

impl ServerSpec {
    /// Parse the embedded constants document (`{}` when absent).
    pub fn constants(&self) -> Result<serde_json::Value> {
        match self.constants_json.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(raw)?),
            _ => Ok(serde_json::Value::Object(Default::default())),
        }
    }
}

fn de_port<'de, D>(de: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Num(u16),
        Str(String),
    }

    match Option::<Port>::deserialize(de)? {
        None => Ok(None),
        Some(Port::Num(n)) => Ok(Some(n)),
        Some(Port::Str(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid port {s:?}: {e}"))),
    }
}
