//! HTTP implementation of the control channel.
//!
//! Every service call is a `POST {base}/services` carrying the JSON
//! envelope.  Calls are not retried: registration requests are not
//! idempotent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tn_domain::config::MasterConfig;
use tn_domain::error::{Error, Result};
use tn_protocol::{ServiceReply, ServiceRequest};
use uuid::Uuid;

use crate::transport::ControlChannel;

/// Created once per handshake; the underlying `reqwest::Client` keeps a
/// connection pool.
#[derive(Debug, Clone)]
pub struct RestControlChannel {
    http: Client,
    url: String,
}

impl RestControlChannel {
    pub fn new(master: &MasterConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(master.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            http,
            url: format!("{}/services", master.service_base_url()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("X-Client-Type", "topicnode")
            .header("X-Trace-Id", Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl ControlChannel for RestControlChannel {
    async fn request(&self, req: &ServiceRequest) -> Result<ServiceReply> {
        let resp = self
            .decorate(self.http.post(&self.url).json(req))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "{} returned {status}: {body}",
                req.topic
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::Protocol(format!("failed to parse reply to {}: {e}: {body}", req.topic))
        })
    }
}

/// Convert a `reqwest::Error` into a domain `Error`.
///
/// Timeout errors become `Error::Timeout`; everything else becomes
/// `Error::Transport`.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Transport(e.to_string())
    }
}
