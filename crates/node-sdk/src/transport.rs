//! Seams between the node core and the outside world.
//!
//! The core talks to the master node only through these traits, so the
//! connection manager, registry and publish queue can all be driven by
//! in-process doubles.  [`NetTransport`] is the production implementation:
//! HTTP via reqwest for the control channel, WebSocket via
//! tokio-tungstenite for the data channel.

use std::sync::Arc;

use async_trait::async_trait;
use tn_domain::config::MasterConfig;
use tn_domain::error::Result;
use tn_protocol::{ServiceReply, ServiceRequest, TopicData};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{FrameCodec, JsonCodec};
use crate::rest::RestControlChannel;
use crate::ws::WsDataChannel;

/// Decoded inbound frames flow from the data channel to the dispatcher
/// through this sender.
pub type InboundSender = mpsc::UnboundedSender<TopicData>;

/// Request/reply channel to the master node's services.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// One round trip.  The reply is returned as received; an `error`
    /// field is not interpreted here.
    async fn request(&self, req: &ServiceRequest) -> Result<ServiceReply>;
}

/// Persistent bidirectional topic data stream.
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send(&self, frame: &TopicData) -> Result<()>;

    /// Cancelled once the stream has ended, whoever ended it.
    fn closed(&self) -> CancellationToken;

    async fn close(&self);
}

/// Opens control and data channels.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_control(&self, master: &MasterConfig) -> Result<Arc<dyn ControlChannel>>;

    async fn open_data(&self, url: &str, inbound: InboundSender) -> Result<Arc<dyn DataChannel>>;
}

/// Issues service calls on behalf of the subscription registry.
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    /// Round trip with `error` replies turned into
    /// [`Error::Protocol`](tn_domain::Error::Protocol).
    async fn call_service(&self, req: ServiceRequest) -> Result<ServiceReply>;

    fn client_id(&self) -> Option<String>;
}

/// The send primitive used by the publish queue.
#[async_trait]
pub trait FrameSender: Send + Sync {
    async fn send_frame(&self, frame: TopicData) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Network transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NetTransport {
    codec: Arc<dyn FrameCodec>,
}

impl NetTransport {
    pub fn new(codec: Arc<dyn FrameCodec>) -> Self {
        Self { codec }
    }
}

impl Default for NetTransport {
    fn default() -> Self {
        Self::new(Arc::new(JsonCodec))
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn open_control(&self, master: &MasterConfig) -> Result<Arc<dyn ControlChannel>> {
        Ok(Arc::new(RestControlChannel::new(master)?))
    }

    async fn open_data(&self, url: &str, inbound: InboundSender) -> Result<Arc<dyn DataChannel>> {
        let channel = WsDataChannel::connect(url, self.codec.clone(), inbound).await?;
        Ok(Arc::new(channel))
    }
}
