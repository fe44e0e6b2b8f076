//! In-process doubles for the transport seams, shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tn_domain::config::MasterConfig;
use tn_domain::error::{Error, Result};
use tn_protocol::topics::services;
use tn_protocol::{
    ClientSpec, ComponentList, ComponentProfile, DeviceSpec, ServerSpec, ServiceReply,
    ServiceRequest, TopicData,
};
use tokio_util::sync::CancellationToken;

use crate::transport::{
    ControlChannel, DataChannel, FrameSender, InboundSender, ServiceCaller, Transport,
};

pub(crate) const CLIENT_ID: &str = "client-1";
pub(crate) const DATA_PORT: u16 = 8104;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame sender
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub(crate) struct RecordingSender {
    frames: Mutex<Vec<TopicData>>,
    fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn frames(&self) -> Vec<TopicData> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl FrameSender for RecordingSender {
    async fn send_frame(&self, frame: TopicData) -> Result<()> {
        if self.fail {
            return Err(Error::Transport("send refused".into()));
        }
        self.frames.lock().push(frame);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Master node double
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Answers service requests the way a master node would and records
/// every request it sees.
#[derive(Default)]
pub(crate) struct MockMaster {
    calls: Mutex<Vec<ServiceRequest>>,
    rejected_topics: Mutex<HashSet<String>>,
    /// Reject topic subscription requests that subscribe to anything.
    reject_subscribe: Mutex<bool>,
    components: Mutex<Vec<ComponentProfile>>,
    data_failures: AtomicU32,
    channels: Mutex<Vec<Arc<MockDataChannel>>>,
}

impl MockMaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ServiceRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, topic: &str) -> Vec<ServiceRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.topic == topic)
            .cloned()
            .collect()
    }

    pub fn reject(&self, topic: &str) {
        self.rejected_topics.lock().insert(topic.to_string());
    }

    pub fn accept(&self, topic: &str) {
        self.rejected_topics.lock().remove(topic);
    }

    pub fn reject_subscribe(&self, reject: bool) {
        *self.reject_subscribe.lock() = reject;
    }

    pub fn set_components(&self, components: Vec<ComponentProfile>) {
        *self.components.lock() = components;
    }

    /// Make the next `n` data channel opens fail.
    pub fn fail_data_opens(&self, n: u32) {
        self.data_failures.store(n, Ordering::SeqCst);
    }

    pub fn channels(&self) -> Vec<Arc<MockDataChannel>> {
        self.channels.lock().clone()
    }

    fn reply(&self, req: &ServiceRequest) -> ServiceReply {
        if self.rejected_topics.lock().contains(&req.topic) {
            return ServiceReply::error(format!("{} rejected", req.topic));
        }

        match req.topic.as_str() {
            services::SERVER_CONFIG => ServiceReply {
                server: Some(ServerSpec {
                    id: Some("master".into()),
                    port_topic_data_ws: Some(DATA_PORT),
                    constants_json: Some(r#"{"answer":42}"#.into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            services::CLIENT_REGISTRATION => ServiceReply {
                client: Some(ClientSpec {
                    id: Some(CLIENT_ID.into()),
                    ..req.client.clone().unwrap_or_default()
                }),
                ..Default::default()
            },
            services::DEVICE_REGISTRATION => {
                let device = req.device.clone().unwrap_or_default();
                ServiceReply {
                    device: Some(DeviceSpec {
                        id: device.id.clone().or_else(|| Some("device-1".into())),
                        ..device
                    }),
                    ..Default::default()
                }
            }
            services::SESSION_REGISTRATION => ServiceReply {
                session: req.session.clone(),
                ..Default::default()
            },
            services::COMPONENT_LIST => ServiceReply {
                component_list: Some(ComponentList {
                    elements: self.components.lock().clone(),
                }),
                ..Default::default()
            },
            services::TOPIC_SUBSCRIPTION => {
                let subscribes = req.topic_subscription.as_ref().is_some_and(|s| {
                    !s.subscribe_topics.is_empty()
                        || !s.subscribe_topic_regexp.is_empty()
                        || !s.subscribe_components.is_empty()
                });
                if subscribes && *self.reject_subscribe.lock() {
                    ServiceReply::error("subscription rejected")
                } else {
                    ServiceReply::success("subscribed")
                }
            }
            _ => ServiceReply::success("ok"),
        }
    }
}

#[async_trait]
impl ControlChannel for MockMaster {
    async fn request(&self, req: &ServiceRequest) -> Result<ServiceReply> {
        self.calls.lock().push(req.clone());
        // Give racing callers a chance to interleave.
        tokio::task::yield_now().await;
        Ok(self.reply(req))
    }
}

#[async_trait]
impl ServiceCaller for MockMaster {
    async fn call_service(&self, req: ServiceRequest) -> Result<ServiceReply> {
        self.request(&req).await?.into_result()
    }

    fn client_id(&self) -> Option<String> {
        Some(CLIENT_ID.into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport double
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct MockTransport {
    pub master: Arc<MockMaster>,
}

impl MockTransport {
    pub fn new(master: Arc<MockMaster>) -> Arc<Self> {
        Arc::new(Self { master })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_control(&self, _master: &MasterConfig) -> Result<Arc<dyn ControlChannel>> {
        Ok(self.master.clone())
    }

    async fn open_data(&self, url: &str, inbound: InboundSender) -> Result<Arc<dyn DataChannel>> {
        let remaining = self.master.data_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.master.data_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transport(format!("{url} unreachable")));
        }
        let channel = Arc::new(MockDataChannel {
            url: url.to_string(),
            inbound,
            sent: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        });
        self.master.channels.lock().push(channel.clone());
        Ok(channel)
    }
}

pub(crate) struct MockDataChannel {
    pub url: String,
    inbound: InboundSender,
    sent: Mutex<Vec<TopicData>>,
    closed: CancellationToken,
}

impl MockDataChannel {
    /// Deliver a frame as if the master node had pushed it.
    pub fn push(&self, frame: TopicData) {
        let _ = self.inbound.send(frame);
    }

    pub fn sent(&self) -> Vec<TopicData> {
        self.sent.lock().clone()
    }

    /// Simulate the master node dropping the stream.
    pub fn drop_remote(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    async fn send(&self, frame: &TopicData) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Transport("data channel closed".into()));
        }
        self.sent.lock().push(frame.clone());
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
