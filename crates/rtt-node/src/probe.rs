//! Round-trip-time probe.
//!
//! Publishes records on a topic the node itself subscribes to and times
//! each trip through the master node.

use std::time::Duration;

use serde_json::json;
use tn_node_sdk::{ClientNode, Record};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Default, Clone)]
pub struct RttStats {
    timings: Vec<Duration>,
}

impl RttStats {
    pub fn record(&mut self, rtt: Duration) {
        self.timings.push(rtt);
    }

    pub fn count(&self) -> usize {
        self.timings.len()
    }

    pub fn min(&self) -> Option<Duration> {
        self.timings.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.timings.iter().max().copied()
    }

    pub fn avg(&self) -> Option<Duration> {
        if self.timings.is_empty() {
            return None;
        }
        let total: Duration = self.timings.iter().sum();
        Some(total / self.timings.len() as u32)
    }
}

/// Send `messages` records one at a time, each after the previous one
/// came back, and collect the round trip times.
pub async fn run_probe(
    node: &ClientNode,
    messages: u32,
    per_message_timeout: Duration,
) -> anyhow::Result<RttStats> {
    let client_id = node
        .client_id()
        .ok_or_else(|| anyhow::anyhow!("node is not registered"))?;
    let topic = format!("{client_id}/test_rtt");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let token = node
        .subscribe_topic(&topic, move |_| {
            let _ = tx.send(Instant::now());
        })
        .await?;

    let mut stats = RttStats::default();
    for n in 0..messages {
        let sent = Instant::now();
        node.publish_record_immediately(Record::new(&topic, json!({ "double": 1.0 })))
            .await?;

        let received = tokio::time::timeout(per_message_timeout, rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("message {n} did not come back"))?
            .ok_or_else(|| anyhow::anyhow!("subscription closed"))?;
        let rtt = received.saturating_duration_since(sent);
        tracing::debug!(n, rtt_us = rtt.as_micros() as u64, "round trip");
        stats.record(rtt);
    }

    node.unsubscribe(token).await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tn_domain::config::MasterConfig;
    use tn_domain::Result;
    use tn_node_sdk::transport::InboundSender;
    use tn_node_sdk::{ClientNodeBuilder, ControlChannel, DataChannel, Transport};
    use tn_protocol::topics::services;
    use tn_protocol::{ClientSpec, ServerSpec, ServiceReply, ServiceRequest, TopicData};
    use tokio_util::sync::CancellationToken;

    /// A master node that echoes every data frame straight back.
    struct Loopback;

    struct LoopbackControl;

    struct LoopbackData {
        inbound: InboundSender,
        closed: CancellationToken,
    }

    #[async_trait]
    impl ControlChannel for LoopbackControl {
        async fn request(&self, req: &ServiceRequest) -> Result<ServiceReply> {
            Ok(match req.topic.as_str() {
                services::SERVER_CONFIG => ServiceReply {
                    server: Some(ServerSpec {
                        port_topic_data_ws: Some(8104),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                services::CLIENT_REGISTRATION => ServiceReply {
                    client: Some(ClientSpec {
                        id: Some("probe-client".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                _ => ServiceReply::success("ok"),
            })
        }
    }

    #[async_trait]
    impl DataChannel for LoopbackData {
        async fn send(&self, frame: &TopicData) -> Result<()> {
            let _ = self.inbound.send(frame.clone());
            Ok(())
        }

        fn closed(&self) -> CancellationToken {
            self.closed.clone()
        }

        async fn close(&self) {
            self.closed.cancel();
        }
    }

    #[async_trait]
    impl Transport for Loopback {
        async fn open_control(&self, _master: &MasterConfig) -> Result<Arc<dyn ControlChannel>> {
            Ok(Arc::new(LoopbackControl))
        }

        async fn open_data(&self, _url: &str, inbound: InboundSender) -> Result<Arc<dyn DataChannel>> {
            Ok(Arc::new(LoopbackData {
                inbound,
                closed: CancellationToken::new(),
            }))
        }
    }

    #[test]
    fn stats_summaries() {
        let mut stats = RttStats::default();
        assert!(stats.avg().is_none());

        for ms in [4, 2, 6] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min(), Some(Duration::from_millis(2)));
        assert_eq!(stats.max(), Some(Duration::from_millis(6)));
        assert_eq!(stats.avg(), Some(Duration::from_millis(4)));
    }

    #[tokio::test]
    async fn probe_times_every_message() {
        let node = ClientNodeBuilder::new()
            .transport(Arc::new(Loopback))
            .build()
            .unwrap();
        node.connect().await.unwrap();

        let stats = run_probe(&node, 5, Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats.count(), 5);
        assert!(stats.min() <= stats.avg());
        assert!(stats.avg() <= stats.max());
        assert!(node.registry().is_empty());

        node.disconnect().await.unwrap();
    }
}
