//! Client node: composes the connection manager, subscription registry
//! and publish queue into the public SDK surface.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tn_domain::config::NodeConfig;
use tn_domain::error::{Error, Result};
use tn_protocol::{ComponentProfile, DeviceSpec, Record, ServerSpec, ServiceReply, ServiceRequest, TopicData};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::events::ObserverHandle;
use crate::publish::PublishQueue;
use crate::reconnect::ReconnectBackoff;
use crate::registry::{SubscriptionRegistry, SubscriptionToken};
use crate::transport::Transport;
use crate::types::{ConnectionEvent, ConnectionState};

/// A client node of the master node.
///
/// Cheap to clone; all clones share one connection.  Create via
/// [`ClientNodeBuilder`](crate::builder::ClientNodeBuilder).
#[derive(Clone)]
pub struct ClientNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    config: NodeConfig,
    connection: Arc<ConnectionManager>,
    registry: SubscriptionRegistry,
    queue: PublishQueue,
    publish_interval: Mutex<Duration>,
    /// Taken by the dispatcher task on first connect.
    inbound: Mutex<Option<mpsc::UnboundedReceiver<TopicData>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    transport_observer: Mutex<Option<ObserverHandle>>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.get_mut().take() {
            task.abort();
        }
        if let Some(handle) = self.transport_observer.get_mut().take() {
            handle.unregister();
        }
        self.queue.stop();
        self.connection.shutdown();
    }
}

impl ClientNode {
    /// Start a new builder.
    pub fn builder() -> crate::builder::ClientNodeBuilder {
        crate::builder::ClientNodeBuilder::new()
    }

    pub(crate) fn from_parts(
        config: NodeConfig,
        backoff: ReconnectBackoff,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(
            config.master.clone(),
            config.client.name.clone(),
            backoff,
            transport,
            inbound_tx,
        );
        let registry = SubscriptionRegistry::new(connection.clone());
        let queue = PublishQueue::new(connection.clone());
        let publish_interval = Duration::from_millis(config.client.publish_interval_ms);

        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                connection,
                registry,
                queue,
                publish_interval: Mutex::new(publish_interval),
                inbound: Mutex::new(Some(inbound_rx)),
                dispatcher: Mutex::new(None),
                transport_observer: Mutex::new(None),
            }),
        };
        node.watch_transport();
        node
    }

    /// Stop batching when the data channel drops, and reconnect in the
    /// background if configured to.
    fn watch_transport(&self) {
        let weak: Weak<NodeInner> = Arc::downgrade(&self.inner);
        let handle = self.inner.connection.on_event(move |event| {
            if *event != ConnectionEvent::TransportClosed {
                return;
            }
            let Some(inner) = weak.upgrade() else { return };
            inner.queue.stop();
            if !inner.config.client.auto_reconnect {
                return;
            }

            let node = ClientNode { inner };
            tokio::spawn(async move {
                tracing::info!("data channel lost, reconnecting");
                if let Err(e) = node.reconnect().await {
                    tracing::error!(error = %e, "automatic reconnect failed");
                }
            });
        });
        *self.inner.transport_observer.lock() = Some(handle);
    }

    fn start_dispatcher(&self) {
        let mut slot = self.inner.dispatcher.lock();
        if slot.is_some() {
            return;
        }
        let Some(mut inbound) = self.inner.inbound.lock().take() else {
            return;
        };

        let registry = self.inner.registry.clone();
        *slot = Some(tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                if let TopicData::Error(err) = &frame {
                    tracing::warn!(error = %err, "master node sent an error frame");
                    continue;
                }
                for record in frame.into_records() {
                    let delivered = registry.dispatch(&record);
                    tracing::trace!(topic = %record.topic, delivered, "record dispatched");
                }
            }
        }));
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect to the master node and start the publish timer.
    ///
    /// Connecting again after the data channel was lost keeps the cached
    /// identity and registers every held subscription on the new session.
    pub async fn connect(&self) -> Result<()> {
        self.start_dispatcher();
        let resumed = !self.is_connected() && self.client_id().is_some();
        self.inner.connection.connect().await?;
        self.inner
            .queue
            .set_publish_interval(*self.inner.publish_interval.lock())?;
        if resumed {
            self.inner.registry.resubscribe_all().await?;
        }
        Ok(())
    }

    /// Flush pending records, release every subscription, deregister
    /// devices and the client, and close both channels.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        // A failed final batch is logged by the queue.
        let _ = self.inner.queue.flush().await;
        self.inner.queue.stop();

        let registry = self.inner.registry.clone();
        self.inner
            .connection
            .disconnect(move |client_id| registry.release_request(client_id))
            .await
    }

    /// Reopen both channels with the existing identity and register every
    /// held subscription again.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.connection.reconnect().await?;
        self.inner
            .queue
            .set_publish_interval(*self.inner.publish_interval.lock())?;
        self.inner.registry.resubscribe_all().await
    }

    /// Wait for `Connected` using the configured budget.
    pub async fn wait_for_connection(&self) -> Result<()> {
        let client = &self.inner.config.client;
        self.wait_for_connection_with(
            client.wait_max_retries,
            Duration::from_millis(client.wait_interval_ms),
        )
        .await
    }

    pub async fn wait_for_connection_with(&self, retries: u32, interval: Duration) -> Result<()> {
        self.inner
            .connection
            .wait_for_connection(retries, interval)
            .await
    }

    /// Cancel pending waits and background work.  The node cannot be
    /// connected again afterwards.
    pub fn shutdown(&self) {
        self.inner.connection.shutdown();
        self.inner.queue.stop();
        if let Some(task) = self.inner.dispatcher.lock().take() {
            task.abort();
        }
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// Queue `record` for the next batch.
    pub fn publish_record(&self, record: Record) {
        self.inner.queue.publish_record(record);
    }

    pub fn publish_record_list(&self, records: impl IntoIterator<Item = Record>) {
        self.inner.queue.publish_record_list(records);
    }

    /// Send `record` right away as its own frame.
    pub async fn publish_record_immediately(&self, record: Record) -> Result<()> {
        self.inner.queue.publish_record_immediately(record).await
    }

    pub async fn flush(&self) -> Result<usize> {
        self.inner.queue.flush().await
    }

    /// Change the batch period.  Takes effect immediately when connected.
    pub fn set_publish_interval(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(Error::Validation("publish interval must be non-zero".into()));
        }
        *self.inner.publish_interval.lock() = period;
        if self.is_connected() {
            self.inner.queue.set_publish_interval(period)?;
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        *self.inner.publish_interval.lock()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub async fn subscribe_topic<F>(&self, topic: &str, callback: F) -> Result<SubscriptionToken>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe_topic(topic, callback).await
    }

    pub async fn subscribe_regex<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionToken>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe_regex(pattern, callback).await
    }

    pub async fn subscribe_components<F>(
        &self,
        profile: ComponentProfile,
        callback: F,
    ) -> Result<SubscriptionToken>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.inner
            .registry
            .subscribe_components(profile, callback)
            .await
    }

    pub async fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        self.inner.registry.unsubscribe(token).await
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    // ── Services ─────────────────────────────────────────────────────

    pub async fn call_service(&self, req: ServiceRequest) -> Result<ServiceReply> {
        self.inner.connection.call_service(req).await
    }

    pub async fn register_device(&self, device: DeviceSpec) -> Result<DeviceSpec> {
        self.inner.connection.register_device(device).await
    }

    pub async fn deregister_device(&self, device: DeviceSpec) -> Result<()> {
        self.inner.connection.deregister_device(device).await
    }

    pub async fn register_session(&self, session: Value) -> Result<Value> {
        self.inner.connection.register_session(session).await
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn on_event<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.connection.on_event(observer)
    }

    pub fn on_disconnect<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.connection.on_disconnect(callback)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.connection.client_id()
    }

    pub fn server_spec(&self) -> Option<ServerSpec> {
        self.inner.connection.server_spec()
    }

    pub fn server_constants(&self) -> Result<Value> {
        self.inner.connection.server_constants()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClientNodeBuilder;
    use crate::testing::{MockMaster, MockTransport, CLIENT_ID};
    use serde_json::json;
    use tn_protocol::topics::services;
    use tn_protocol::TopicSubscription;

    fn node(master: &Arc<MockMaster>, auto_reconnect: bool) -> ClientNode {
        ClientNodeBuilder::new()
            .name("test node")
            .auto_reconnect(auto_reconnect)
            .reconnect_backoff(ReconnectBackoff {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                backoff_factor: 2.0,
                max_attempts: 3,
            })
            .transport(MockTransport::new(master.clone()))
            .build()
            .unwrap()
    }

    fn subscriptions(master: &MockMaster) -> Vec<TopicSubscription> {
        master
            .calls_to(services::TOPIC_SUBSCRIPTION)
            .into_iter()
            .filter_map(|c| c.topic_subscription)
            .collect()
    }

    #[tokio::test]
    async fn inbound_frames_reach_subscribers() {
        let master = MockMaster::new();
        let node = node(&master, false);
        node.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _token = node
            .subscribe_topic("/pose", move |r| {
                let _ = tx.send(r.payload.clone());
            })
            .await
            .unwrap();

        master.channels()[0].push(TopicData::record_list(vec![
            Record::new("/pose", json!(1)),
            Record::new("/other", json!(2)),
            Record::new("/pose", json!(3)),
        ]));

        assert_eq!(rx.recv().await, Some(json!(1)));
        assert_eq!(rx.recv().await, Some(json!(3)));
    }

    #[tokio::test]
    async fn disconnect_flushes_and_releases() {
        let master = MockMaster::new();
        let node = node(&master, false);
        node.connect().await.unwrap();
        let _a = node.subscribe_topic("/a", |_| {}).await.unwrap();
        let _r = node.subscribe_regex("^/b", |_| {}).await.unwrap();

        node.publish_record(Record::new("/out", json!("last")));
        node.disconnect().await.unwrap();

        let sent = master.channels()[0].sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].clone().into_records()[0].topic, "/out");

        let release = subscriptions(&master).pop().unwrap();
        assert_eq!(release.client_id, CLIENT_ID);
        assert_eq!(release.unsubscribe_topics, vec!["/a"]);
        assert_eq!(release.unsubscribe_topic_regexp, vec!["^/b"]);
        assert!(node.registry().is_empty());
        assert!(matches!(node.disconnect().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn reconnect_registers_subscriptions_again() {
        let master = MockMaster::new();
        let node = node(&master, false);
        node.connect().await.unwrap();
        let _a = node.subscribe_topic("/a", |_| {}).await.unwrap();

        node.reconnect().await.unwrap();

        let last = subscriptions(&master).pop().unwrap();
        assert_eq!(last.subscribe_topics, vec!["/a"]);
        assert_eq!(master.channels().len(), 2);
    }

    #[tokio::test]
    async fn connect_after_transport_loss_registers_subscriptions_again() {
        let master = MockMaster::new();
        let node = node(&master, false);
        node.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = node.on_event(move |e| {
            let _ = tx.send(*e);
        });
        let _a = node.subscribe_topic("/a", |_| {}).await.unwrap();

        master.channels()[0].drop_remote();
        assert_eq!(rx.recv().await, Some(ConnectionEvent::TransportClosed));
        assert_eq!(node.state(), ConnectionState::Disconnected);

        node.connect().await.unwrap();
        assert_eq!(master.calls_to(services::CLIENT_REGISTRATION).len(), 1);
        let subs = subscriptions(&master);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].subscribe_topics, vec!["/a"]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _b = node
            .subscribe_topic("/a", move |r| {
                let _ = tx.send(r.payload.clone());
            })
            .await
            .unwrap();
        master.channels()[1].push(TopicData::record(Record::new("/a", json!(7))));
        assert_eq!(rx.recv().await, Some(json!(7)));
    }

    #[tokio::test]
    async fn auto_reconnect_after_transport_loss() {
        let master = MockMaster::new();
        let node = node(&master, true);
        node.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = node.on_event(move |e| {
            let _ = tx.send(*e);
        });

        master.channels()[0].drop_remote();
        assert_eq!(rx.recv().await, Some(ConnectionEvent::TransportClosed));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Reconnected));
        assert!(node.is_connected());
        assert_eq!(master.calls_to(services::CLIENT_REGISTRATION).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_interval_survives_reconnect() {
        let master = MockMaster::new();
        let node = node(&master, false);
        node.set_publish_interval(Duration::from_millis(40)).unwrap();
        node.connect().await.unwrap();
        assert_eq!(node.publish_interval(), Duration::from_millis(40));

        node.reconnect().await.unwrap();
        assert_eq!(node.publish_interval(), Duration::from_millis(40));
        assert!(node.set_publish_interval(Duration::ZERO).is_err());

        node.publish_record(Record::new("/out", json!("batched")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let channels = master.channels();
        assert_eq!(channels.len(), 2);
        assert!(channels[0].sent().is_empty());
        let sent = channels[1].sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].clone().into_records()[0].topic, "/out");
    }

    #[tokio::test(start_paused = true)]
    async fn default_wait_budget_times_out() {
        let master = MockMaster::new();
        let node = node(&master, false);
        let err = node.wait_for_connection().await.unwrap_err();
        assert!(err.is_timeout());
    }
}
