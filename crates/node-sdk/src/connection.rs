//! Connection lifecycle against the master node.
//!
//! The handshake runs in four steps: open the control channel, fetch the
//! server configuration, register the client (unless an identity is
//! already cached), open the data channel for that identity.  Any failing
//! step aborts the whole connect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tn_domain::config::MasterConfig;
use tn_domain::error::{Error, Result};
use tn_domain::trace::TraceEvent;
use tn_protocol::topics::services;
use tn_protocol::{
    ClientSpec, DeviceSpec, ServerSpec, ServiceReply, ServiceRequest, TopicData, TopicSubscription,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::events::{ObserverHandle, Observers};
use crate::reconnect::ReconnectBackoff;
use crate::transport::{
    ControlChannel, DataChannel, FrameSender, InboundSender, ServiceCaller, Transport,
};
use crate::types::{ConnectionEvent, ConnectionState};

pub struct ConnectionManager {
    master: MasterConfig,
    client_name: String,
    backoff: ReconnectBackoff,
    transport: Arc<dyn Transport>,

    control: RwLock<Option<Arc<dyn ControlChannel>>>,
    data: RwLock<Option<Arc<dyn DataChannel>>>,
    identity: RwLock<Option<ClientSpec>>,
    server: RwLock<Option<ServerSpec>>,
    devices: Mutex<HashMap<String, DeviceSpec>>,

    state: watch::Sender<ConnectionState>,
    /// Bumped whenever a data channel is replaced or closed locally, so
    /// closures of superseded channels are ignored.
    generation: AtomicU64,
    inbound: InboundSender,

    events: Observers<ConnectionEvent>,
    teardown: Observers<()>,
    shutdown: CancellationToken,
    /// Serializes connect, reconnect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        master: MasterConfig,
        client_name: impl Into<String>,
        backoff: ReconnectBackoff,
        transport: Arc<dyn Transport>,
        inbound: InboundSender,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            master,
            client_name: client_name.into(),
            backoff,
            transport,
            control: RwLock::new(None),
            data: RwLock::new(None),
            identity: RwLock::new(None),
            server: RwLock::new(None),
            devices: Mutex::new(HashMap::new()),
            state,
            generation: AtomicU64::new(0),
            inbound,
            events: Observers::new(),
            teardown: Observers::new(),
            shutdown: CancellationToken::new(),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Run the handshake.  Connecting an already connected manager is a
    /// no-op.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        tracing::info!(master = %self.master.service_base_url(), "connecting to master node");
        self.set_state(ConnectionState::Connecting);

        match self.handshake().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    client_id = %self.client_id().unwrap_or_default(),
                    "connected to master node"
                );
                self.events.notify(&ConnectionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                self.control.write().take();
                self.set_state(ConnectionState::Disconnected);
                tracing::warn!(error = %e, "handshake failed");
                Err(e)
            }
        }
    }

    async fn handshake(self: &Arc<Self>) -> Result<()> {
        let control = self.transport.open_control(&self.master).await?;
        *self.control.write() = Some(control.clone());

        let server = self.fetch_server_config(control.as_ref()).await?;

        let client_id = match self.client_id() {
            Some(id) => id,
            None => self.register_client(control.as_ref()).await?,
        };

        self.open_data_channel(&server, &client_id).await
    }

    /// Wait until the manager reports `Connected`.
    ///
    /// Fails with [`Error::Timeout`] after `retries × interval` and with
    /// [`Error::Cancelled`] when the manager shuts down first.
    pub async fn wait_for_connection(&self, retries: u32, interval: Duration) -> Result<()> {
        let budget = interval
            .checked_mul(retries)
            .ok_or_else(|| Error::Validation("connection wait budget overflows".into()))?;
        let mut rx = self.state.subscribe();
        let connected = async {
            rx.wait_for(|s| *s == ConnectionState::Connected)
                .await
                .map(|_| ())
        };

        tokio::select! {
            res = tokio::time::timeout(budget, connected) => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(Error::Cancelled),
                Err(_) => Err(Error::Timeout(format!(
                    "not connected after {} ms",
                    budget.as_millis()
                ))),
            },
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Tear the connection down: notify listeners, release every
    /// subscription produced by `release`, deregister owned devices and
    /// the client, close both channels.
    ///
    /// Local teardown always completes; the first remote failure is
    /// returned afterwards.
    pub async fn disconnect<F>(&self, release: F) -> Result<()>
    where
        F: FnOnce(&str) -> Option<TopicSubscription>,
    {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let Some(client) = self.identity.read().clone() else {
            return Err(Error::NotConnected);
        };
        let client_id = client.id.clone().unwrap_or_default();

        tracing::info!(client_id = %client_id, "disconnecting from master node");
        self.events.notify(&ConnectionEvent::Disconnecting);
        self.teardown.notify(&());

        let mut first_error: Option<Error> = None;

        if let Some(request) = release(&client_id) {
            let req = ServiceRequest::new(services::TOPIC_SUBSCRIPTION)
                .with_topic_subscription(request);
            if let Err(e) = self.call_service(req).await {
                tracing::warn!(error = %e, "failed to release subscriptions");
                first_error.get_or_insert(e);
            }
        }

        let devices: Vec<DeviceSpec> = self.devices.lock().drain().map(|(_, d)| d).collect();
        for device in devices {
            let req = ServiceRequest::new(services::DEVICE_DEREGISTRATION).with_device(device);
            if let Err(e) = self.call_service(req).await {
                tracing::warn!(error = %e, "failed to deregister device");
                first_error.get_or_insert(e);
            }
        }

        let req = ServiceRequest::new(services::CLIENT_DEREGISTRATION).with_client(client);
        if let Err(e) = self.call_service(req).await {
            tracing::warn!(error = %e, "failed to deregister client");
            first_error.get_or_insert(e);
        }

        self.identity.write().take();
        self.server.write().take();
        self.close_data_channel().await;
        self.control.write().take();
        self.set_state(ConnectionState::Disconnected);

        tracing::info!(client_id = %client_id, "disconnected");
        self.events.notify(&ConnectionEvent::Disconnected);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reopen both channels with the cached identity.  Opening is retried
    /// according to the [`ReconnectBackoff`] policy.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let client_id = self.client_id().ok_or(Error::NotConnected)?;

        self.set_state(ConnectionState::Reconnecting);
        let mut failures: u32 = 0;

        loop {
            match self.reopen(&client_id).await {
                Ok(()) => break,
                Err(e) => {
                    failures += 1;
                    if self.backoff.should_give_up(failures) {
                        tracing::error!(
                            attempts = failures,
                            error = %e,
                            "max reconnect attempts exhausted"
                        );
                        self.set_state(ConnectionState::Disconnected);
                        return Err(e);
                    }

                    let delay = self.backoff.delay_for_attempt(failures - 1);
                    tracing::warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            self.set_state(ConnectionState::Disconnected);
                            return Err(Error::Cancelled);
                        }
                    }
                }
            }
        }

        self.set_state(ConnectionState::Connected);
        tracing::info!(client_id = %client_id, "reconnected to master node");
        self.events.notify(&ConnectionEvent::Reconnected);
        Ok(())
    }

    async fn reopen(self: &Arc<Self>, client_id: &str) -> Result<()> {
        let control = self.transport.open_control(&self.master).await?;
        *self.control.write() = Some(control.clone());

        let cached = self.server.read().clone();
        let server = match cached {
            Some(server) => server,
            None => self.fetch_server_config(control.as_ref()).await?,
        };
        self.open_data_channel(&server, client_id).await
    }

    /// Cancel pending waits and reconnect back-off sleeps.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ── Handshake steps ──────────────────────────────────────────────

    async fn fetch_server_config(&self, control: &dyn ControlChannel) -> Result<ServerSpec> {
        let reply = self
            .request_on(control, ServiceRequest::new(services::SERVER_CONFIG))
            .await?;
        let server = reply.server.ok_or_else(|| {
            Error::Protocol("server configuration reply carried no server".into())
        })?;
        *self.server.write() = Some(server.clone());
        Ok(server)
    }

    async fn register_client(&self, control: &dyn ControlChannel) -> Result<String> {
        let req = ServiceRequest::new(services::CLIENT_REGISTRATION)
            .with_client(ClientSpec::named(self.client_name.clone()));
        let reply = self.request_on(control, req).await?;

        let client = reply
            .client
            .filter(|c| c.id.is_some())
            .ok_or_else(|| Error::Protocol("client registration reply carried no id".into()))?;
        let id = client.id.clone().unwrap_or_default();
        tracing::info!(client_id = %id, name = %self.client_name, "client registered");
        *self.identity.write() = Some(client);
        Ok(id)
    }

    async fn open_data_channel(self: &Arc<Self>, server: &ServerSpec, client_id: &str) -> Result<()> {
        let port = server.port_topic_data_ws.ok_or_else(|| {
            Error::Protocol("server configuration carried no topic data port".into())
        })?;
        let url = self.master.topic_data_url(port, client_id);

        self.close_data_channel().await;
        let generation = self.generation.load(Ordering::SeqCst);

        let channel = self.transport.open_data(&url, self.inbound.clone()).await?;
        *self.data.write() = Some(channel.clone());
        self.watch_data_channel(channel.closed(), generation);
        Ok(())
    }

    async fn close_data_channel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let data = self.data.write().take();
        if let Some(channel) = data {
            channel.close().await;
        }
    }

    /// React to the master node dropping the data channel.
    fn watch_data_channel(self: &Arc<Self>, closed: CancellationToken, generation: u64) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = shutdown.cancelled() => return,
            }
            let Some(this) = weak.upgrade() else { return };
            if this.generation.load(Ordering::SeqCst) != generation {
                return;
            }

            this.data.write().take();
            if this.state() == ConnectionState::Connected {
                tracing::warn!("data channel closed by master node");
                this.set_state(ConnectionState::Disconnected);
                this.events.notify(&ConnectionEvent::TransportClosed);
            }
        });
    }

    async fn request_on(
        &self,
        control: &dyn ControlChannel,
        req: ServiceRequest,
    ) -> Result<ServiceReply> {
        let started = Instant::now();
        let result = match control.request(&req).await {
            Ok(reply) => reply.into_result(),
            Err(e) => Err(e),
        };

        TraceEvent::ServiceCall {
            topic: req.topic.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            ok: result.is_ok(),
        }
        .emit();
        result
    }

    // ── Service calls ────────────────────────────────────────────────

    /// Send any request over the control channel.  An `error` reply
    /// becomes [`Error::Protocol`].
    pub async fn call_service(&self, req: ServiceRequest) -> Result<ServiceReply> {
        let control = self.control.read().clone().ok_or(Error::NotConnected)?;
        self.request_on(control.as_ref(), req).await
    }

    /// Register a device owned by this client.  It is deregistered
    /// automatically on disconnect.
    pub async fn register_device(&self, device: DeviceSpec) -> Result<DeviceSpec> {
        let client_id = self.client_id().ok_or(Error::NotConnected)?;
        let device = DeviceSpec {
            client_id: Some(client_id),
            ..device
        };

        let reply = self
            .call_service(ServiceRequest::new(services::DEVICE_REGISTRATION).with_device(device))
            .await?;
        let registered = reply.device.ok_or_else(|| {
            Error::Protocol("device registration reply carried no device".into())
        })?;

        if let Some(id) = &registered.id {
            self.devices.lock().insert(id.clone(), registered.clone());
        }
        Ok(registered)
    }

    pub async fn deregister_device(&self, device: DeviceSpec) -> Result<()> {
        let id = device.id.clone();
        self.call_service(ServiceRequest::new(services::DEVICE_DEREGISTRATION).with_device(device))
            .await?;
        if let Some(id) = id {
            self.devices.lock().remove(&id);
        }
        Ok(())
    }

    pub async fn register_session(&self, session: Value) -> Result<Value> {
        let reply = self
            .call_service(ServiceRequest::new(services::SESSION_REGISTRATION).with_session(session))
            .await?;
        Ok(reply.session.unwrap_or(Value::Null))
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn on_event<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.events.register(observer)
    }

    /// Register a callback run at the start of every explicit disconnect.
    pub fn on_disconnect<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.teardown.register(move |_: &()| callback())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn client_id(&self) -> Option<String> {
        self.identity.read().as_ref().and_then(|c| c.id.clone())
    }

    pub fn server_spec(&self) -> Option<ServerSpec> {
        self.server.read().clone()
    }

    /// Constants published by the master node in its configuration.
    pub fn server_constants(&self) -> Result<Value> {
        self.server_spec().ok_or(Error::NotConnected)?.constants()
    }

    pub fn devices(&self) -> Vec<DeviceSpec> {
        self.devices.lock().values().cloned().collect()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from != to {
            TraceEvent::ConnectionStateChanged {
                from: from.to_string(),
                to: to.to_string(),
            }
            .emit();
        }
    }
}

#[async_trait]
impl ServiceCaller for ConnectionManager {
    async fn call_service(&self, req: ServiceRequest) -> Result<ServiceReply> {
        ConnectionManager::call_service(self, req).await
    }

    fn client_id(&self) -> Option<String> {
        ConnectionManager::client_id(self)
    }
}

#[async_trait]
impl FrameSender for ConnectionManager {
    async fn send_frame(&self, frame: TopicData) -> Result<()> {
        let data = self.data.read().clone().ok_or(Error::NotConnected)?;
        data.send(&frame).await
    }
}
