//! `tn-node-sdk`: client node SDK for topicnode master nodes.
//!
//! A "client node" is any process that registers with a master node,
//! publishes records on topics, and subscribes to topics, topic patterns,
//! or structurally described components.  This crate provides the
//! connection lifecycle, subscription bookkeeping and publish batching so
//! node authors only write callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your Node (CLI / service / embedded)                     │
//! │                                                           │
//! │   let node = ClientNodeBuilder::new()                     │
//! │       .host("master.local")                               │
//! │       .name("pose tracker")                               │
//! │       .build()?;                                          │
//! │   node.connect().await?;                                  │
//! │   let token = node.subscribe_topic("/pose", cb).await?;   │
//! │   node.publish_record(Record::new("/out", payload));      │
//! └───────────────────────────────────────────────────────────┘
//!          │ control channel (HTTP POST /services)
//!          │ data channel (WebSocket ?clientID=...)
//!          ▼
//!     master node
//! ```
//!
//! # Connection flow
//!
//! 1. Open the control channel
//! 2. Query `/services/server_configuration` (data port, constants)
//! 3. Register via `/services/client/registration` unless an identity is cached
//! 4. Open the data channel for that identity
//! 5. Inbound frames are dispatched to matching subscriptions; queued
//!    records leave as one batch per publish interval
//!
//! # Subscriptions
//!
//! - Topic: exact string match
//! - Regex: pattern tested against every received topic
//! - Component: a [`ComponentProfile`] matched against the available
//!   components; their topics are followed as new components appear
//!
//! Each distinct key is registered with the master node once, however
//! many local subscribers share it.

pub mod builder;
pub mod client;
pub mod codec;
pub mod connection;
pub mod events;
pub mod filter;
pub mod publish;
pub mod reconnect;
pub mod registry;
pub mod rest;
pub mod transport;
pub mod types;
pub mod ws;

#[cfg(test)]
mod testing;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ClientNodeBuilder;
pub use client::ClientNode;
pub use codec::{FrameCodec, JsonCodec};
pub use connection::ConnectionManager;
pub use events::ObserverHandle;
pub use publish::PublishQueue;
pub use reconnect::ReconnectBackoff;
pub use registry::{SubscriptionKey, SubscriptionKind, SubscriptionRegistry, SubscriptionToken};
pub use transport::{ControlChannel, DataChannel, NetTransport, Transport};
pub use types::{ConnectionEvent, ConnectionState, RecordCallback};

// Re-export the shared crates so nodes never need to import them directly.
pub use tn_domain::config::NodeConfig;
pub use tn_domain::{Error, Result};
pub use tn_protocol::{ComponentProfile, DeviceSpec, IoType, Record, ServerSpec, ServiceRequest};
