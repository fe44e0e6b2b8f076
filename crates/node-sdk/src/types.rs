//! Core types shared by the node components: connection states, lifecycle
//! events, subscription callbacks.

use std::fmt;
use std::sync::Arc;

use tn_protocol::Record;

/// Handshake state machine of the [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reopening the transports with a cached identity.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Lifecycle notifications delivered to observers registered with
/// [`ConnectionManager::on_event`](crate::ConnectionManager::on_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    /// An explicit disconnect started; the identity is still valid.
    Disconnecting,
    Disconnected,
    Reconnected,
    /// The data channel dropped without a local disconnect.
    TransportClosed,
}

/// Callback invoked for every record dispatched to a subscription.
pub type RecordCallback = Arc<dyn Fn(&Record) + Send + Sync>;
