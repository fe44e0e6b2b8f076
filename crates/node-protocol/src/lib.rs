//! Master node protocol: the JSON service envelope spoken over the control
//! channel, the topic data frames carried by the data channel, and the
//! component profiles both of them describe.
//!
//! Field names follow the master node's camelCase wire format.

pub mod profile;
pub mod service;
pub mod topic_data;
pub mod topics;

pub use profile::{ComponentList, ComponentProfile, IoType};
pub use service::{
    ClientSpec, DeviceSpec, ErrorReply, ServerSpec, ServiceReply, ServiceRequest, SuccessReply,
    TopicSubscription,
};
pub use topic_data::{Record, RecordList, TopicData};

/// Regex source matching the identifiers the master node hands out
/// (UUID v4, lowercase).  Handy for per-client regex subscriptions such
/// as `format!("/{UUID_V4_PATTERN}/pose")`.
pub const UUID_V4_PATTERN: &str =
    "[0-9a-z]{8}-[0-9a-z]{4}-[0-9a-z]{4}-[0-9a-z]{4}-[0-9a-z]{12}";
