//! Frame serialization for the data channel.
//!
//! The core never looks inside encoded frames; it only needs a codec that
//! turns a [`TopicData`] into bytes and back.

use tn_domain::error::Result;
use tn_protocol::TopicData;

pub trait FrameCodec: Send + Sync {
    fn encode(&self, frame: &TopicData) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<TopicData>;
}

/// Default codec: the camelCase JSON form of [`TopicData`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    fn encode(&self, frame: &TopicData) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(frame)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<TopicData> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
