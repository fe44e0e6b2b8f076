//! Frames carried by the data channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::ErrorReply;

/// One value published under a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Record {
    /// A record stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: Some(Utc::now()),
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordList {
    #[serde(default)]
    pub elements: Vec<Record>,
}

/// A data channel frame: a single record, a list of records, or an error
/// pushed by the master node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TopicData {
    TopicDataRecord(Record),
    TopicDataRecordList(RecordList),
    Error(ErrorReply),
}

impl TopicData {
    pub fn record(record: Record) -> Self {
        TopicData::TopicDataRecord(record)
    }

    pub fn record_list(elements: Vec<Record>) -> Self {
        TopicData::TopicDataRecordList(RecordList { elements })
    }

    /// Records in frame order; an error frame has none.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            TopicData::TopicDataRecord(r) => vec![r],
            TopicData::TopicDataRecordList(list) => list.elements,
            TopicData::Error(_) => Vec::new(),
        }
    }
}
