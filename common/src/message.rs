//! Wire-format message types published by the extractor and consumed by both the graph and
//! relational consumers. Shared here so the three binaries can never disagree on the envelope
//! shape; each consumer treats the JSON as a transport encoding over its own typed record forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message types published to the broker, tagged by `type` in the wire JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "data")]
    Data(DataMessage),
    #[serde(rename = "file_complete")]
    FileComplete(FileCompleteMessage),
}

/// A single parsed record, stamped with its canonical content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMessage {
    pub id: String,
    pub sha256: String,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Sentinel emitted once a file's records have all been published, used by downstream
/// observers to recognise per-file boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCompleteMessage {
    pub data_type: String,
    pub timestamp: DateTime<Utc>,
    pub total_processed: u64,
    pub file: String,
}
