//! The relational projection stores a record's whole body verbatim as `JSONB`, so unlike the
//! graph consumer there is no per-kind field extraction here: every [`DataType`](discogsography_common::DataType)
//! produces the same shape, just against a different table.

use discogsography_common::DataMessage;
use serde_json::Value;

/// One row's worth of data: the hash-skip key, the primary key, and the verbatim record body.
#[derive(Debug, Clone)]
pub struct TableRecord {
    pub data_id: String,
    pub sha256: String,
    pub data: Value,
}

impl TableRecord {
    pub fn from_message(msg: &DataMessage) -> Self {
        Self { data_id: msg.id.clone(), sha256: msg.sha256.clone(), data: msg.data.clone() }
    }
}
