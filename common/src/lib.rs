//! Shared types and helpers used by the `extractor`, `graphinator`, and `tableinator` binaries.

pub mod consumer;
pub mod data_type;
pub mod hashing;
pub mod logging;
pub mod message;
pub mod topology;

pub use data_type::DataType;
pub use hashing::{canonical_json, record_hash};
pub use message::{DataMessage, FileCompleteMessage, Message};
