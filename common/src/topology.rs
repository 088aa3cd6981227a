//! Names shared between the extractor (which declares the topology) and the two consumers
//! (which bind to it). Keeping these in one place guarantees the publisher and the consumers
//! can never disagree on an exchange or queue name.

use crate::data_type::DataType;

pub const EXCHANGE: &str = "discogsography-exchange";
pub const QUEUE_PREFIX_GRAPHINATOR: &str = "discogsography-graphinator";
pub const QUEUE_PREFIX_TABLEINATOR: &str = "discogsography-tableinator";

/// Poison messages are routed to the DLQ after this many failed delivery attempts.
pub const DELIVERY_LIMIT: i32 = 20;

pub fn dead_letter_exchange() -> String {
    format!("{}.dlx", EXCHANGE)
}

pub fn queue_name(prefix: &str, data_type: DataType) -> String {
    format!("{}-{}", prefix, data_type)
}

pub fn dead_letter_queue_name(queue_name: &str) -> String {
    format!("{}.dlq", queue_name)
}
