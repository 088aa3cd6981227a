//! Conversions from this crate's typed records into `neo4rs` query parameters.
//!
//! Every Cypher statement below binds one list-of-maps parameter (`$artists`, `$members`, ...)
//! built from these helpers rather than a single scalar per record, matching the `UNWIND`-based
//! batch writes the whole design is built around.

use neo4rs::BoltType;
use std::collections::HashMap;

pub fn bolt_string(s: &str) -> BoltType {
    BoltType::String(s.into())
}

pub fn bolt_opt_string(s: &Option<String>) -> BoltType {
    match s {
        Some(s) => bolt_string(s),
        None => BoltType::Null(neo4rs::BoltNull),
    }
}

pub fn bolt_opt_int(n: Option<i64>) -> BoltType {
    match n {
        Some(n) => BoltType::Integer(n.into()),
        None => BoltType::Null(neo4rs::BoltNull),
    }
}

pub fn bolt_map(pairs: Vec<(&str, BoltType)>) -> BoltType {
    let map: HashMap<String, BoltType> = pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    map.into()
}

pub fn bolt_list(items: Vec<BoltType>) -> BoltType {
    items.into()
}

/// Builds the flat `[{"<left_key>": ..., "<right_key>": ...}, ...]` edge-tuple list each
/// relationship `UNWIND` query expects, from every record's own list of related entity ids.
pub fn edge_tuples<'a, T, I>(records: &'a [T], left_key: &str, right_key: &str, left_id: impl Fn(&'a T) -> &'a str, edges: impl Fn(&'a T) -> I) -> BoltType
where
    I: IntoIterator<Item = &'a crate::record::EntityRef>,
{
    let mut tuples = Vec::new();
    for record in records {
        let left = left_id(record);
        for edge in edges(record) {
            tuples.push(bolt_map(vec![(left_key, bolt_string(left)), (right_key, bolt_string(&edge.id))]));
        }
    }
    bolt_list(tuples)
}
