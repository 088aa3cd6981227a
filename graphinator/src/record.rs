//! Typed per-data-kind records lifted out of the raw xmltodict-shaped JSON a [`DataMessage`]
//! carries. The extractor's parser folds repeated XML child elements into an array only when
//! there is more than one (`members.name` is a bare object for a single member, an array for
//! several); every accessor here normalises that ambiguity away so the batch processor and the
//! Cypher builders only ever see plain lists.

use discogsography_common::DataMessage;
use serde_json::Value;

/// A reference to another entity of the same or a different kind, keyed by its Discogs id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub id: String,
}

fn as_items(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn value_id(value: &Value) -> Option<String> {
    let id = value.get("@id").or_else(|| value.get("id"))?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn entity_ref(value: &Value) -> Option<EntityRef> {
    value_id(value).map(|id| EntityRef { id })
}

/// Pulls `obj[wrapper][item]` (e.g. `members.name`) as a flat list of entity references,
/// tolerating the wrapper or the item being absent, a bare object, or an array.
fn nested_refs(obj: &Value, wrapper: &str, item: &str) -> Vec<EntityRef> {
    match obj.get(wrapper) {
        Some(w) => as_items(w.get(item)).into_iter().filter_map(entity_ref).collect(),
        None => Vec::new(),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => value.get("#text").and_then(Value::as_str).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls `obj[wrapper][item]` as a flat list of plain strings (genres, styles: bare `<genre>`
/// elements with no attributes, so they collapse to a string rather than `{"#text": ...}`).
fn nested_strings(obj: &Value, wrapper: &str, item: &str) -> Vec<String> {
    match obj.get(wrapper) {
        Some(w) => as_items(w.get(item)).into_iter().filter_map(text_of).collect(),
        None => Vec::new(),
    }
}

fn string_field(obj: &Value, field: &str) -> String {
    obj.get(field).and_then(|v| text_of(v)).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ArtistRecord {
    pub id: String,
    pub name: String,
    pub sha256: String,
    pub members: Vec<EntityRef>,
    pub groups: Vec<EntityRef>,
    pub aliases: Vec<EntityRef>,
}

impl ArtistRecord {
    pub fn from_message(msg: &DataMessage) -> Self {
        Self {
            id: msg.id.clone(),
            name: string_field(&msg.data, "name"),
            sha256: msg.sha256.clone(),
            members: nested_refs(&msg.data, "members", "name"),
            groups: nested_refs(&msg.data, "groups", "name"),
            aliases: nested_refs(&msg.data, "aliases", "name"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelRecord {
    pub id: String,
    pub name: String,
    pub sha256: String,
    pub parent_label: Option<EntityRef>,
    pub sublabels: Vec<EntityRef>,
}

impl LabelRecord {
    pub fn from_message(msg: &DataMessage) -> Self {
        Self {
            id: msg.id.clone(),
            name: string_field(&msg.data, "name"),
            sha256: msg.sha256.clone(),
            parent_label: msg.data.get("parentLabel").and_then(entity_ref),
            sublabels: nested_refs(&msg.data, "sublabels", "label"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasterRecord {
    pub id: String,
    pub title: String,
    pub year: Option<i64>,
    pub sha256: String,
    pub artists: Vec<EntityRef>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
}

impl MasterRecord {
    pub fn from_message(msg: &DataMessage) -> Self {
        let year = msg.data.get("year").and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        });
        Self {
            id: msg.id.clone(),
            title: string_field(&msg.data, "title"),
            year,
            sha256: msg.sha256.clone(),
            artists: nested_refs(&msg.data, "artists", "artist"),
            genres: nested_strings(&msg.data, "genres", "genre"),
            styles: nested_strings(&msg.data, "styles", "style"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseRecord {
    pub id: String,
    pub title: String,
    pub sha256: String,
    pub artists: Vec<EntityRef>,
    pub labels: Vec<EntityRef>,
    pub master_id: Option<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
}

impl ReleaseRecord {
    pub fn from_message(msg: &DataMessage) -> Self {
        let master_id = msg.data.get("master_id").and_then(text_of);
        Self {
            id: msg.id.clone(),
            title: string_field(&msg.data, "title"),
            sha256: msg.sha256.clone(),
            artists: nested_refs(&msg.data, "artists", "artist"),
            labels: nested_refs(&msg.data, "labels", "label"),
            master_id,
            genres: nested_strings(&msg.data, "genres", "genre"),
            styles: nested_strings(&msg.data, "styles", "style"),
        }
    }
}
