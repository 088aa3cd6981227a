use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, warn};

use crate::types::{DataType, RawRecord};

/// An element being parsed, holding its attributes, children, and raw text until the closing
/// tag is seen and it can be folded into a single `xmltodict`-shaped JSON value.
#[derive(Debug)]
struct ElementContext {
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text_content: String,
}

impl ElementContext {
    fn new() -> Self {
        Self { attributes: Map::new(), children: Map::new(), text_content: String::new() }
    }

    /// Fold attributes, text, and children into one value, matching xmltodict's conventions:
    /// attributes get an `@` prefix, text alongside attributes or children goes under `#text`,
    /// and a childless, attributeless element with only text collapses to a bare string.
    fn to_value(self) -> Value {
        let mut result = Map::new();

        for (key, value) in self.attributes {
            result.insert(format!("@{}", key), value);
        }

        let trimmed_text = self.text_content.trim();
        if self.children.is_empty() {
            if result.is_empty() && !trimmed_text.is_empty() {
                return Value::String(trimmed_text.to_string());
            } else if !trimmed_text.is_empty() {
                result.insert("#text".to_string(), Value::String(trimmed_text.to_string()));
            }
        }

        for (key, value) in self.children {
            result.insert(key, value);
        }

        if result.is_empty() && !trimmed_text.is_empty() {
            Value::String(trimmed_text.to_string())
        } else if result.is_empty() {
            Value::Null
        } else {
            Value::Object(result)
        }
    }

    /// Add a child, promoting repeated tag names into an array the way xmltodict does.
    fn add_child(&mut self, child_name: String, child_value: Value) {
        if let Some(existing) = self.children.get_mut(&child_name) {
            match existing {
                Value::Array(arr) => arr.push(child_value),
                _ => {
                    let old_value = existing.take();
                    *existing = Value::Array(vec![old_value, child_value]);
                }
            }
        } else {
            self.children.insert(child_name, child_value);
        }
    }
}

/// Streams one gzip-compressed Discogs snapshot file, emitting one [`RawRecord`] per top-level
/// record element (`artist`, `label`, `master`, or `release`) without ever holding the whole
/// document in memory. Hashing is deliberately not done here: it happens in the record-worker
/// stage downstream, so this stage stays a pure parse-and-enqueue loop.
///
/// Enqueuing onto the record channel is backpressure-aware: as the channel fills past 40/60/80%
/// of its capacity the parser sleeps 1/5/10 ms before sending, and a record that still can't be
/// enqueued after 30 s is dropped (counted in `error_count`) rather than stalling the parse.
pub struct XmlParser {
    data_type: DataType,
    sender: mpsc::Sender<RawRecord>,
    queue_capacity: usize,
    error_count: Arc<AtomicU64>,
}

impl XmlParser {
    pub fn new(data_type: DataType, sender: mpsc::Sender<RawRecord>, queue_capacity: usize, error_count: Arc<AtomicU64>) -> Self {
        Self { data_type, sender, queue_capacity: queue_capacity.max(1), error_count }
    }

    /// Enqueue a parsed record, applying adaptive backpressure and the hard 30 s drop timeout.
    /// Returns `false` only when the receiving end has gone away and parsing should stop.
    async fn enqueue(&self, message: RawRecord) -> bool {
        let in_flight = self.queue_capacity.saturating_sub(self.sender.capacity());
        let fraction = in_flight as f64 / self.queue_capacity as f64;
        let delay = if fraction >= 0.8 {
            Some(Duration::from_millis(10))
        } else if fraction >= 0.6 {
            Some(Duration::from_millis(5))
        } else if fraction >= 0.4 {
            Some(Duration::from_millis(1))
        } else {
            None
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(Duration::from_secs(30), self.sender.send(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("⚠️ Receiver dropped, stopping parsing");
                false
            }
            Err(_) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Record queue enqueue timed out after 30s, dropping record");
                true
            }
        }
    }

    pub async fn parse_file(&self, file_path: &Path) -> Result<u64> {
        let file = File::open(file_path).with_context(|| format!("failed to open file: {:?}", file_path))?;

        let decoder = GzDecoder::new(file);
        let buf_reader = BufReader::new(decoder);

        let mut reader = Reader::from_reader(buf_reader);

        let mut buf = Vec::new();
        let mut record_count = 0u64;
        let mut in_target_element = false;

        let mut element_stack: Vec<ElementContext> = Vec::new();
        let mut depth = 0usize;

        let target_element = match self.data_type {
            DataType::Artists => "artist",
            DataType::Labels => "label",
            DataType::Masters => "master",
            DataType::Releases => "release",
        };

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    depth += 1;

                    if name == target_element && depth == 2 {
                        in_target_element = true;
                        element_stack.clear();
                    }

                    if in_target_element {
                        let mut context = ElementContext::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let value = String::from_utf8_lossy(&attr.value).to_string();
                            context.attributes.insert(key, Value::String(value));
                        }
                        element_stack.push(context);
                    }
                }

                Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    depth += 1;

                    if name == target_element && depth == 2 {
                        element_stack.clear();

                        let mut context = ElementContext::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let value = String::from_utf8_lossy(&attr.value).to_string();
                            context.attributes.insert(key, Value::String(value));
                        }

                        let record = context.to_value();
                        if let Value::Object(ref obj) = record {
                            let id = obj.get("id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                            let message = RawRecord { id, data: record.clone() };

                            if !self.enqueue(message).await {
                                break;
                            }
                            record_count += 1;
                        }

                        in_target_element = false;
                    } else if in_target_element {
                        let mut context = ElementContext::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let value = String::from_utf8_lossy(&attr.value).to_string();
                            context.attributes.insert(key, Value::String(value));
                        }

                        let child_value = context.to_value();
                        if let Some(parent) = element_stack.last_mut() {
                            parent.add_child(name, child_value);
                        }
                    }

                    depth -= 1;
                }

                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    if in_target_element {
                        if let Some(context) = element_stack.pop() {
                            let element_value = context.to_value();

                            if name == target_element && depth == 2 {
                                if let Value::Object(obj) = element_value {
                                    let id = obj.get("@id").or_else(|| obj.get("id")).and_then(|v| v.as_str()).unwrap_or("unknown").to_string();

                                    // Releases and masters carry a plain `id` field alongside `@id`,
                                    // matching what the upstream publisher's own exporter does.
                                    let mut final_obj = obj;
                                    if matches!(self.data_type, DataType::Releases | DataType::Masters)
                                        && final_obj.get("@id").is_some()
                                        && final_obj.get("id").is_none()
                                    {
                                        final_obj.insert("id".to_string(), Value::String(id.clone()));
                                    }

                                    let final_value = Value::Object(final_obj);
                                    let message = RawRecord { id: id.clone(), data: final_value };

                                    if !self.enqueue(message).await {
                                        break;
                                    }

                                    record_count += 1;
                                    if record_count % 1000 == 0 {
                                        debug!("📊 Parsed {} {} records", record_count, self.data_type);
                                    }
                                }

                                in_target_element = false;
                            } else if let Some(parent) = element_stack.last_mut() {
                                parent.add_child(name, element_value);
                            }
                        }
                    }

                    depth -= 1;
                }

                Ok(Event::Text(e)) => {
                    if in_target_element {
                        if let Some(context) = element_stack.last_mut() {
                            context.text_content.push_str(&e.unescape().unwrap_or_default());
                        }
                    }
                }

                Ok(Event::CData(e)) => {
                    if in_target_element {
                        if let Some(context) = element_stack.last_mut() {
                            context.text_content.push_str(&String::from_utf8_lossy(&e));
                        }
                    }
                }

                Ok(Event::Eof) => break,

                Err(e) => {
                    error!("❌ Error parsing XML at position {}: {}", reader.buffer_position(), e);
                    return Err(e.into());
                }

                _ => {}
            }

            buf.clear();
        }

        debug!("✅ Finished parsing {} records from {:?}", record_count, file_path);
        Ok(record_count)
    }
}
