use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

pub use discogsography_common::DataType;
pub use discogsography_common::message::{DataMessage, FileCompleteMessage, Message};

/// Process-start reference point. `last_extraction_time` and the stall check both read elapsed
/// seconds off this single clock so the two numbers are actually comparable, rather than each
/// calling `Instant::now().elapsed()` against its own just-created instant (which is always ~0).
static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds elapsed since the process started.
pub fn process_clock_secs() -> f64 {
    PROCESS_START.elapsed().as_secs_f64()
}

/// One XML record as handed off by the parser stage, before the record-worker stage has
/// computed its canonical-JSON hash (§4.4.1 stages 1 and 2 are deliberately split so hashing
/// runs on `max_workers` concurrent tasks rather than serially inside the parser).
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: String,
    pub data: serde_json::Value,
}

/// Progress tracking for extraction, keyed by the same four data types as the broker topology.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionProgress {
    pub artists: u64,
    pub labels: u64,
    pub masters: u64,
    pub releases: u64,
}

impl ExtractionProgress {
    pub fn increment(&mut self, data_type: DataType) {
        match data_type {
            DataType::Artists => self.artists += 1,
            DataType::Labels => self.labels += 1,
            DataType::Masters => self.masters += 1,
            DataType::Releases => self.releases += 1,
        }
    }

    pub fn get(&self, data_type: DataType) -> u64 {
        match data_type {
            DataType::Artists => self.artists,
            DataType::Labels => self.labels,
            DataType::Masters => self.masters,
            DataType::Releases => self.releases,
        }
    }

    pub fn total(&self) -> u64 {
        self.artists + self.labels + self.masters + self.releases
    }
}

/// One entry in the upstream publisher's per-year file index: a filename and its (often
/// unreported, hence `0`) advertised size.
#[derive(Debug, Clone)]
pub struct RemoteFileInfo {
    pub name: String,
    pub size: u64,
}

/// Local on-disk record of a downloaded file, persisted in `.discogs_metadata.json` so a
/// subsequent run can recognise byte-identical files and skip re-downloading them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFileInfo {
    pub path: String,
    pub checksum: String,
    pub version: String,
    pub size: u64,
}
