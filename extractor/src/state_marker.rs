use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Phase status for tracking progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-file download tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDownloadStatus {
    pub status: PhaseStatus,
    pub bytes_downloaded: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for FileDownloadStatus {
    fn default() -> Self {
        Self { status: PhaseStatus::Pending, bytes_downloaded: 0, started_at: None, completed_at: None }
    }
}

/// Download phase tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadPhase {
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_downloaded: usize,
    pub files_total: usize,
    pub bytes_downloaded: u64,
    pub downloads_by_file: HashMap<String, FileDownloadStatus>,
    pub errors: Vec<String>,
}

impl Default for DownloadPhase {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            files_downloaded: 0,
            files_total: 0,
            bytes_downloaded: 0,
            downloads_by_file: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

/// File processing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessingStatus {
    pub status: PhaseStatus,
    pub records_extracted: u64,
    pub messages_published: u64,
    pub batches_sent: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for FileProcessingStatus {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            records_extracted: 0,
            messages_published: 0,
            batches_sent: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Processing phase tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingPhase {
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_processed: usize,
    pub files_total: usize,
    pub records_extracted: u64,
    pub current_file: Option<String>,
    pub progress_by_file: HashMap<String, FileProcessingStatus>,
    pub errors: Vec<String>,
}

impl Default for ProcessingPhase {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            files_processed: 0,
            files_total: 0,
            records_extracted: 0,
            current_file: None,
            progress_by_file: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

/// Publishing phase tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingPhase {
    pub status: PhaseStatus,
    pub messages_published: u64,
    pub batches_sent: u64,
    pub errors: Vec<String>,
    pub last_amqp_heartbeat: Option<DateTime<Utc>>,
}

impl Default for PublishingPhase {
    fn default() -> Self {
        Self { status: PhaseStatus::Pending, messages_published: 0, batches_sent: 0, errors: Vec::new(), last_amqp_heartbeat: None }
    }
}

/// Overall extraction status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub overall_status: PhaseStatus,
    pub total_duration_seconds: Option<f64>,
    pub files_by_type: HashMap<String, PhaseStatus>,
}

impl Default for ExtractionSummary {
    fn default() -> Self {
        Self { overall_status: PhaseStatus::Pending, total_duration_seconds: None, files_by_type: HashMap::new() }
    }
}

/// Per-snapshot-version state, persisted to `.extraction_status_<version>.json` so a restart
/// can tell what it already downloaded, processed, and published without redoing any of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMarker {
    /// Schema version of this file, independent of the Discogs snapshot version it describes.
    pub metadata_version: String,

    pub last_updated: DateTime<Utc>,

    /// Discogs snapshot version this marker tracks (e.g. "20260101").
    pub current_version: String,

    pub download_phase: DownloadPhase,
    pub processing_phase: ProcessingPhase,
    pub publishing_phase: PublishingPhase,
    pub summary: ExtractionSummary,
}

impl StateMarker {
    pub fn new(version: String) -> Self {
        Self {
            metadata_version: "1.0".to_string(),
            last_updated: Utc::now(),
            current_version: version,
            download_phase: DownloadPhase::default(),
            processing_phase: ProcessingPhase::default(),
            publishing_phase: PublishingPhase::default(),
            summary: ExtractionSummary::default(),
        }
    }

    /// Load a state marker from disk. A missing file is a normal "nothing tracked yet" case;
    /// a present-but-corrupt file is logged and treated the same way rather than aborting the
    /// run, since a marker only ever records progress and is always safe to rebuild from
    /// scratch.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("📋 No state marker found at: {}", path.display());
            return Ok(None);
        }

        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) => {
                warn!("⚠️ Failed to read state marker at {}: {err}, starting fresh", path.display());
                return Ok(None);
            }
        };

        match serde_json::from_str::<StateMarker>(&contents) {
            Ok(marker) => {
                info!("📋 Loaded state marker for version: {}", marker.current_version);
                Ok(Some(marker))
            }
            Err(err) => {
                warn!("⚠️ State marker at {} is corrupt ({err}), starting fresh", path.display());
                Ok(None)
            }
        }
    }

    /// Writes the marker atomically: serialize, write to a sibling temp file, then `rename()`
    /// into place. A crash mid-write leaves the temp file orphaned and the previous marker
    /// (or none) intact, never a truncated one.
    pub async fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Utc::now();

        let json = serde_json::to_string_pretty(self).context("failed to serialize state marker")?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.context("failed to write state marker temp file")?;
        fs::rename(&tmp_path, path).await.context("failed to rename state marker temp file into place")?;

        debug!("💾 Saved state marker to: {}", path.display());
        Ok(())
    }

    pub fn file_path(discogs_root: &Path, version: &str) -> PathBuf {
        discogs_root.join(format!(".extraction_status_{}.json", version))
    }

    /// Decide whether a version needs a full re-download, can resume mid-processing, or is
    /// already done.
    pub fn should_process(&self) -> ProcessingDecision {
        if self.download_phase.status == PhaseStatus::Failed {
            warn!("⚠️ Download phase failed, will re-download");
            return ProcessingDecision::Reprocess;
        }

        if self.processing_phase.status == PhaseStatus::Failed {
            warn!("⚠️ Processing phase failed, will resume");
            return ProcessingDecision::Continue;
        }

        if self.processing_phase.status == PhaseStatus::InProgress {
            info!("🔄 Processing in progress, will resume");
            return ProcessingDecision::Continue;
        }

        if self.summary.overall_status == PhaseStatus::Completed {
            info!("✅ Version {} already fully processed", self.current_version);
            return ProcessingDecision::Skip;
        }

        ProcessingDecision::Continue
    }

    pub fn start_download(&mut self, files_total: usize) {
        self.download_phase.status = PhaseStatus::InProgress;
        self.download_phase.started_at = Some(Utc::now());
        self.download_phase.files_total = files_total;
        self.download_phase.files_downloaded = 0;
        self.download_phase.bytes_downloaded = 0;
    }

    pub fn start_file_download(&mut self, filename: &str) {
        let status = FileDownloadStatus { status: PhaseStatus::InProgress, started_at: Some(Utc::now()), ..Default::default() };
        self.download_phase.downloads_by_file.insert(filename.to_string(), status);
    }

    pub fn file_downloaded(&mut self, filename: &str, bytes: u64) {
        if let Some(status) = self.download_phase.downloads_by_file.get_mut(filename) {
            status.status = PhaseStatus::Completed;
            status.bytes_downloaded = bytes;
            status.completed_at = Some(Utc::now());
        } else {
            self.download_phase.downloads_by_file.insert(
                filename.to_string(),
                FileDownloadStatus { status: PhaseStatus::Completed, bytes_downloaded: bytes, started_at: Some(Utc::now()), completed_at: Some(Utc::now()) },
            );
        }

        self.download_phase.files_downloaded += 1;
        self.download_phase.bytes_downloaded = self.download_phase.downloads_by_file.values().map(|s| s.bytes_downloaded).sum();
    }

    pub fn complete_download(&mut self) {
        self.download_phase.status = PhaseStatus::Completed;
        self.download_phase.completed_at = Some(Utc::now());
        info!("✅ Download phase completed: {} files, {} bytes", self.download_phase.files_downloaded, self.download_phase.bytes_downloaded);
    }

    pub fn fail_download(&mut self, error: String) {
        self.download_phase.status = PhaseStatus::Failed;
        self.download_phase.errors.push(error);
        self.summary.overall_status = PhaseStatus::Failed;
    }

    pub fn start_processing(&mut self, files_total: usize) {
        self.processing_phase.status = PhaseStatus::InProgress;
        self.processing_phase.started_at = Some(Utc::now());
        self.processing_phase.files_total = files_total;
        self.processing_phase.files_processed = 0;
        self.processing_phase.records_extracted = 0;
        self.summary.overall_status = PhaseStatus::InProgress;
    }

    pub fn start_file_processing(&mut self, filename: &str) {
        self.processing_phase.current_file = Some(filename.to_string());

        let status = FileProcessingStatus { status: PhaseStatus::InProgress, started_at: Some(Utc::now()), ..Default::default() };
        self.processing_phase.progress_by_file.insert(filename.to_string(), status);

        if let Some(data_type) = extract_data_type(filename) {
            self.summary.files_by_type.insert(data_type, PhaseStatus::InProgress);
        }
    }

    /// Update per-file progress and re-derive every aggregate from `progress_by_file` so that
    /// out-of-order or repeated updates can never double-count.
    pub fn update_file_progress(&mut self, filename: &str, records: u64, messages: u64, batches: u64) {
        if let Some(status) = self.processing_phase.progress_by_file.get_mut(filename) {
            status.records_extracted = records;
            status.messages_published = messages;
            status.batches_sent = batches;
        }

        self.recompute_aggregates();

        if self.publishing_phase.messages_published > 0 {
            self.publishing_phase.status = PhaseStatus::InProgress;
            self.publishing_phase.last_amqp_heartbeat = Some(Utc::now());
        }
    }

    pub fn complete_file_processing(&mut self, filename: &str, records: u64) {
        if let Some(status) = self.processing_phase.progress_by_file.get_mut(filename) {
            status.status = PhaseStatus::Completed;
            status.completed_at = Some(Utc::now());
            status.records_extracted = records;
        }

        self.processing_phase.files_processed += 1;
        self.recompute_aggregates();

        if let Some(data_type) = extract_data_type(filename) {
            self.summary.files_by_type.insert(data_type, PhaseStatus::Completed);
        }
    }

    fn recompute_aggregates(&mut self) {
        self.processing_phase.records_extracted = self.processing_phase.progress_by_file.values().map(|s| s.records_extracted).sum();
        self.publishing_phase.messages_published = self.processing_phase.progress_by_file.values().map(|s| s.messages_published).sum();
        self.publishing_phase.batches_sent = self.processing_phase.progress_by_file.values().map(|s| s.batches_sent).sum();
    }

    pub fn complete_processing(&mut self) {
        self.processing_phase.status = PhaseStatus::Completed;
        self.processing_phase.completed_at = Some(Utc::now());
        self.processing_phase.current_file = None;

        info!(
            "✅ Processing phase completed: {} files, {} records",
            self.processing_phase.files_processed, self.processing_phase.records_extracted
        );
    }

    pub fn fail_processing(&mut self, error: String) {
        self.processing_phase.status = PhaseStatus::Failed;
        self.processing_phase.errors.push(error);
        self.summary.overall_status = PhaseStatus::Failed;
    }

    pub fn update_publishing(&mut self, messages: u64, batches: u64) {
        self.publishing_phase.status = PhaseStatus::InProgress;
        self.publishing_phase.messages_published += messages;
        self.publishing_phase.batches_sent += batches;
        self.publishing_phase.last_amqp_heartbeat = Some(Utc::now());
    }

    pub fn fail_publishing(&mut self, error: String) {
        self.publishing_phase.status = PhaseStatus::Failed;
        self.publishing_phase.errors.push(error);
    }

    pub fn complete_extraction(&mut self) {
        self.publishing_phase.status = PhaseStatus::Completed;
        self.summary.overall_status = PhaseStatus::Completed;

        if let (Some(start), Some(end)) = (self.download_phase.started_at, self.processing_phase.completed_at) {
            self.summary.total_duration_seconds = Some((end - start).num_seconds() as f64);
        }

        info!("🎉 Extraction completed for version {}", self.current_version);
    }

    pub fn pending_files(&self, all_files: &[String]) -> Vec<String> {
        all_files
            .iter()
            .filter(|f| self.processing_phase.progress_by_file.get(*f).map(|status| status.status != PhaseStatus::Completed).unwrap_or(true))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingDecision {
    Reprocess,
    Continue,
    Skip,
}

/// Extract the data-type token from a snapshot filename, e.g.
/// `discogs_20260101_artists.xml.gz` -> `"artists"`.
fn extract_data_type(filename: &str) -> Option<String> {
    filename.split('_').nth(2).and_then(|s| s.split('.').next()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_state_marker() {
        let marker = StateMarker::new("20260101".to_string());
        assert_eq!(marker.current_version, "20260101");
        assert_eq!(marker.metadata_version, "1.0");
        assert_eq!(marker.download_phase.status, PhaseStatus::Pending);
        assert_eq!(marker.processing_phase.status, PhaseStatus::Pending);
        assert_eq!(marker.publishing_phase.status, PhaseStatus::Pending);
        assert_eq!(marker.summary.overall_status, PhaseStatus::Pending);
    }

    #[test]
    fn test_download_phase_lifecycle() {
        let mut marker = StateMarker::new("20260101".to_string());

        marker.start_download(4);
        assert_eq!(marker.download_phase.status, PhaseStatus::InProgress);
        assert_eq!(marker.download_phase.files_total, 4);
        assert!(marker.download_phase.started_at.is_some());

        marker.file_downloaded("discogs_20260101_artists.xml.gz", 1000);
        marker.file_downloaded("discogs_20260101_labels.xml.gz", 2000);
        assert_eq!(marker.download_phase.files_downloaded, 2);
        assert_eq!(marker.download_phase.bytes_downloaded, 3000);
        assert_eq!(marker.download_phase.downloads_by_file.len(), 2);

        marker.complete_download();
        assert_eq!(marker.download_phase.status, PhaseStatus::Completed);
        assert!(marker.download_phase.completed_at.is_some());
    }

    #[test]
    fn test_processing_phase_lifecycle() {
        let mut marker = StateMarker::new("20260101".to_string());

        marker.start_processing(4);
        assert_eq!(marker.processing_phase.status, PhaseStatus::InProgress);
        assert_eq!(marker.summary.overall_status, PhaseStatus::InProgress);

        marker.start_file_processing("discogs_20260101_artists.xml.gz");
        marker.update_file_progress("discogs_20260101_artists.xml.gz", 100, 100, 2);
        assert_eq!(marker.processing_phase.records_extracted, 100);
        assert_eq!(marker.publishing_phase.messages_published, 100);

        marker.start_file_processing("discogs_20260101_labels.xml.gz");
        marker.update_file_progress("discogs_20260101_labels.xml.gz", 50, 50, 1);
        assert_eq!(marker.processing_phase.records_extracted, 150);
        assert_eq!(marker.publishing_phase.batches_sent, 3);

        marker.complete_file_processing("discogs_20260101_artists.xml.gz", 100);
        assert_eq!(marker.processing_phase.files_processed, 1);
        assert_eq!(marker.processing_phase.records_extracted, 150);

        marker.complete_processing();
        assert_eq!(marker.processing_phase.status, PhaseStatus::Completed);
        assert!(marker.processing_phase.current_file.is_none());
    }

    #[test]
    fn test_should_process_decisions() {
        let mut marker = StateMarker::new("20260101".to_string());
        assert_eq!(marker.should_process(), ProcessingDecision::Continue);

        marker.fail_download("test error".to_string());
        assert_eq!(marker.should_process(), ProcessingDecision::Reprocess);

        marker = StateMarker::new("20260101".to_string());
        marker.start_processing(4);
        assert_eq!(marker.should_process(), ProcessingDecision::Continue);

        marker.complete_processing();
        marker.complete_extraction();
        assert_eq!(marker.should_process(), ProcessingDecision::Skip);
    }

    #[test]
    fn test_pending_files() {
        let mut marker = StateMarker::new("20260101".to_string());
        let all_files = vec![
            "discogs_20260101_artists.xml.gz".to_string(),
            "discogs_20260101_labels.xml.gz".to_string(),
            "discogs_20260101_masters.xml.gz".to_string(),
        ];

        assert_eq!(marker.pending_files(&all_files).len(), 3);

        marker.start_file_processing("discogs_20260101_artists.xml.gz");
        marker.complete_file_processing("discogs_20260101_artists.xml.gz", 100);

        let pending = marker.pending_files(&all_files);
        assert_eq!(pending.len(), 2);
        assert!(!pending.contains(&"discogs_20260101_artists.xml.gz".to_string()));
    }

    #[test]
    fn test_extract_data_type() {
        assert_eq!(extract_data_type("discogs_20260101_artists.xml.gz"), Some("artists".to_string()));
        assert_eq!(extract_data_type("discogs_20260101_releases.xml.gz"), Some("releases".to_string()));
        assert_eq!(extract_data_type("invalid.xml.gz"), None);
    }

    #[test]
    fn test_file_path_generation() {
        let path = StateMarker::file_path(Path::new("/discogs-data"), "20260101");
        assert_eq!(path, PathBuf::from("/discogs-data/.extraction_status_20260101.json"));
    }

    #[test]
    fn test_publishing_updates() {
        let mut marker = StateMarker::new("20260101".to_string());

        marker.update_publishing(100, 1);
        assert_eq!(marker.publishing_phase.messages_published, 100);

        marker.update_publishing(200, 2);
        assert_eq!(marker.publishing_phase.messages_published, 300);
        assert_eq!(marker.publishing_phase.batches_sent, 3);
    }

    #[test]
    fn test_complete_extraction() {
        let mut marker = StateMarker::new("20260101".to_string());

        marker.start_download(4);
        marker.complete_download();
        marker.start_processing(4);
        marker.complete_processing();
        marker.complete_extraction();

        assert_eq!(marker.summary.overall_status, PhaseStatus::Completed);
        assert_eq!(marker.publishing_phase.status, PhaseStatus::Completed);
        assert!(marker.summary.total_duration_seconds.is_some());
    }

    #[test]
    fn test_error_tracking() {
        let mut marker = StateMarker::new("20260101".to_string());

        marker.fail_download("download failed".to_string());
        assert_eq!(marker.summary.overall_status, PhaseStatus::Failed);

        marker = StateMarker::new("20260101".to_string());
        marker.fail_processing("processing failed".to_string());
        assert_eq!(marker.processing_phase.errors.len(), 1);

        marker = StateMarker::new("20260101".to_string());
        marker.fail_publishing("publishing failed".to_string());
        assert_eq!(marker.publishing_phase.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_serialization() {
        let mut marker = StateMarker::new("20260101".to_string());
        marker.start_download(4);
        marker.file_downloaded("discogs_20260101_artists.xml.gz", 1000);

        let json = serde_json::to_string_pretty(&marker).unwrap();
        let deserialized: StateMarker = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.current_version, "20260101");
        assert_eq!(deserialized.download_phase.files_downloaded, 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".extraction_status_20260101.json");

        let loaded = StateMarker::load(&path).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_warns_and_returns_none_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".extraction_status_20260101.json");
        fs::write(&path, b"{ not valid json").await.unwrap();

        let loaded = StateMarker::load(&path).await.expect("corrupt marker must not be a hard error");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".extraction_status_20260101.json");

        let mut marker = StateMarker::new("20260101".to_string());
        marker.start_download(1);
        marker.save(&path).await.unwrap();

        let loaded = StateMarker::load(&path).await.unwrap().expect("freshly saved marker must load back");
        assert_eq!(loaded.current_version, "20260101");
        assert_eq!(loaded.download_phase.status, PhaseStatus::InProgress);
    }
}
