//! Downloads one complete Discogs snapshot version, verifying every file against the
//! publisher's own SHA-256 manifest and skipping anything already present on disk with a
//! matching hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use urlencoding::encode;

use crate::state_marker::StateMarker;
use crate::types::{LocalFileInfo, RemoteFileInfo};

const METADATA_FILE: &str = ".discogs_metadata.json";
const DOWNLOAD_CHUNK_LOG_THRESHOLD: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("checksum manifest for version {version} could not be downloaded or parsed: {reason}")]
    ManifestUnavailable { version: String, reason: String },
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    Mismatch { filename: String, expected: String, actual: String },
    #[error("no checksum computed for {filename}")]
    Uncomputed { filename: String },
}

async fn load_metadata(output_directory: &Path) -> HashMap<String, LocalFileInfo> {
    let metadata_file = output_directory.join(METADATA_FILE);
    let Ok(contents) = fs::read_to_string(&metadata_file).await else {
        return HashMap::new();
    };

    match serde_json::from_str(&contents) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("⚠️ Failed to load metadata: {err}");
            HashMap::new()
        }
    }
}

async fn save_metadata(output_directory: &Path, metadata: &HashMap<String, LocalFileInfo>) {
    let metadata_file = output_directory.join(METADATA_FILE);
    match serde_json::to_string_pretty(metadata) {
        Ok(json) => {
            if let Err(err) = fs::write(&metadata_file, json).await {
                warn!("⚠️ Failed to save metadata: {err}");
            }
        }
        Err(err) => warn!("⚠️ Failed to serialize metadata: {err}"),
    }
}

async fn file_checksum(path: &Path) -> Result<String> {
    let bytes = fs::read(path).await.with_context(|| format!("failed to read {path:?} for checksum"))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

async fn validate_existing_file(path: &Path, expected_checksum: &str) -> bool {
    if !path.exists() {
        return false;
    }
    match file_checksum(path).await {
        Ok(actual) => actual == expected_checksum,
        Err(_) => false,
    }
}

/// Stream one file from the Discogs website proxy to disk, reporting bytes-downloaded via
/// `progress` as each chunk lands, and returning the SHA-256 of what was written.
async fn download_file(client: &reqwest::Client, s3_key: &str, output_path: &Path, mut progress: impl FnMut(u64)) -> Result<String> {
    let download_url = format!("https://data.discogs.com/?download={}", encode(s3_key));

    let response = client.get(&download_url).send().await.context("failed to start download")?.error_for_status().context("download request failed")?;

    let mut file = File::create(output_path).await.with_context(|| format!("failed to create {output_path:?}"))?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    let mut total: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error while streaming download body")?;
        hasher.update(&chunk);
        file.write_all(&chunk).await.context("failed to write downloaded chunk")?;
        total += chunk.len() as u64;
        progress(chunk.len() as u64);
    }

    file.flush().await.context("failed to flush downloaded file")?;
    if total > DOWNLOAD_CHUNK_LOG_THRESHOLD {
        info!("⬇️ Downloaded {} ({} bytes)", output_path.display(), total);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn parse_checksum_manifest(contents: &str) -> HashMap<String, String> {
    let mut checksums = HashMap::new();
    for line in contents.lines() {
        let parts: Vec<&str> = line.trim().splitn(2, ' ').collect();
        if parts.len() >= 2 {
            checksums.insert(parts[1].trim_start().to_string(), parts[0].to_string());
        }
    }
    checksums
}

/// Download (or validate already-downloaded) every data file for `version`, verifying each
/// against the manifest's SHA-256 and updating `state_marker` as it progresses. Returns the
/// plain filenames of the four data files now known-good on disk.
pub async fn download_version(
    client: &reqwest::Client,
    output_directory: &Path,
    version: &str,
    files: &[RemoteFileInfo],
    state_marker: &mut StateMarker,
    marker_path: &Path,
) -> Result<Vec<String>> {
    info!("📥 Starting download of Discogs version {version}");
    fs::create_dir_all(output_directory).await.context("failed to create output directory")?;

    let mut metadata = load_metadata(output_directory).await;
    info!("📋 Loaded metadata for {} previously downloaded files", metadata.len());

    let checksum_remote = files
        .iter()
        .find(|f| Path::new(&f.name).file_name().and_then(|n| n.to_str()).is_some_and(|n| n.contains("CHECKSUM")))
        .ok_or_else(|| {
            let err = ChecksumError::ManifestUnavailable { version: version.to_string(), reason: "no checksum entry in file listing".to_string() };
            anyhow::anyhow!(err)
        })?;

    let checksum_filename = Path::new(&checksum_remote.name).file_name().unwrap().to_string_lossy().to_string();
    let checksum_path = output_directory.join(&checksum_filename);

    info!("⬇️ Downloading checksum file: {checksum_filename}");
    if let Err(err) = download_file(client, &checksum_remote.name, &checksum_path, |_| {}).await {
        state_marker.fail_download(err.to_string());
        let _ = state_marker.save(marker_path).await;
        return Err(ChecksumError::ManifestUnavailable { version: version.to_string(), reason: err.to_string() }.into());
    }

    let checksum_contents = fs::read_to_string(&checksum_path).await.context("failed to read checksum manifest")?;
    let expected_checksums = parse_checksum_manifest(&checksum_contents);

    let data_files: Vec<&RemoteFileInfo> =
        files.iter().filter(|f| !Path::new(&f.name).file_name().and_then(|n| n.to_str()).unwrap_or_default().contains("CHECKSUM")).collect();

    let mut files_to_download: Vec<&RemoteFileInfo> = Vec::new();
    let mut checksums: HashMap<String, String> = HashMap::new();

    for remote in &data_files {
        let filename = Path::new(&remote.name).file_name().unwrap().to_string_lossy().to_string();
        let file_path = output_directory.join(&filename);
        let expected = expected_checksums.get(&filename);

        match expected {
            Some(expected) if validate_existing_file(&file_path, expected).await => {
                info!("✅ File {filename} already exists with correct checksum, skipping download");
                checksums.insert(filename.clone(), expected.clone());
                if let Ok(meta) = fs::metadata(&file_path).await {
                    state_marker.file_downloaded(&filename, meta.len());
                }
            }
            Some(_) => {
                if file_path.exists() {
                    info!("⚠️ File {filename} exists but checksum mismatch, will re-download");
                } else {
                    info!("📄 File {filename} does not exist, will download");
                }
                files_to_download.push(remote);
            }
            None => {
                warn!("⚠️ No expected checksum found for {filename}");
                files_to_download.push(remote);
            }
        }
    }

    state_marker.start_download(data_files.len());
    state_marker.save(marker_path).await.context("failed to persist state marker")?;

    for remote in &files_to_download {
        let filename = Path::new(&remote.name).file_name().unwrap().to_string_lossy().to_string();
        let file_path = output_directory.join(&filename);

        state_marker.start_file_download(&filename);

        let actual_checksum = match download_file(client, &remote.name, &file_path, |_| {}).await {
            Ok(checksum) => checksum,
            Err(err) => {
                error!("❌ Failed to download {}: {err}", remote.name);
                state_marker.fail_download(err.to_string());
                let _ = state_marker.save(marker_path).await;
                return Err(err);
            }
        };

        checksums.insert(filename.clone(), actual_checksum);

        if let Ok(meta) = fs::metadata(&file_path).await {
            state_marker.file_downloaded(&filename, meta.len());
            state_marker.save(marker_path).await.context("failed to persist state marker")?;
        }
    }

    for (filename, expected) in &expected_checksums {
        let Some(actual) = checksums.get(filename) else {
            let err = ChecksumError::Uncomputed { filename: filename.clone() };
            state_marker.fail_download(err.to_string());
            state_marker.save(marker_path).await.ok();
            return Err(err.into());
        };
        if actual != expected {
            error!("❌ Checksum mismatch for {filename}");
            let err = ChecksumError::Mismatch { filename: filename.clone(), expected: expected.clone(), actual: actual.clone() };
            state_marker.fail_download(err.to_string());
            state_marker.save(marker_path).await.ok();
            return Err(err.into());
        }
        info!("✅ Checksum verified for {filename}");
    }

    let mut new_metadata: HashMap<String, LocalFileInfo> = HashMap::new();
    for (filename, checksum) in &checksums {
        let file_path = output_directory.join(filename);
        if let Ok(meta) = fs::metadata(&file_path).await {
            new_metadata.insert(
                filename.clone(),
                LocalFileInfo { path: file_path.to_string_lossy().to_string(), checksum: checksum.clone(), version: version.to_string(), size: meta.len() },
            );
        }
    }
    if let Ok(checksum_hash) = file_checksum(&checksum_path).await {
        if let Ok(meta) = fs::metadata(&checksum_path).await {
            new_metadata.insert(
                checksum_filename.clone(),
                LocalFileInfo { path: checksum_path.to_string_lossy().to_string(), checksum: checksum_hash, version: version.to_string(), size: meta.len() },
            );
        }
    }

    metadata.extend(new_metadata);
    save_metadata(output_directory, &metadata).await;

    state_marker.complete_download();
    state_marker.save(marker_path).await.context("failed to persist state marker")?;

    info!("✅ Successfully validated version {version}");

    Ok(data_files.iter().map(|f| Path::new(&f.name).file_name().unwrap().to_string_lossy().to_string()).collect())
}

pub fn metadata_file_path(output_directory: &Path) -> PathBuf {
    output_directory.join(METADATA_FILE)
}
