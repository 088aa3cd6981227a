//! Discovers which Discogs monthly snapshot versions are currently published, by scraping the
//! public catalog listing at <https://data.discogs.com/> rather than talking to S3 directly
//! (the bucket denies anonymous `ListBucket`/`GetObject`, so the website's own index is the
//! only thing we're allowed to read).

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};
use urlencoding::decode;

use crate::types::RemoteFileInfo;

const CATALOG_ROOT: &str = "https://data.discogs.com/";
/// Only the most recent years are worth scraping; older ones can't hold a newer snapshot.
const YEARS_TO_SCAN: usize = 2;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to reach discogs catalog: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no year directories found in catalog listing")]
    NoYearsFound,
    #[error("no files found for any scraped year directory")]
    NoFilesFound,
}

/// Five filenames that make up one complete Discogs snapshot: the checksum manifest plus the
/// four data type exports.
pub fn required_filenames(version: &str) -> Vec<String> {
    let prefix = format!("discogs_{version}");
    vec![
        format!("{prefix}_CHECKSUM.txt"),
        format!("{prefix}_artists.xml.gz"),
        format!("{prefix}_labels.xml.gz"),
        format!("{prefix}_masters.xml.gz"),
        format!("{prefix}_releases.xml.gz"),
    ]
}

/// Scrape the catalog listing, returning every version seen mapped to the files found for it.
/// A version only appears here with whatever subset of files the scrape actually turned up;
/// callers must check against [`required_filenames`] before treating a version as complete.
pub async fn scrape_file_list(client: &reqwest::Client) -> Result<BTreeMap<String, Vec<RemoteFileInfo>>, CatalogError> {
    info!("🌐 Fetching file list from Discogs website...");

    let html = client.get(CATALOG_ROOT).send().await?.error_for_status()?.text().await?;

    let year_pattern = Regex::new(r#"href="\?prefix=data%2F(\d{4})%2F""#).expect("static regex is valid");
    let mut years: Vec<String> = year_pattern.captures_iter(&html).map(|c| c[1].to_string()).collect();
    years.sort_unstable_by(|a, b| b.cmp(a));
    years.dedup();

    if years.is_empty() {
        error!("❌ No year directories found on Discogs website");
        return Err(CatalogError::NoYearsFound);
    }

    info!("📅 Found {} year directories, checking recent years...", years.len());

    let file_pattern = Regex::new(r#"\?download=data%2F\d{4}%2F(discogs_(\d{8})_[^"]+)"#).expect("static regex is valid");
    let mut versions: BTreeMap<String, Vec<RemoteFileInfo>> = BTreeMap::new();

    for year in years.iter().take(YEARS_TO_SCAN) {
        let year_url = format!("{CATALOG_ROOT}?prefix=data%2F{year}%2F");
        let year_html = match client.get(&year_url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    warn!("⚠️ Failed to read year {year} directory body: {err}");
                    continue;
                }
            },
            Err(err) => {
                warn!("⚠️ Failed to fetch year {year} directory: {err}");
                continue;
            }
        };

        let mut found_in_year = 0usize;
        for captures in file_pattern.captures_iter(&year_html) {
            let encoded_filename = &captures[1];
            let version = captures[2].to_string();
            let filename = decode(encoded_filename).map(|s| s.into_owned()).unwrap_or_else(|_| encoded_filename.to_string());

            versions.entry(version).or_default().push(RemoteFileInfo { name: format!("data/{year}/{filename}"), size: 0 });
            found_in_year += 1;
        }

        if found_in_year > 0 {
            info!("📋 Found {found_in_year} files in year {year} directory");
        }
    }

    if versions.is_empty() {
        error!("❌ No files found on Discogs website");
        return Err(CatalogError::NoFilesFound);
    }

    info!("📊 Found {} unique versions from website", versions.len());
    Ok(versions)
}

/// The most recent version whose scraped file set contains every required entry, or `None`
/// if nothing complete was found.
pub async fn latest_complete_version(client: &reqwest::Client) -> Result<Option<String>, CatalogError> {
    let versions = scrape_file_list(client).await?;

    for (version, files) in versions.iter().rev() {
        if files.len() == required_filenames(version).len() {
            return Ok(Some(version.clone()));
        }
    }

    Ok(None)
}
