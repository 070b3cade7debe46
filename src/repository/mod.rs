// src/repository/mod.rs

//! Remote catalog and package downloading
//!
//! This module provides functionality for:
//! - Fetching and parsing the remote add-on catalog
//! - Downloading package archives over HTTPS or cloud-storage links
//! - Probing mirror reachability with a short deadline
//! - Verifying archive checksums

pub mod checksum;
pub mod cloud;
pub mod provider;

pub use checksum::{sha256_file, verify_artifact};
pub use provider::{Provider, ProviderDownloader};

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// Progress callback for download operations: `(bytes_received, total_bytes)`
///
/// `bytes_received` never decreases between calls.
pub type ProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// One downloadable version of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersion {
    pub version: u32,
    pub provider: Provider,
    pub url: String,
    /// Expected SHA-256 of the archive (hex)
    pub digest: Option<String>,
    /// Inclusive lower bound on the application version (stable builds)
    pub from_version: Option<String>,
    /// Exclusive upper bound on the application version (stable builds)
    pub to_version: Option<String>,
    /// Inclusive lower bound for pre-release builds
    pub dev_from_version: Option<String>,
    /// Exclusive upper bound for pre-release builds
    pub dev_to_version: Option<String>,
}

impl PackageVersion {
    /// Version entry with no compatibility bounds
    pub fn new(version: u32, provider: Provider, url: &str) -> Self {
        Self {
            version,
            provider,
            url: url.to_string(),
            digest: None,
            from_version: None,
            to_version: None,
            dev_from_version: None,
            dev_to_version: None,
        }
    }
}

/// A package listed in the remote catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: String,
    pub versions: Vec<PackageVersion>,
}

impl CatalogEntry {
    /// Find a specific version of this package
    pub fn version(&self, version: u32) -> Option<&PackageVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    addons: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    key: String,
    #[serde(default)]
    versions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersion {
    version: Value,
    provider: Provider,
    url: String,
    #[serde(default, alias = "sha256")]
    digest: Option<String>,
    #[serde(default)]
    from_version: Option<String>,
    #[serde(default)]
    to_version: Option<String>,
    #[serde(default)]
    dev_from_version: Option<String>,
    #[serde(default)]
    dev_to_version: Option<String>,
}

impl RawVersion {
    fn into_version(self) -> Option<PackageVersion> {
        let version = self
            .version
            .as_u64()
            .filter(|v| *v > 0 && *v <= u32::MAX as u64)? as u32;

        Some(PackageVersion {
            version,
            provider: self.provider,
            url: self.url,
            digest: self.digest.filter(|d| !d.trim().is_empty()),
            from_version: self.from_version,
            to_version: self.to_version,
            dev_from_version: self.dev_from_version,
            dev_to_version: self.dev_to_version,
        })
    }
}

/// Parse catalog JSON
///
/// Malformed version entries (non-numeric version, unknown provider,
/// missing url) are dropped with a warning; only an unparseable document is
/// an error.
pub fn parse_catalog(content: &str) -> Result<Vec<CatalogEntry>> {
    let raw: RawCatalog = serde_json::from_str(content)
        .map_err(|e| Error::ParseError(format!("Failed to parse catalog JSON: {}", e)))?;

    let entries = raw
        .addons
        .into_iter()
        .map(|entry| {
            let versions = entry
                .versions
                .into_iter()
                .filter_map(|value| {
                    let parsed = serde_json::from_value::<RawVersion>(value.clone())
                        .ok()
                        .and_then(RawVersion::into_version);
                    if parsed.is_none() {
                        warn!("Dropping malformed catalog version for {}: {}", entry.key, value);
                    }
                    parsed
                })
                .collect();
            CatalogEntry {
                key: entry.key,
                versions,
            }
        })
        .collect();

    Ok(entries)
}

/// Network access needed by the add-on manager
///
/// [`ProviderDownloader`] is the production implementation; tests drive
/// the manager with an in-process double.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch and parse the remote catalog
    async fn fetch_catalog(&self, url: &str) -> Result<Vec<CatalogEntry>>;

    /// Stream `url` into `dest`
    ///
    /// On failure `dest` does not exist afterwards. Returns the number of
    /// bytes written.
    async fn fetch(
        &self,
        provider: Provider,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<u64>;

    /// Short, time-bounded reachability check
    async fn probe(&self, url: &str) -> bool;
}

/// Remove a partially written download, ignoring a file that never appeared
pub(crate) async fn discard_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => debug!("Removed partial download {}", dest.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", dest.display(), e),
    }
}
