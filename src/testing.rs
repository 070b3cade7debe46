// src/testing.rs

//! Shared fixtures for unit tests

use crate::error::{Error, Result};
use crate::repository::{CatalogEntry, PackageVersion, ProgressCallback, Provider, RemoteSource};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zip::write::SimpleFileOptions;

/// Write a package archive with a valid manifest and one artwork per name
pub fn write_package_zip(path: &Path, id: &str, version: u32, artworks: &[&str]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let list: Vec<String> = artworks.iter().map(|a| format!("\"{}\"", a)).collect();
    zip.start_file(format!("{}/jcz-addon.json", id), SimpleFileOptions::default()).unwrap();
    write!(
        zip,
        r#"{{"title":"{} add-on","version":{},"minimumJczVersion":"6.0.0","artworks":[{}]}}"#,
        id,
        version,
        list.join(",")
    )
    .unwrap();

    for artwork in artworks {
        zip.start_file(
            format!("{}/{}/artwork.json", id, artwork),
            SimpleFileOptions::default(),
        )
        .unwrap();
        write!(zip, r#"{{"title":"{}"}}"#, artwork).unwrap();
    }
    zip.finish().unwrap();
}

/// In-process [`RemoteSource`] serving local files by URL
#[derive(Default)]
pub struct MockSource {
    files: HashMap<String, PathBuf>,
    reachable: HashSet<String>,
    catalog: Vec<CatalogEntry>,
    pub fetched: Mutex<Vec<String>>,
    pub probed: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `file` at `url` and answer probes for it
    pub fn serve(mut self, url: &str, file: &Path) -> Self {
        self.files.insert(url.to_string(), file.to_path_buf());
        self.reachable.insert(url.to_string());
        self
    }

    /// Answer probes for `url` without serving anything
    pub fn reachable(mut self, url: &str) -> Self {
        self.reachable.insert(url.to_string());
        self
    }

    /// Add a catalog version for `key`
    pub fn list(mut self, key: &str, version: u32, url: &str, digest: Option<&str>) -> Self {
        let mut entry_version = PackageVersion::new(version, Provider::Https, url);
        entry_version.digest = digest.map(String::from);

        match self.catalog.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.versions.push(entry_version),
            None => self.catalog.push(CatalogEntry {
                key: key.to_string(),
                versions: vec![entry_version],
            }),
        }
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    async fn fetch_catalog(&self, _url: &str) -> Result<Vec<CatalogEntry>> {
        Ok(self.catalog.clone())
    }

    async fn fetch(
        &self,
        _provider: Provider,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<u64> {
        self.fetched.lock().unwrap().push(url.to_string());
        let source = self
            .files
            .get(url)
            .ok_or_else(|| Error::Network(format!("HTTP 404 Not Found from {}", url)))?;

        let bytes = tokio::fs::copy(source, dest).await?;
        on_progress(bytes / 2, Some(bytes));
        on_progress(bytes, Some(bytes));
        Ok(bytes)
    }

    async fn probe(&self, url: &str) -> bool {
        self.probed.lock().unwrap().push(url.to_string());
        self.reachable.contains(url)
    }
}
