// src/repository/provider.rs

//! Download providers
//!
//! Archives are fetched either from plain HTTPS mirrors or from encrypted
//! cloud-storage links. Both stream straight to disk, report throttled
//! progress and leave no partial file behind on failure.

use super::{CatalogEntry, ProgressCallback, RemoteSource, cloud, discard_partial, parse_catalog};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Report progress at least every this many bytes
const PROGRESS_BYTES: u64 = 64 * 1024;

/// ...or when this much time has passed since the last report
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum attempts for catalog fetches
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// How a package archive is transported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Plain HTTPS GET
    #[serde(rename = "https", alias = "http")]
    Https,
    /// Encrypted cloud-storage link
    #[serde(rename = "cloud", alias = "mega")]
    CloudLink,
}

impl Provider {
    /// Pick the provider for a bare URL
    pub fn classify(url: &str) -> Self {
        if cloud::is_cloud_link(url) {
            Provider::CloudLink
        } else {
            Provider::Https
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Https => "https",
            Provider::CloudLink => "cloud",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "https" | "http" => Ok(Provider::Https),
            "cloud" | "mega" => Ok(Provider::CloudLink),
            _ => Err(Error::ParseError(format!("Unknown provider: {}", s))),
        }
    }
}

/// Rate-limits a progress callback while keeping reports monotonic
pub(crate) struct ProgressThrottle {
    callback: ProgressCallback,
    total: Option<u64>,
    received: u64,
    reported: Option<u64>,
    last_report: Instant,
}

impl ProgressThrottle {
    pub(crate) fn new(callback: ProgressCallback, total: Option<u64>) -> Self {
        Self {
            callback,
            total,
            received: 0,
            reported: None,
            last_report: Instant::now(),
        }
    }

    pub(crate) fn received(&self) -> u64 {
        self.received
    }

    pub(crate) fn advance(&mut self, bytes: usize) {
        self.received += bytes as u64;
        let since = self.received - self.reported.unwrap_or(0);
        if since >= PROGRESS_BYTES || self.last_report.elapsed() >= PROGRESS_INTERVAL {
            self.report();
        }
    }

    /// Emit the final count unless it was just reported
    pub(crate) fn finish(&mut self) -> u64 {
        if self.reported != Some(self.received) {
            self.report();
        }
        self.received
    }

    fn report(&mut self) {
        (self.callback)(self.received, self.total);
        self.reported = Some(self.received);
        self.last_report = Instant::now();
    }
}

/// Stream a response body to `dest`, passing each chunk through `transform`
///
/// `expected` overrides the response's Content-Length when the real size is
/// known out of band. Fewer bytes than expected is a [`Error::Network`].
/// Cleanup of `dest` on failure is the caller's job.
pub(crate) async fn stream_to_file<F>(
    mut response: Response,
    dest: &Path,
    expected: Option<u64>,
    on_progress: ProgressCallback,
    mut transform: F,
) -> Result<u64>
where
    F: FnMut(&mut [u8]),
{
    let total = expected.or_else(|| response.content_length());
    let mut progress = ProgressThrottle::new(on_progress, total);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;

    while let Some(chunk) = response.chunk().await? {
        let mut buf = chunk.to_vec();
        transform(&mut buf);
        file.write_all(&buf).await?;
        progress.advance(buf.len());
    }
    file.flush().await?;

    if let Some(total) = total {
        if progress.received() < total {
            return Err(Error::Network(format!(
                "Transfer truncated: received {} of {} bytes",
                progress.received(),
                total
            )));
        }
    }

    Ok(progress.finish())
}

/// Production [`RemoteSource`] backed by a shared HTTP client
pub struct ProviderDownloader {
    client: Client,
    probe_timeout: Duration,
    cloud_api: String,
    max_retries: u32,
}

impl ProviderDownloader {
    /// Create a downloader
    ///
    /// Only connecting is time-bounded; archive transfers may take as long
    /// as they need.
    pub fn new(connect_timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            probe_timeout,
            cloud_api: cloud::API_URL.to_string(),
            max_retries: MAX_RETRIES,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.connect_timeout, config.probe_timeout)
    }

    /// Use a different storage API endpoint for cloud links
    pub fn with_cloud_api(mut self, url: &str) -> Self {
        self.cloud_api = url.to_string();
        self
    }

    async fn fetch_https(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<u64> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        stream_to_file(response, dest, None, on_progress, |_| {}).await
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response.text().await?)
    }

    async fn probe_https(&self, url: &str) -> bool {
        match self
            .client
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!("Probe {} -> {}", url, response.status());
                response.status().is_success()
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl RemoteSource for ProviderDownloader {
    async fn fetch_catalog(&self, url: &str) -> Result<Vec<CatalogEntry>> {
        info!("Fetching add-on catalog from {}", url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_text(url).await {
                Ok(body) => {
                    let catalog = parse_catalog(&body)?;
                    info!("Catalog lists {} add-ons", catalog.len());
                    return Ok(catalog);
                }
                Err(e) if attempt >= self.max_retries => {
                    return Err(Error::Network(format!(
                        "Failed to fetch catalog after {} attempts: {}",
                        attempt, e
                    )));
                }
                Err(e) => {
                    warn!("Catalog fetch attempt {} failed: {}, retrying...", attempt, e);
                    let delay = Duration::from_millis(RETRY_DELAY_MS * attempt as u64);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn fetch(
        &self,
        provider: Provider,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<u64> {
        info!("Downloading {} via {} to {}", url, provider, dest.display());

        let result = match provider {
            Provider::Https => self.fetch_https(url, dest, on_progress).await,
            Provider::CloudLink => {
                cloud::fetch(&self.client, &self.cloud_api, url, dest, on_progress).await
            }
        };

        match result {
            Ok(bytes) => {
                debug!("Downloaded {} bytes to {}", bytes, dest.display());
                Ok(bytes)
            }
            Err(e) => {
                discard_partial(dest).await;
                Err(e)
            }
        }
    }

    async fn probe(&self, url: &str) -> bool {
        match Provider::classify(url) {
            Provider::Https => self.probe_https(url).await,
            Provider::CloudLink => {
                cloud::probe(&self.client, &self.cloud_api, url, self.probe_timeout).await
            }
        }
    }
}
