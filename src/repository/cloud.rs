// src/repository/cloud.rs

//! Cloud-storage links
//!
//! A cloud link names a file by handle and carries its decryption key in the
//! URL fragment:
//!
//! - `https://mega.nz/file/<handle>#<key>`
//! - `https://mega.nz/#!<handle>!<key>` (legacy)
//!
//! The key is 32 bytes of url-safe base64. The first and second halves XOR
//! to the AES-128 key; bytes 16..24 are the CTR nonce. Resolving the handle
//! through the storage API yields a temporary download URL whose payload is
//! AES-128-CTR encrypted.

use super::{ProgressCallback, provider::stream_to_file};
use crate::error::{Error, Result};
use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Storage API endpoint used to resolve file handles
pub const API_URL: &str = "https://g.api.mega.co.nz/cs";

const LINK_HOSTS: [&str; 2] = ["mega.nz/", "mega.co.nz/"];

/// API error code for a file that no longer exists
const ENOENT: i64 = -9;

type Aes128Ctr = Ctr128BE<Aes128>;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Whether a URL points at cloud storage rather than a plain HTTPS mirror
pub fn is_cloud_link(url: &str) -> bool {
    LINK_HOSTS.iter().any(|host| url.contains(host))
}

/// A parsed cloud link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudLink {
    handle: String,
    key: [u8; 16],
    iv: [u8; 16],
}

impl CloudLink {
    /// Parse a link into its handle and derived AES key and nonce
    pub fn parse(url: &str) -> Result<Self> {
        let rest = LINK_HOSTS
            .iter()
            .find_map(|host| url.split_once(host).map(|(_, rest)| rest))
            .ok_or_else(|| Error::ParseError(format!("Not a cloud link: {}", url)))?;

        let split = if let Some(file) = rest.strip_prefix("file/") {
            file.split_once('#')
        } else if let Some(legacy) = rest.strip_prefix("#!") {
            legacy.split_once('!')
        } else {
            None
        };

        let (handle, key) = split
            .filter(|(handle, key)| !handle.is_empty() && !key.is_empty())
            .ok_or_else(|| Error::ParseError(format!("Cloud link lacks handle or key: {}", url)))?;

        // Folder links append a sub-path after the key
        let key = key.split(['/', '?']).next().unwrap_or(key);
        let raw = URL_SAFE_NO_PAD
            .decode(key.trim_end_matches('='))
            .map_err(|e| Error::ParseError(format!("Invalid cloud link key: {}", e)))?;

        if raw.len() != 32 {
            return Err(Error::ParseError(format!(
                "Cloud link key must be 32 bytes, got {}",
                raw.len()
            )));
        }

        let mut aes_key = [0u8; 16];
        for (i, byte) in aes_key.iter_mut().enumerate() {
            *byte = raw[i] ^ raw[i + 16];
        }

        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&raw[16..24]);

        Ok(Self {
            handle: handle.to_string(),
            key: aes_key,
            iv,
        })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Fresh keystream positioned at the start of the file
    fn cipher(&self) -> Aes128Ctr {
        Aes128Ctr::new(&self.key.into(), &self.iv.into())
    }
}

/// Download location and size reported by the storage API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResolvedFile {
    #[serde(rename = "s")]
    pub size: u64,
    #[serde(rename = "g")]
    pub download_url: String,
}

/// Ask the storage API for a temporary download URL
pub async fn resolve(
    client: &Client,
    api_url: &str,
    link: &CloudLink,
    timeout: Option<Duration>,
) -> Result<ResolvedFile> {
    let id = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let body = json!([{ "a": "g", "g": 1, "p": link.handle() }]);

    let mut request = client
        .post(format!("{}?id={}", api_url, id))
        .json(&body);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(Error::Network(format!(
            "HTTP {} from storage API",
            response.status()
        )));
    }

    let value: Value = response.json().await?;
    parse_resolve_response(link.handle(), value)
}

fn parse_resolve_response(handle: &str, value: Value) -> Result<ResolvedFile> {
    let item = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };

    if let Some(code) = item.as_i64() {
        return Err(if code == ENOENT {
            Error::NotFound(format!("cloud file {}", handle))
        } else {
            Error::Network(format!("Storage API error {} for {}", code, handle))
        });
    }

    serde_json::from_value(item)
        .map_err(|e| Error::Network(format!("Unexpected storage API response: {}", e)))
}

/// Download and decrypt a cloud-hosted file into `dest`
pub async fn fetch(
    client: &Client,
    api_url: &str,
    url: &str,
    dest: &Path,
    on_progress: ProgressCallback,
) -> Result<u64> {
    let link = CloudLink::parse(url)?;
    let resolved = resolve(client, api_url, &link, None).await?;
    info!(
        "Downloading cloud file {} ({} bytes)",
        link.handle(),
        resolved.size
    );

    let response = client.get(&resolved.download_url).send().await?;
    if !response.status().is_success() {
        return Err(Error::Network(format!(
            "HTTP {} downloading cloud file {}",
            response.status(),
            link.handle()
        )));
    }

    let mut cipher = link.cipher();
    let written = stream_to_file(
        response,
        dest,
        Some(resolved.size),
        on_progress,
        |chunk| cipher.apply_keystream(chunk),
    )
    .await?;

    debug!("Decrypted {} bytes from {}", written, link.handle());
    Ok(written)
}

/// Check that a cloud file still resolves, within `timeout`
pub async fn probe(client: &Client, api_url: &str, url: &str, timeout: Duration) -> bool {
    let Ok(link) = CloudLink::parse(url) else {
        return false;
    };
    match resolve(client, api_url, &link, Some(timeout)).await {
        Ok(_) => true,
        Err(e) => {
            debug!("Cloud probe for {} failed: {}", link.handle(), e);
            false
        }
    }
}
