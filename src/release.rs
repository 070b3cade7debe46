// src/release.rs

//! Application release channel selection
//!
//! Published releases are read from a JSON feed and the newest release the
//! user's channel allows is offered as an update. Each channel is a ladder
//! of tiers; the first tier holding anything newer than the running build
//! wins, even when a later tier holds a higher version.

use crate::db::models::Setting;
use crate::error::{Error, Result};
use crate::version::{TierFlags, parse};
use reqwest::Client;
use rusqlite::Connection;
use semver::Version;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings key holding the user's update channel
pub const CHANNEL_SETTING: &str = "update_channel";

/// Update channel chosen by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Channel {
    #[default]
    Stable,
    Beta,
    Dev,
}

impl Channel {
    /// Parse a channel name; anything unknown means stable
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "beta" => Channel::Beta,
            "dev" => Channel::Dev,
            "stable" => Channel::Stable,
            other => {
                debug!("Unknown update channel {:?}, using stable", other);
                Channel::Stable
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Dev => "dev",
        }
    }

    /// Channel stored in the settings table, stable when unset
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Setting::get(conn, CHANNEL_SETTING)?
            .map(|value| Channel::parse(&value))
            .unwrap_or_default())
    }

    pub fn store(&self, conn: &Connection) -> Result<()> {
        Setting::set(conn, CHANNEL_SETTING, self.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installer download links per platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformAssets {
    /// Windows installer (`.exe`)
    pub exe: Option<String>,
    /// macOS disk image (`.dmg`)
    pub dmg: Option<String>,
    /// Linux `.AppImage`
    pub app_image: Option<String>,
}

/// A published, non-draft release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCandidate {
    /// Tag exactly as published
    pub tag: String,
    pub version: Version,
    pub tiers: TierFlags,
    pub assets: PlatformAssets,
    /// Release notes, or the tag when the release has none
    pub notes: String,
}

impl ReleaseCandidate {
    /// Build a candidate from a tag, without assets
    pub fn from_tag(tag: &str) -> Result<Self> {
        Ok(Self {
            tag: tag.to_string(),
            version: parse(tag)?,
            tiers: TierFlags::from_tag(tag),
            assets: PlatformAssets::default(),
            notes: tag.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawRelease {
    #[serde(alias = "tag_name")]
    tag: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<RawAsset>,
    #[serde(default, alias = "body")]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    name: String,
    #[serde(default, rename = "downloadUrl", alias = "browser_download_url")]
    download_url: Option<String>,
}

fn find_asset(assets: &[RawAsset], suffix: &str) -> Option<String> {
    assets
        .iter()
        .find(|a| a.name.ends_with(suffix))
        .and_then(|a| a.download_url.clone())
}

/// Parse a release feed
///
/// Accepts both `{tag, assets: [{name, downloadUrl}], notes}` and the
/// GitHub API shape `{tag_name, assets: [{name, browser_download_url}],
/// body}`. Drafts and releases with unparseable tags are dropped.
pub fn parse_feed(content: &str) -> Result<Vec<ReleaseCandidate>> {
    let items: Vec<Value> = serde_json::from_str(content)
        .map_err(|e| Error::ParseError(format!("Failed to parse release feed: {}", e)))?;

    let mut candidates = Vec::new();
    for item in items {
        let raw: RawRelease = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping malformed release entry: {}", e);
                continue;
            }
        };
        if raw.draft {
            continue;
        }

        let version = match parse(&raw.tag) {
            Ok(version) => version,
            Err(e) => {
                debug!("Skipping release {}: {}", raw.tag, e);
                continue;
            }
        };

        candidates.push(ReleaseCandidate {
            version,
            tiers: TierFlags::from_tag(&raw.tag),
            assets: PlatformAssets {
                exe: find_asset(&raw.assets, ".exe"),
                dmg: find_asset(&raw.assets, ".dmg"),
                app_image: find_asset(&raw.assets, ".AppImage"),
            },
            notes: raw
                .notes
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| raw.tag.clone()),
            tag: raw.tag,
        });
    }

    Ok(candidates)
}

/// Pick the release to offer on `channel`
///
/// Ladders, first match wins:
/// - stable: stable, then rc/beta, then alpha
/// - beta: stable/rc/beta, then alpha
/// - dev: anything
pub fn select_release(
    channel: Channel,
    current: &Version,
    candidates: &[ReleaseCandidate],
) -> Option<ReleaseCandidate> {
    let mut sorted: Vec<&ReleaseCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| b.version.cmp(&a.version));

    let pick_newer = |predicate: &dyn Fn(&TierFlags) -> bool| {
        sorted
            .iter()
            .find(|c| predicate(&c.tiers) && c.version > *current)
            .map(|c| (*c).clone())
    };

    let stable = |t: &TierFlags| t.is_stable();
    let rc_or_beta = |t: &TierFlags| t.rc || t.beta;
    let alpha = |t: &TierFlags| t.alpha;

    match channel {
        Channel::Stable => pick_newer(&stable)
            .or_else(|| pick_newer(&rc_or_beta))
            .or_else(|| pick_newer(&alpha)),
        Channel::Beta => pick_newer(&|t: &TierFlags| stable(t) || rc_or_beta(t))
            .or_else(|| pick_newer(&alpha)),
        Channel::Dev => pick_newer(&|_: &TierFlags| true),
    }
}

/// Reads the published release feed
pub struct ReleaseFeedClient {
    client: Client,
    url: String,
}

impl ReleaseFeedClient {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Fetch and parse every published release
    pub async fn fetch(&self) -> Result<Vec<ReleaseCandidate>> {
        info!("Fetching release feed from {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body = response.text().await?;
        let candidates = parse_feed(&body)?;
        debug!("Release feed lists {} releases", candidates.len());
        Ok(candidates)
    }

    /// Newest release offered to `current` on `channel`
    pub async fn check(&self, channel: Channel, current: &str) -> Result<Option<ReleaseCandidate>> {
        let current = parse(current)?;
        let candidates = self.fetch().await?;
        let selected = select_release(channel, &current, &candidates);

        match &selected {
            Some(release) => info!("Update available on {} channel: {}", channel, release.tag),
            None => info!("No update available on {} channel", channel),
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn candidates(tags: &[&str]) -> Vec<ReleaseCandidate> {
        tags.iter()
            .map(|t| ReleaseCandidate::from_tag(t).unwrap())
            .collect()
    }

    fn selected(channel: Channel, current: &str, tags: &[&str]) -> Option<String> {
        let current = parse(current).unwrap();
        select_release(channel, &current, &candidates(tags)).map(|c| c.tag)
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!(Channel::parse("beta"), Channel::Beta);
        assert_eq!(Channel::parse(" DEV "), Channel::Dev);
        assert_eq!(Channel::parse("stable"), Channel::Stable);
        assert_eq!(Channel::parse("nightly"), Channel::Stable);
        assert_eq!(Channel::parse(""), Channel::Stable);
    }

    #[test]
    fn test_stable_falls_back_to_beta() {
        let tags = ["1.0.0", "1.1.0-beta", "1.2.0-alpha"];
        assert_eq!(
            selected(Channel::Stable, "1.0.0", &tags).as_deref(),
            Some("1.1.0-beta")
        );
        assert_eq!(
            selected(Channel::Beta, "1.0.0", &tags).as_deref(),
            Some("1.1.0-beta")
        );
        assert_eq!(
            selected(Channel::Dev, "1.0.0", &tags).as_deref(),
            Some("1.2.0-alpha")
        );
    }

    #[test]
    fn test_stable_prefers_stable_over_higher_prerelease() {
        let tags = ["v6.0.0", "v6.1.0", "v6.2.0-rc1", "v6.3.0-alpha"];
        assert_eq!(
            selected(Channel::Stable, "6.0.0", &tags).as_deref(),
            Some("v6.1.0")
        );
        assert_eq!(
            selected(Channel::Beta, "6.0.0", &tags).as_deref(),
            Some("v6.2.0-rc1")
        );
    }

    #[test]
    fn test_alpha_is_last_resort() {
        let tags = ["6.0.0", "6.1.0-alpha.1", "6.1.0-alpha.2"];
        assert_eq!(
            selected(Channel::Stable, "6.0.0", &tags).as_deref(),
            Some("6.1.0-alpha.2")
        );
    }

    #[test]
    fn test_nothing_newer() {
        let tags = ["5.0.0", "6.0.0-beta"];
        assert_eq!(selected(Channel::Dev, "6.0.0", &tags), None);
        assert_eq!(selected(Channel::Stable, "6.0.0", &tags), None);
    }

    #[test]
    fn test_parse_github_feed() {
        let feed = r#"[
            {"tag_name": "v6.1.0", "draft": false, "body": "Fixes",
             "assets": [
                {"name": "app-6.1.0.exe", "browser_download_url": "https://dl/app.exe"},
                {"name": "app-6.1.0.dmg", "browser_download_url": "https://dl/app.dmg"},
                {"name": "app-6.1.0.AppImage", "browser_download_url": "https://dl/app.AppImage"}
             ]},
            {"tag_name": "v6.2.0", "draft": true, "assets": []},
            {"tag_name": "nightly", "draft": false},
            {"name": "no tag at all"}
        ]"#;

        let releases = parse_feed(feed).unwrap();
        assert_eq!(releases.len(), 1);
        let release = &releases[0];
        assert_eq!(release.version, Version::new(6, 1, 0));
        assert_eq!(release.notes, "Fixes");
        assert_eq!(release.assets.exe.as_deref(), Some("https://dl/app.exe"));
        assert_eq!(release.assets.dmg.as_deref(), Some("https://dl/app.dmg"));
        assert_eq!(
            release.assets.app_image.as_deref(),
            Some("https://dl/app.AppImage")
        );
    }

    #[test]
    fn test_parse_plain_feed() {
        let feed = r#"[
            {"tag": "6.1.0-beta.2", "assets": [{"name": "x.exe", "downloadUrl": "https://dl/x.exe"}]}
        ]"#;

        let releases = parse_feed(feed).unwrap();
        assert_eq!(releases.len(), 1);
        assert!(releases[0].tiers.beta);
        assert_eq!(releases[0].notes, "6.1.0-beta.2");
        assert_eq!(releases[0].assets.exe.as_deref(), Some("https://dl/x.exe"));
        assert!(releases[0].assets.dmg.is_none());
    }

    #[test]
    fn test_channel_persists_in_settings() {
        let temp = TempDir::new().unwrap();
        let conn = db::open_or_init(&temp.path().join("artpack.db")).unwrap();

        assert_eq!(Channel::load(&conn).unwrap(), Channel::Stable);
        Channel::Beta.store(&conn).unwrap();
        assert_eq!(Channel::load(&conn).unwrap(), Channel::Beta);
    }
}
