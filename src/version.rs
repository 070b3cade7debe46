// src/version.rs

//! Version primitives shared by the add-on resolver and the release selector
//!
//! Add-on bundles carry plain integer versions; the application itself uses
//! semantic versions whose pre-release tag (`-alpha`, `-beta`, `-rc`) decides
//! which compatibility bounds and update channels apply.

use crate::error::{Error, Result};
use semver::Version;
use std::fmt;

/// Parse a version string, tolerating a leading `v` and partial versions
///
/// Full semver is tried first so pre-release tags take part in ordering;
/// anything else falls back to [`coerce`].
pub fn parse(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if let Ok(version) = Version::parse(stripped) {
        return Ok(version);
    }

    coerce(stripped).ok_or_else(|| Error::ParseError(format!("Invalid version: {}", input)))
}

/// Extract the first `major[.minor[.patch]]` run from a string
///
/// Pre-release and build metadata are dropped, so `6.1.0-beta.2` coerces to
/// `6.1.0` and `v7` to `7.0.0`. Returns `None` when no digits are present.
pub fn coerce(input: &str) -> Option<Version> {
    let start = input.find(|c: char| c.is_ascii_digit())?;
    let mut parts = [0u64; 3];
    let mut index = 0;
    let mut digits = String::new();

    for c in input[start..].chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c == '.' && !digits.is_empty() && index < 2 {
            parts[index] = digits.parse().ok()?;
            digits.clear();
            index += 1;
        } else {
            break;
        }
    }

    if !digits.is_empty() {
        parts[index] = digits.parse().ok()?;
    }

    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Pre-release tier flags derived from a version or tag string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierFlags {
    pub prerelease: bool,
    pub alpha: bool,
    pub beta: bool,
    pub rc: bool,
}

impl TierFlags {
    /// Derive tier flags by substring match on a release tag
    ///
    /// Any `-` marks a pre-release; the specific tier comes from
    /// `-alpha`, `-beta` or `-rc`, compared case-insensitively.
    pub fn from_tag(tag: &str) -> Self {
        let lower = tag.to_ascii_lowercase();
        Self {
            prerelease: lower.contains('-'),
            alpha: lower.contains("-alpha"),
            beta: lower.contains("-beta"),
            rc: lower.contains("-rc"),
        }
    }

    /// True for a plain release without any pre-release tag
    pub fn is_stable(&self) -> bool {
        !self.prerelease
    }

    /// True when the tag names one of the development tiers
    pub fn is_development(&self) -> bool {
        self.alpha || self.beta || self.rc
    }
}

/// The running application's version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersion {
    raw: String,
    full: Version,
    coerced: Version,
    tiers: TierFlags,
}

impl AppVersion {
    /// Parse the application version string
    pub fn new(raw: &str) -> Result<Self> {
        let full = parse(raw)?;
        let coerced = Version::new(full.major, full.minor, full.patch);
        Ok(Self {
            raw: raw.to_string(),
            full,
            coerced,
            tiers: TierFlags::from_tag(raw),
        })
    }

    /// Version exactly as reported by the application
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Full semantic version, including any pre-release tag
    pub fn full(&self) -> &Version {
        &self.full
    }

    /// Version with pre-release information stripped
    pub fn coerced(&self) -> &Version {
        &self.coerced
    }

    /// Whether this is an alpha, beta or release-candidate build
    pub fn is_prerelease_build(&self) -> bool {
        self.tiers.is_development()
    }

    /// Check whether this version satisfies a manifest's minimum version
    pub fn satisfies_minimum(&self, minimum: &str) -> Result<bool> {
        let minimum = parse(minimum).map_err(|_| {
            Error::InvalidManifest(format!("Unparseable minimum app version: {}", minimum))
        })?;
        Ok(self.full >= minimum)
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
