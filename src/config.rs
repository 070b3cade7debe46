// src/config.rs

//! Runtime configuration: directories, remote endpoints and timeouts
//!
//! User preferences that change at runtime (extra add-on paths, enabled
//! artworks, update channel) live in the database, not here.

use crate::version::AppVersion;
use std::path::PathBuf;
use std::time::Duration;

/// Remote catalog listing downloadable add-ons
pub const DEFAULT_CATALOG_URL: &str =
    "https://github.com/fancarpedia/FanCloisterZone/releases/download/v6.0.0-all/addons.json";

/// Published application releases
pub const DEFAULT_RELEASE_FEED_URL: &str =
    "https://api.github.com/repos/fancarpedia/FanCloisterZone/releases";

/// Deadline for a reachability probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect timeout for full transfers; transfers themselves have no deadline
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the packages root below the user data directory
pub const ADDONS_DIR: &str = "addons";

/// The mandatory builtin package and where to fetch it from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineSpec {
    pub id: String,
    /// Installed copies below this version are outdated
    pub version: u32,
    /// SHA-256 of the reference archive (hex)
    pub sha256: String,
    /// Mirrors, highest priority first
    pub urls: Vec<String>,
}

impl Default for BaselineSpec {
    fn default() -> Self {
        Self {
            id: "classic".to_string(),
            version: 6,
            sha256: "26b1fc8edc37c9df162b6b5a74164c6ba09951e450df7b62f2568c2db03327b0"
                .to_string(),
            urls: vec![
                "https://jcloisterzone.com/packages/classic/classic-6-5.9.0.jca".to_string(),
                "https://mega.nz/file/HVJnFQaa#MIMfsuyvFopCeyWZZTcotXQcMpycHqA5UzHE4Fa1RFU"
                    .to_string(),
            ],
        }
    }
}

/// Configuration shared by the add-on manager and the release selector
#[derive(Debug, Clone)]
pub struct Config {
    /// User-writable data directory; packages live in `<data_dir>/addons`
    pub data_dir: PathBuf,
    /// Bundled, read-only add-ons shipped with the application
    pub system_dir: Option<PathBuf>,
    pub db_path: PathBuf,
    pub app_version: AppVersion,
    pub catalog_url: String,
    pub release_feed_url: String,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub baseline: BaselineSpec,
}

impl Config {
    /// Configuration with default endpoints for the given data directory
    pub fn new(data_dir: PathBuf, app_version: AppVersion) -> Self {
        Self {
            db_path: data_dir.join("artpack.db"),
            data_dir,
            system_dir: None,
            app_version,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            release_feed_url: DEFAULT_RELEASE_FEED_URL.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            baseline: BaselineSpec::default(),
        }
    }

    /// Directory that holds user-installed packages
    pub fn packages_root(&self) -> PathBuf {
        self.data_dir.join(ADDONS_DIR)
    }
}
