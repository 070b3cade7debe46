// src/packages/manifest.rs

//! Add-on manifest parsing and validation
//!
//! Every package folder carries a `jcz-addon.json` describing its title,
//! integer version, the minimum application version it needs and the
//! artwork folders it provides. Each artwork folder in turn carries an
//! `artwork.json`. Folders written by older tooling may name the package
//! manifest `addon.json` instead.

use crate::error::{Error, Result};
use crate::version::AppVersion;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the package manifest inside a package folder
pub const MANIFEST_FILE: &str = "jcz-addon.json";

/// Manifest name accepted when [`MANIFEST_FILE`] is absent
pub const FALLBACK_MANIFEST_FILE: &str = "addon.json";

/// File name of the artwork manifest inside an artwork folder
pub const ARTWORK_MANIFEST_FILE: &str = "artwork.json";

/// Raw package manifest contents
///
/// `version` stays untyped so validation can tell a string from a
/// fractional number and report each precisely.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Value,
    #[serde(default, alias = "minimumJczVersion")]
    pub minimum_app_version: Option<String>,
    #[serde(default)]
    pub artworks: Vec<String>,
}

impl Manifest {
    /// Read the manifest from a package folder
    pub fn load(folder: &Path) -> Result<Self> {
        let primary = folder.join(MANIFEST_FILE);
        let fallback = folder.join(FALLBACK_MANIFEST_FILE);
        let path = if !primary.is_file() && fallback.is_file() {
            fallback
        } else {
            primary
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::InvalidManifest(format!("Cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::InvalidManifest(format!("Cannot parse {}: {}", path.display(), e))
        })
    }

    /// Validate the manifest against the running application
    ///
    /// Returns the package version on success. A too-old application yields
    /// [`Error::IncompatibleVersion`]; every other defect is
    /// [`Error::InvalidManifest`].
    pub fn validate(&self, app_version: &AppVersion) -> Result<u32> {
        let version = self.parse_version()?;

        let minimum = self
            .minimum_app_version
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| Error::InvalidManifest("Missing minimumAppVersion".to_string()))?;

        if !app_version.satisfies_minimum(minimum)? {
            return Err(Error::IncompatibleVersion {
                required: minimum.to_string(),
                running: app_version.to_string(),
            });
        }

        Ok(version)
    }

    /// The declared version, if it is a positive integer
    pub fn parse_version(&self) -> Result<u32> {
        match &self.version {
            Value::Number(n) => match n.as_u64() {
                Some(v) if v > 0 && v <= u32::MAX as u64 => Ok(v as u32),
                Some(v) => Err(Error::InvalidManifest(format!(
                    "Expecting positive integer as version, found {}",
                    v
                ))),
                None => Err(Error::InvalidManifest(format!(
                    "Expecting integer number as version, found {}",
                    n
                ))),
            },
            Value::Null => Err(Error::InvalidManifest("Missing version".to_string())),
            other => Err(Error::InvalidManifest(format!(
                "Expecting number as version, found {}",
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Artwork provided by a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    /// `<package-id>/<artwork-folder-name>`
    pub id: String,
    pub folder: PathBuf,
    pub title: Option<String>,
    /// Absolute path to the icon, when the artwork declares one
    pub icon: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ArtworkManifest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    icon: Option<String>,
}

/// An installed package as seen by the registry
///
/// Packages whose manifest fails validation are still listed with `error`
/// set so the reason can be shown to the user. They keep their declared
/// version when it is a positive integer, and 0 otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: String,
    pub title: String,
    pub folder: PathBuf,
    pub version: u32,
    pub minimum_app_version: Option<String>,
    pub removable: bool,
    pub hidden: bool,
    pub outdated: bool,
    pub error: Option<String>,
    pub artworks: Vec<Artwork>,
}

impl Package {
    /// Whether the package can be used by the application
    pub fn is_usable(&self) -> bool {
        self.error.is_none()
    }

    /// Ids of every artwork this package provides
    pub fn artwork_ids(&self) -> Vec<String> {
        self.artworks.iter().map(|a| a.id.clone()).collect()
    }
}

/// Read a candidate package folder
///
/// Returns `Ok(None)` when `folder` is not a directory or has no parseable
/// manifest. A parseable manifest that fails validation yields a package
/// with `error` set. `reference_version`, when given, marks the package
/// outdated if its own version is lower.
pub fn read_package(
    id: &str,
    folder: &Path,
    app_version: &AppVersion,
    reference_version: Option<u32>,
) -> Result<Option<Package>> {
    if !folder.is_dir() {
        return Ok(None);
    }

    let manifest = match Manifest::load(folder) {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!("Skipping {}: {}", folder.display(), e);
            return Ok(None);
        }
    };

    let mut package = Package {
        id: id.to_string(),
        title: manifest.title.clone().unwrap_or_else(|| id.to_string()),
        folder: folder.to_path_buf(),
        version: 0,
        minimum_app_version: manifest.minimum_app_version.clone(),
        removable: true,
        hidden: false,
        outdated: false,
        error: None,
        artworks: Vec::new(),
    };

    match manifest.validate(app_version) {
        Ok(version) => {
            package.version = version;
            if let Some(reference) = reference_version {
                if version < reference {
                    debug!(
                        "Add-on {} is outdated (current {}, required {})",
                        id, version, reference
                    );
                    package.outdated = true;
                }
            }
            package.artworks = load_artworks(id, folder, &manifest.artworks);
        }
        Err(e) => {
            package.version = manifest.parse_version().unwrap_or_default();
            package.error = Some(e.to_string());
        }
    }

    Ok(Some(package))
}

/// Enumerate the artworks listed in a manifest
///
/// Entries that are not directories or lack a readable `artwork.json`
/// are skipped.
pub fn load_artworks(package_id: &str, folder: &Path, rel_paths: &[String]) -> Vec<Artwork> {
    let mut artworks = Vec::new();

    for rel_path in rel_paths {
        let artwork_folder = folder.join(rel_path);
        if !artwork_folder.is_dir() {
            debug!("Artwork folder {} missing", artwork_folder.display());
            continue;
        }

        let manifest_path = artwork_folder.join(ARTWORK_MANIFEST_FILE);
        let manifest: ArtworkManifest = match fs::read_to_string(&manifest_path)
            .map_err(Error::from)
            .and_then(|content| serde_json::from_str(&content).map_err(Error::from))
        {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!("Skipping artwork {}: {}", artwork_folder.display(), e);
                continue;
            }
        };

        let name = artwork_folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_path.clone());

        artworks.push(Artwork {
            id: format!("{}/{}", package_id, name),
            icon: manifest.icon.map(|icon| artwork_folder.join(icon)),
            title: manifest.title,
            folder: artwork_folder,
        });
    }

    artworks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn app() -> AppVersion {
        AppVersion::new("6.1.0").unwrap()
    }

    fn manifest(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validate_accepts_integer_version() {
        let m = manifest(r#"{"title":"Castles","version":3,"minimumAppVersion":"6.0.0"}"#);
        assert_eq!(m.validate(&app()).unwrap(), 3);
    }

    #[test]
    fn test_validate_accepts_legacy_minimum_key() {
        let m = manifest(r#"{"version":1,"minimumJczVersion":"5.0.0"}"#);
        assert_eq!(m.validate(&app()).unwrap(), 1);
    }

    #[test]
    fn test_validate_rejects_string_version() {
        let m = manifest(r#"{"version":"3","minimumAppVersion":"6.0.0"}"#);
        let err = m.validate(&app()).unwrap_err();
        assert!(matches!(err, Error::InvalidManifest(ref msg) if msg.contains("string")));
    }

    #[test]
    fn test_validate_rejects_fractional_and_zero_versions() {
        let m = manifest(r#"{"version":1.5,"minimumAppVersion":"6.0.0"}"#);
        assert!(matches!(m.validate(&app()), Err(Error::InvalidManifest(_))));

        let m = manifest(r#"{"version":0,"minimumAppVersion":"6.0.0"}"#);
        assert!(matches!(m.validate(&app()), Err(Error::InvalidManifest(_))));

        let m = manifest(r#"{"version":-2,"minimumAppVersion":"6.0.0"}"#);
        assert!(matches!(m.validate(&app()), Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_validate_requires_minimum_version() {
        let m = manifest(r#"{"version":2}"#);
        assert!(matches!(m.validate(&app()), Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_validate_incompatible_app() {
        let m = manifest(r#"{"version":2,"minimumAppVersion":"7.0.0"}"#);
        assert!(matches!(
            m.validate(&app()),
            Err(Error::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_read_package_with_artworks() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("castles");
        fs::create_dir_all(folder.join("big")).unwrap();
        fs::create_dir_all(folder.join("plain")).unwrap();
        fs::write(
            folder.join(MANIFEST_FILE),
            r#"{"title":"Castles","version":2,"minimumAppVersion":"6.0.0","artworks":["big","plain","missing"]}"#,
        )
        .unwrap();
        fs::write(
            folder.join("big").join(ARTWORK_MANIFEST_FILE),
            r#"{"title":"Big tiles","icon":"icon.png"}"#,
        )
        .unwrap();

        let package = read_package("castles", &folder, &app(), None)
            .unwrap()
            .unwrap();
        assert_eq!(package.title, "Castles");
        assert_eq!(package.version, 2);
        assert!(package.is_usable());
        assert_eq!(package.artwork_ids(), vec!["castles/big".to_string()]);
        assert_eq!(
            package.artworks[0].icon,
            Some(folder.join("big").join("icon.png"))
        );
    }

    #[test]
    fn test_read_package_marks_error_and_outdated() {
        let temp = TempDir::new().unwrap();

        let broken = temp.path().join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(MANIFEST_FILE), r#"{"version":"x"}"#).unwrap();
        let package = read_package("broken", &broken, &app(), None)
            .unwrap()
            .unwrap();
        assert!(package.error.is_some());

        let old = temp.path().join("classic");
        fs::create_dir_all(&old).unwrap();
        fs::write(
            old.join(MANIFEST_FILE),
            r#"{"version":5,"minimumAppVersion":"5.0.0"}"#,
        )
        .unwrap();
        let package = read_package("classic", &old, &app(), Some(6))
            .unwrap()
            .unwrap();
        assert!(package.outdated);
        assert!(package.is_usable());
    }

    #[test]
    fn test_load_prefers_jcz_manifest_and_falls_back() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("castles");
        fs::create_dir_all(&folder).unwrap();

        fs::write(
            folder.join(FALLBACK_MANIFEST_FILE),
            r#"{"version":1,"minimumAppVersion":"6.0.0"}"#,
        )
        .unwrap();
        assert_eq!(Manifest::load(&folder).unwrap().validate(&app()).unwrap(), 1);

        fs::write(
            folder.join(MANIFEST_FILE),
            r#"{"version":4,"minimumJczVersion":"5.9.0"}"#,
        )
        .unwrap();
        assert_eq!(Manifest::load(&folder).unwrap().validate(&app()).unwrap(), 4);
    }

    #[test]
    fn test_incompatible_package_keeps_its_version() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("castles");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join(MANIFEST_FILE),
            r#"{"version":3,"minimumJczVersion":"9.0.0"}"#,
        )
        .unwrap();

        let package = read_package("castles", &folder, &app(), None)
            .unwrap()
            .unwrap();
        assert!(!package.is_usable());
        assert_eq!(package.version, 3);
    }

    #[test]
    fn test_read_package_ignores_non_packages() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("notes");
        fs::create_dir_all(&plain).unwrap();
        assert!(read_package("notes", &plain, &app(), None).unwrap().is_none());

        let file = temp.path().join("file.txt");
        fs::write(&file, "hello").unwrap();
        assert!(read_package("file.txt", &file, &app(), None).unwrap().is_none());
    }
}
