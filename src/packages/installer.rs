// src/packages/installer.rs

//! Package installation and removal
//!
//! Installation is all-or-nothing: the archive is extracted into a hidden
//! staging directory inside the packages root, validated there, and only
//! then renamed into place. Staging directories are removed on every path.

use super::manifest::{Manifest, Package, load_artworks};
use super::registry::Registry;
use crate::error::{Error, Result};
use crate::version::AppVersion;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

/// Prefix of staging directories inside the packages root
pub const STAGING_PREFIX: &str = ".install-";

/// Extracted archive waiting to be activated
#[derive(Debug)]
pub struct StagedPackage {
    // Dropping the TempDir removes whatever is left of the staging area
    staging: TempDir,
    id: String,
}

impl StagedPackage {
    /// Package id, taken from the archive's single root directory
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Extracted package folder inside the staging area
    pub fn path(&self) -> PathBuf {
        self.staging.path().join(&self.id)
    }

    /// Move the staged folder to `<packages_root>/<id>`
    ///
    /// The rename stays on one filesystem because staging lives inside the
    /// packages root.
    pub fn activate(self, packages_root: &Path) -> Result<PathBuf> {
        let target = packages_root.join(&self.id);
        fs::rename(self.path(), &target)?;
        debug!("Activated {} at {}", self.id, target.display());
        Ok(target)
    }
}

/// Extract a zip archive and check it has exactly one root directory
///
/// Blocking; callers on the async runtime use [`Installer::stage`].
pub fn stage_archive(archive: &Path, packages_root: &Path) -> Result<StagedPackage> {
    fs::create_dir_all(packages_root)?;

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(packages_root)?;

    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    zip.extract(staging.path())?;

    let entries = fs::read_dir(staging.path())?.collect::<std::result::Result<Vec<_>, _>>()?;
    if entries.len() != 1 {
        return Err(Error::MalformedArchive(format!(
            "expected exactly one top-level directory, found {} entries",
            entries.len()
        )));
    }

    let root = &entries[0];
    if !root.file_type()?.is_dir() {
        return Err(Error::MalformedArchive(
            "top-level entry is not a directory".to_string(),
        ));
    }

    let id = root
        .file_name()
        .into_string()
        .map_err(|name| Error::MalformedArchive(format!("non UTF-8 root name {:?}", name)))?;

    Ok(StagedPackage { staging, id })
}

/// Installs and removes packages in the user-writable packages root
#[derive(Debug, Clone)]
pub struct Installer {
    packages_root: PathBuf,
    app_version: AppVersion,
}

impl Installer {
    pub fn new(packages_root: PathBuf, app_version: AppVersion) -> Self {
        Self {
            packages_root,
            app_version,
        }
    }

    pub fn packages_root(&self) -> &Path {
        &self.packages_root
    }

    /// Extract an archive into a staging directory on a blocking thread
    pub async fn stage(&self, archive: &Path) -> Result<StagedPackage> {
        let archive = archive.to_path_buf();
        let packages_root = self.packages_root.clone();
        tokio::task::spawn_blocking(move || stage_archive(&archive, &packages_root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Validate a staged package's manifest against the running application
    ///
    /// Returns the manifest together with its validated version.
    pub fn validate(&self, staged: &StagedPackage) -> Result<(Manifest, u32)> {
        let manifest = Manifest::load(&staged.path())?;
        let version = manifest.validate(&self.app_version)?;
        Ok((manifest, version))
    }

    /// Move a validated package into the packages root
    pub fn activate(
        &self,
        staged: StagedPackage,
        manifest: &Manifest,
        version: u32,
    ) -> Result<Package> {
        let id = staged.id().to_string();
        let folder = staged.activate(&self.packages_root)?;

        Ok(Package {
            title: manifest.title.clone().unwrap_or_else(|| id.clone()),
            artworks: load_artworks(&id, &folder, &manifest.artworks),
            folder,
            version,
            minimum_app_version: manifest.minimum_app_version.clone(),
            removable: true,
            hidden: false,
            outdated: false,
            error: None,
            id,
        })
    }

    /// Install a package archive
    ///
    /// Fails with [`Error::MalformedArchive`], [`Error::InvalidManifest`],
    /// [`Error::IncompatibleVersion`] or [`Error::AlreadyInstalled`] before
    /// the packages root is touched. Upgrades must uninstall first.
    pub async fn install(&self, archive: &Path, registry: &Registry) -> Result<Package> {
        info!("Installing add-on from {}", archive.display());

        let staged = self.stage(archive).await?;
        let (manifest, version) = self.validate(&staged)?;

        let id = staged.id();
        if registry.contains(id) || self.packages_root.join(id).exists() {
            return Err(Error::AlreadyInstalled(id.to_string()));
        }

        let package = self.activate(staged, &manifest, version)?;
        info!("Installed add-on {} v{}", package.id, package.version);
        Ok(package)
    }

    /// Remove a package folder
    ///
    /// Returns the artwork ids the caller must drop from any enabled lists.
    pub fn uninstall(&self, package: &Package) -> Result<Vec<String>> {
        if !package.removable {
            return Err(Error::NotRemovable(package.id.clone()));
        }

        info!("Removing add-on {} from {}", package.id, package.folder.display());
        fs::remove_dir_all(&package.folder)?;

        Ok(package.artwork_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::manifest::{ARTWORK_MANIFEST_FILE, MANIFEST_FILE};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn manifest_json(version: u32, minimum: &str) -> String {
        format!(
            r#"{{"title":"Castles","version":{},"minimumAppVersion":"{}","artworks":["art"]}}"#,
            version, minimum
        )
    }

    fn setup() -> (TempDir, PathBuf, Installer) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("addons");
        fs::create_dir_all(&root).unwrap();
        let installer = Installer::new(root.clone(), AppVersion::new("6.1.0").unwrap());
        (temp, root, installer)
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_install_activates_package() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("castles.zip");
        let manifest = manifest_json(2, "6.0.0");
        write_zip(
            &archive,
            &[
                ("castles/jcz-addon.json", manifest.as_str()),
                ("castles/art/artwork.json", r#"{"title":"Art"}"#),
            ],
        );

        let package = installer.install(&archive, &Registry::default()).await.unwrap();

        assert_eq!(package.id, "castles");
        assert_eq!(package.version, 2);
        assert_eq!(package.artwork_ids(), vec!["castles/art".to_string()]);
        assert!(root.join("castles").join(MANIFEST_FILE).exists());
        assert!(root.join("castles/art").join(ARTWORK_MANIFEST_FILE).exists());
        assert_eq!(listing(&root), vec!["castles".to_string()]);
    }

    #[tokio::test]
    async fn test_install_reads_legacy_minimum_key() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("classic.jca");
        write_zip(
            &archive,
            &[(
                "classic/jcz-addon.json",
                r#"{"title":"Classic","version":6,"minimumJczVersion":"5.9.0"}"#,
            )],
        );

        let package = installer.install(&archive, &Registry::default()).await.unwrap();

        assert_eq!(package.id, "classic");
        assert_eq!(package.version, 6);
        assert_eq!(package.minimum_app_version.as_deref(), Some("5.9.0"));
        assert_eq!(listing(&root), vec!["classic".to_string()]);
    }

    #[tokio::test]
    async fn test_install_rejects_multiple_roots() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("bad.zip");
        let manifest = manifest_json(1, "6.0.0");
        write_zip(
            &archive,
            &[
                ("castles/jcz-addon.json", manifest.as_str()),
                ("extra/readme.txt", "hi"),
            ],
        );

        let result = installer.install(&archive, &Registry::default()).await;
        assert!(matches!(result, Err(Error::MalformedArchive(_))));
        assert!(listing(&root).is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_file_root() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("flat.zip");
        write_zip(&archive, &[("jcz-addon.json", "{}")]);

        let result = installer.install(&archive, &Registry::default()).await;
        assert!(matches!(result, Err(Error::MalformedArchive(_))));
        assert!(listing(&root).is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_incompatible_app() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("future.zip");
        let manifest = manifest_json(1, "9.0.0");
        write_zip(&archive, &[("castles/jcz-addon.json", manifest.as_str())]);

        let result = installer.install(&archive, &Registry::default()).await;
        assert!(matches!(result, Err(Error::IncompatibleVersion { .. })));
        assert!(listing(&root).is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_missing_manifest() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("empty.zip");
        write_zip(&archive, &[("castles/readme.txt", "nothing here")]);

        let result = installer.install(&archive, &Registry::default()).await;
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
        assert!(listing(&root).is_empty());
    }

    #[tokio::test]
    async fn test_install_twice_is_already_installed() {
        let (temp, root, installer) = setup();
        let archive = temp.path().join("castles.zip");
        let manifest = manifest_json(1, "6.0.0");
        write_zip(&archive, &[("castles/jcz-addon.json", manifest.as_str())]);

        installer.install(&archive, &Registry::default()).await.unwrap();
        let result = installer.install(&archive, &Registry::default()).await;

        assert!(matches!(result, Err(Error::AlreadyInstalled(ref id)) if id == "castles"));
        assert_eq!(listing(&root), vec!["castles".to_string()]);
    }

    #[tokio::test]
    async fn test_install_then_uninstall_restores_root() {
        let (temp, root, installer) = setup();
        fs::create_dir_all(root.join("abbey")).unwrap();
        let before = listing(&root);

        let archive = temp.path().join("castles.zip");
        let manifest = manifest_json(1, "6.0.0");
        write_zip(
            &archive,
            &[
                ("castles/jcz-addon.json", manifest.as_str()),
                ("castles/art/artwork.json", "{}"),
            ],
        );

        let package = installer.install(&archive, &Registry::default()).await.unwrap();
        let dropped = installer.uninstall(&package).unwrap();

        assert_eq!(dropped, vec!["castles/art".to_string()]);
        assert_eq!(listing(&root), before);
    }

    #[test]
    fn test_uninstall_refuses_non_removable() {
        let (_temp, root, installer) = setup();
        let folder = root.join("classic");
        fs::create_dir_all(&folder).unwrap();

        let package = Package {
            id: "classic".to_string(),
            title: "Classic".to_string(),
            folder: folder.clone(),
            version: 6,
            minimum_app_version: Some("5.0.0".to_string()),
            removable: false,
            hidden: false,
            outdated: false,
            error: None,
            artworks: Vec::new(),
        };

        assert!(matches!(
            installer.uninstall(&package),
            Err(Error::NotRemovable(_))
        ));
        assert!(folder.exists());
    }
}
