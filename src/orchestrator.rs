// src/orchestrator.rs

//! Add-on manager
//!
//! Ties the scanner, installer, downloader and database together. Every
//! mutation of the packages root is recorded as a changeset and followed by
//! a full rescan, so the in-memory registry always mirrors the disk.

use crate::baseline;
use crate::config::Config;
use crate::db::{
    self,
    models::{Changeset, ChangesetAction, ChangesetStatus, EnabledArtwork, UserAddonPath},
};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink, progress_callback};
use crate::packages::{Installer, Package, Registry, Scanner};
use crate::release::{Channel, ReleaseCandidate, ReleaseFeedClient};
use crate::repository::{CatalogEntry, RemoteSource, verify_artifact};
use crate::resolver::{filter_catalog, latest_compatible};
use rusqlite::{Connection, Transaction};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of temporary download directories inside the packages root
const DOWNLOAD_PREFIX: &str = ".download-";

/// Outcome of an update-all run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Ids updated successfully, in processing order
    pub updated: Vec<String>,
    /// Ids that failed, with the cause
    pub failed: Vec<(String, String)>,
}

impl UpdateReport {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.failed.is_empty()
    }
}

/// Manages installed add-ons for one application instance
pub struct AddonManager {
    config: Config,
    conn: Connection,
    installer: Installer,
    source: Arc<dyn RemoteSource>,
    events: Arc<dyn EventSink>,
    registry: Registry,
    catalog: Option<Vec<CatalogEntry>>,
}

impl AddonManager {
    /// Open the database and prepare the packages root
    ///
    /// The registry starts empty; call [`AddonManager::load`] or
    /// [`AddonManager::reload`] to scan.
    pub fn open(
        config: Config,
        source: Arc<dyn RemoteSource>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let conn = db::open_or_init(&config.db_path)?;
        fs::create_dir_all(config.packages_root())?;
        let installer = Installer::new(config.packages_root(), config.app_version.clone());

        Ok(Self {
            config,
            conn,
            installer,
            source,
            events,
            registry: Registry::default(),
            catalog: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Filtered catalog from the last successful fetch, if any
    pub fn catalog(&self) -> Option<&[CatalogEntry]> {
        self.catalog.as_deref()
    }

    fn scanner(&self) -> Result<Scanner> {
        let user_paths = UserAddonPath::list_all(&self.conn)?
            .into_iter()
            .map(PathBuf::from)
            .collect();

        Ok(Scanner::new(
            self.config.packages_root(),
            self.config.app_version.clone(),
            &self.config.baseline,
        )
        .with_user_paths(user_paths)
        .with_system_dir(self.config.system_dir.clone()))
    }

    /// Rescan every root and replace the registry
    pub fn reload(&mut self) -> Result<&Registry> {
        self.registry = self.scanner()?.scan();
        debug!("Registry holds {} add-ons", self.registry.len());
        Ok(&self.registry)
    }

    /// Scan, resync the baseline when needed, and scan again
    ///
    /// A failed resync is logged and recorded; the registry is still
    /// usable without a current baseline.
    pub async fn load(&mut self) -> Result<&Registry> {
        self.reload()?;

        if baseline::needs_resync(&self.registry, &self.config.baseline) {
            let result = baseline::resync(
                &self.config.baseline,
                &self.registry,
                &self.installer,
                self.source.as_ref(),
                Arc::clone(&self.events),
            )
            .await;

            let id = self.config.baseline.id.clone();
            match result {
                Ok(package) => {
                    let description = format!("Resync {} to v{}", package.id, package.version);
                    self.record(&id, ChangesetAction::Resync, description, |_| Ok(()))?;
                }
                Err(e) => {
                    warn!("Baseline add-on {} unavailable: {}", id, e);
                    self.record_failure(&id, ChangesetAction::Resync, &e);
                }
            }
            self.reload()?;
        }

        Ok(&self.registry)
    }

    /// Record a changeset and apply its database side in one transaction
    fn record<F>(
        &mut self,
        package_id: &str,
        action: ChangesetAction,
        description: String,
        apply: F,
    ) -> Result<()>
    where
        F: FnOnce(&Transaction) -> Result<()>,
    {
        db::transaction(&mut self.conn, |tx| {
            let mut changeset = Changeset::new(package_id, action, description);
            changeset.insert(tx)?;
            apply(tx)?;
            changeset.update_status(tx, ChangesetStatus::Applied)?;
            Ok(())
        })
    }

    /// Log a failed operation; a database error here is only logged
    fn record_failure(&self, package_id: &str, action: ChangesetAction, cause: &Error) {
        let mut changeset = Changeset::new(package_id, action, cause.to_string());
        let recorded = changeset
            .insert(&self.conn)
            .and_then(|_| changeset.update_status(&self.conn, ChangesetStatus::Failed));
        if let Err(e) = recorded {
            warn!(
                "Failed to record {} failure for {}: {}",
                action.as_str(),
                package_id,
                e
            );
        }
    }

    /// Install a local package archive
    pub async fn install_archive(&mut self, archive: &Path) -> Result<Package> {
        let package = self.installer.install(archive, &self.registry).await?;

        let artworks = package.artwork_ids();
        let description = format!("Install {} v{}", package.id, package.version);
        self.record(&package.id, ChangesetAction::Install, description, |tx| {
            EnabledArtwork::enable_all(tx, &package.id, &artworks)
        })?;

        self.events.emit(Event::InstallComplete {
            id: package.id.clone(),
        });
        self.reload()?;
        Ok(package)
    }

    /// Remove an installed package and forget its artworks
    pub fn uninstall(&mut self, id: &str) -> Result<()> {
        let package = self
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("add-on {}", id)))?;

        let artworks = self.installer.uninstall(&package)?;
        let description = format!("Uninstall {} v{}", package.id, package.version);
        self.record(id, ChangesetAction::Uninstall, description, |tx| {
            let disabled = EnabledArtwork::disable_all(tx, &artworks)?;
            debug!("Disabled {} artworks of {}", disabled, id);
            Ok(())
        })?;

        info!("Uninstalled add-on {}", id);
        self.events.emit(Event::UninstallComplete { id: id.to_string() });
        self.reload()?;
        Ok(())
    }

    /// Fetch the catalog and keep the entries this application can install
    pub async fn refresh_catalog(&mut self) -> Result<&[CatalogEntry]> {
        let catalog = self.source.fetch_catalog(&self.config.catalog_url).await?;
        let compatible = filter_catalog(&self.config.app_version, &catalog);
        info!(
            "{} of {} catalog add-ons are compatible with {}",
            compatible.len(),
            catalog.len(),
            self.config.app_version
        );
        Ok(self.catalog.insert(compatible).as_slice())
    }

    async fn ensure_catalog(&mut self) -> Result<&[CatalogEntry]> {
        if self.catalog.is_none() {
            self.refresh_catalog().await?;
        }
        Ok(self.catalog.as_deref().unwrap_or_default())
    }

    /// Download, verify and install a catalog version
    ///
    /// An older installed copy is uninstalled first. Returns `None` when the
    /// installed copy is already at or above `version`.
    pub async fn install_downloadable(
        &mut self,
        key: &str,
        version: u32,
    ) -> Result<Option<Package>> {
        let definition = self
            .ensure_catalog()
            .await?
            .iter()
            .find(|entry| entry.key == key)
            .ok_or_else(|| Error::NotFound(format!("catalog entry {}", key)))?
            .version(version)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} v{} in catalog", key, version)))?;

        if let Some(installed) = self.registry.get(key) {
            if installed.version >= version {
                info!(
                    "Add-on {} v{} already installed, v{} requested",
                    key, installed.version, version
                );
                return Ok(None);
            }
            info!("Reinstalling {}: v{} -> v{}", key, installed.version, version);
            self.uninstall(key)?;
        }

        let packages_root = self.installer.packages_root().to_path_buf();
        fs::create_dir_all(&packages_root)?;
        let download_dir = tempfile::Builder::new()
            .prefix(DOWNLOAD_PREFIX)
            .tempdir_in(&packages_root)?;
        let archive = download_dir.path().join(format!("{}-v{}.jca", key, version));

        self.source
            .fetch(
                definition.provider,
                &definition.url,
                &archive,
                progress_callback(Arc::clone(&self.events), key),
            )
            .await?;

        let verify_path = archive.clone();
        let digest = definition.digest.clone();
        let verified =
            tokio::task::spawn_blocking(move || verify_artifact(&verify_path, digest.as_deref()))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if let Err(e) = verified {
            if matches!(e, Error::ChecksumMismatch { .. }) {
                self.events.emit(Event::ChecksumFailed { id: key.to_string() });
            }
            return Err(e);
        }

        let package = self.install_archive(&archive).await?;
        Ok(Some(package))
    }

    /// Installed, removable packages with a newer compatible version
    ///
    /// Errored packages are included; a newer catalog version is often what
    /// repairs them.
    fn pending_updates(&self, catalog: &[CatalogEntry]) -> Vec<(String, u32)> {
        self.registry
            .iter()
            .filter(|package| package.removable)
            .filter_map(|package| {
                let entry = catalog.iter().find(|entry| entry.key == package.id)?;
                let latest = latest_compatible(&self.config.app_version, &entry.versions)?;
                (latest.version > package.version).then(|| (package.id.clone(), latest.version))
            })
            .collect()
    }

    /// Update every outdated package, one at a time
    ///
    /// A failure is logged and reported for its id; the batch continues.
    pub async fn update_all(&mut self) -> Result<UpdateReport> {
        let catalog = self.refresh_catalog().await?.to_vec();
        let pending = self.pending_updates(&catalog);
        info!("{} add-ons have updates", pending.len());

        let mut report = UpdateReport::default();
        for (id, version) in pending {
            match self.install_downloadable(&id, version).await {
                Ok(_) => {
                    info!("Updated {} to v{}", id, version);
                    report.updated.push(id);
                }
                Err(e) => {
                    warn!("Failed to update {}: {}", id, e);
                    self.record_failure(&id, ChangesetAction::Install, &e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        if !report.updated.is_empty() {
            self.reload()?;
            self.events.emit(Event::UpdateBatchComplete {
                updated: report.updated.clone(),
            });
        }

        Ok(report)
    }

    /// Required packages that are missing or too old
    pub fn find_missing(&self, required: &BTreeMap<String, u32>) -> Vec<String> {
        self.registry.find_missing(required)
    }

    /// Add an explicit package folder and rescan
    pub fn add_user_path(&mut self, path: &Path) -> Result<()> {
        UserAddonPath::add(&self.conn, &path.to_string_lossy())?;
        self.reload()?;
        Ok(())
    }

    /// Forget an explicit package folder and rescan
    pub fn remove_user_path(&mut self, path: &Path) -> Result<bool> {
        let removed = UserAddonPath::remove(&self.conn, &path.to_string_lossy())?;
        if removed {
            self.reload()?;
        }
        Ok(removed)
    }

    pub fn enabled_artworks(&self) -> Result<Vec<String>> {
        EnabledArtwork::list_all(&self.conn)
    }

    pub fn history(&self) -> Result<Vec<Changeset>> {
        Changeset::list_all(&self.conn)
    }

    pub fn channel(&self) -> Result<Channel> {
        Channel::load(&self.conn)
    }

    pub fn set_channel(&self, channel: Channel) -> Result<()> {
        channel.store(&self.conn)
    }

    /// Newest application release offered on the stored channel
    pub async fn check_for_update(&self) -> Result<Option<ReleaseCandidate>> {
        let channel = self.channel()?;
        let client =
            ReleaseFeedClient::new(&self.config.release_feed_url, self.config.connect_timeout)?;
        client
            .check(channel, self.config.app_version.as_str())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaselineSpec;
    use crate::events::RecordingSink;
    use crate::packages::manifest::MANIFEST_FILE;
    use crate::repository::sha256_file;
    use crate::testing::{MockSource, write_package_zip};
    use crate::version::AppVersion;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        sink: Arc<RecordingSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                sink: Arc::new(RecordingSink::new()),
            }
        }

        fn config(&self) -> Config {
            let mut config = Config::new(
                self.temp.path().join("data"),
                AppVersion::new("6.1.0").unwrap(),
            );
            config.baseline = BaselineSpec {
                urls: vec!["https://mirror.example.com/classic.jca".to_string()],
                ..BaselineSpec::default()
            };
            config
        }

        fn manager(&self, source: MockSource) -> AddonManager {
            AddonManager::open(self.config(), Arc::new(source), self.sink.clone()).unwrap()
        }

        fn archive(&self, id: &str, version: u32, artworks: &[&str]) -> PathBuf {
            let path = self.temp.path().join(format!("{}-{}.jca", id, version));
            write_package_zip(&path, id, version, artworks);
            path
        }

        fn packages_root(&self) -> PathBuf {
            self.temp.path().join("data/addons")
        }

        fn root_listing(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.packages_root())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        }
    }

    fn url(id: &str, version: u32) -> String {
        format!("https://dl.example.com/{}-{}.jca", id, version)
    }

    #[tokio::test]
    async fn test_install_and_uninstall_track_artworks() {
        let f = Fixture::new();
        let mut manager = f.manager(MockSource::new());
        manager.reload().unwrap();

        let archive = f.archive("castles", 1, &["big", "small"]);
        manager.install_archive(&archive).await.unwrap();

        assert!(manager.registry().has_usable("castles"));
        assert_eq!(
            manager.enabled_artworks().unwrap(),
            vec!["castles/big".to_string(), "castles/small".to_string()]
        );

        manager.uninstall("castles").unwrap();
        assert!(!manager.registry().contains("castles"));
        assert!(manager.enabled_artworks().unwrap().is_empty());
        assert!(f.root_listing().is_empty());

        let history = manager.history().unwrap();
        let actions: Vec<_> = history.iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec![ChangesetAction::Install, ChangesetAction::Uninstall]
        );
        assert!(history.iter().all(|c| c.status == ChangesetStatus::Applied));

        assert_eq!(
            f.sink.milestones(),
            vec![
                Event::InstallComplete {
                    id: "castles".to_string()
                },
                Event::UninstallComplete {
                    id: "castles".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_uninstall_unknown_package() {
        let f = Fixture::new();
        let mut manager = f.manager(MockSource::new());
        manager.reload().unwrap();

        assert!(matches!(
            manager.uninstall("nothing"),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_install_downloadable_verifies_digest() {
        let f = Fixture::new();
        let archive = f.archive("castles", 2, &[]);
        let digest = sha256_file(&archive).unwrap();

        let source = MockSource::new()
            .serve(&url("castles", 2), &archive)
            .list("castles", 2, &url("castles", 2), Some(&digest.to_ascii_uppercase()));
        let mut manager = f.manager(source);
        manager.reload().unwrap();

        let package = manager
            .install_downloadable("castles", 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(package.version, 2);
        assert_eq!(f.root_listing(), vec!["castles".to_string()]);

        // Same version again is a no-op
        assert!(manager.install_downloadable("castles", 2).await.unwrap().is_none());

        let progress: Vec<_> = f
            .sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::DownloadProgress { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_registry_unchanged() {
        let f = Fixture::new();
        let archive = f.archive("castles", 1, &[]);
        let source = MockSource::new()
            .serve(&url("castles", 1), &archive)
            .list("castles", 1, &url("castles", 1), Some(&"ab".repeat(32)));
        let mut manager = f.manager(source);
        manager.reload().unwrap();
        let before = manager.registry().clone();

        let result = manager.install_downloadable("castles", 1).await;

        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
        assert_eq!(manager.registry(), &before);
        assert!(f.root_listing().is_empty());
        assert_eq!(
            f.sink.milestones(),
            vec![Event::ChecksumFailed {
                id: "castles".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_install_downloadable_unknown_entries() {
        let f = Fixture::new();
        let source = MockSource::new().list("castles", 1, &url("castles", 1), None);
        let mut manager = f.manager(source);
        manager.reload().unwrap();

        assert!(matches!(
            manager.install_downloadable("dragons", 1).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            manager.install_downloadable("castles", 7).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_all_is_sequential_and_continues_after_failure() {
        let f = Fixture::new();
        let source = MockSource::new()
            .serve(&url("abbey", 2), &f.archive("abbey", 2, &[]))
            .serve(&url("zoo", 3), &f.archive("zoo", 3, &[]))
            .list("abbey", 2, &url("abbey", 2), None)
            .list("castles", 2, &url("castles", 2), None)
            .list("zoo", 2, &url("zoo", 2), None)
            .list("zoo", 3, &url("zoo", 3), None);
        let mut manager = f.manager(source);
        manager.reload().unwrap();

        for id in ["abbey", "castles", "zoo"] {
            manager.install_archive(&f.archive(id, 1, &[])).await.unwrap();
        }
        let installs = f.sink.milestones().len();

        let report = manager.update_all().await.unwrap();

        assert_eq!(report.updated, vec!["abbey".to_string(), "zoo".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "castles");

        assert_eq!(manager.registry().get("abbey").unwrap().version, 2);
        assert_eq!(manager.registry().get("zoo").unwrap().version, 3);

        let id = |s: &str| s.to_string();
        assert_eq!(
            f.sink.milestones()[installs..].to_vec(),
            vec![
                Event::UninstallComplete { id: id("abbey") },
                Event::InstallComplete { id: id("abbey") },
                Event::UninstallComplete { id: id("castles") },
                Event::UninstallComplete { id: id("zoo") },
                Event::InstallComplete { id: id("zoo") },
                Event::UpdateBatchComplete {
                    updated: vec![id("abbey"), id("zoo")]
                },
            ]
        );

        let failures = manager
            .history()
            .unwrap()
            .into_iter()
            .filter(|c| c.status == ChangesetStatus::Failed)
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_update_all_skips_non_removable_and_current() {
        let f = Fixture::new();
        let explicit = f.temp.path().join("dev/castles");
        fs::create_dir_all(&explicit).unwrap();
        fs::write(
            explicit.join(MANIFEST_FILE),
            r#"{"version":1,"minimumAppVersion":"6.0.0"}"#,
        )
        .unwrap();

        let source = MockSource::new()
            .list("castles", 2, &url("castles", 2), None)
            .list("abbey", 1, &url("abbey", 1), None);
        let mut manager = f.manager(source);
        manager.add_user_path(&explicit).unwrap();
        manager.install_archive(&f.archive("abbey", 1, &[])).await.unwrap();

        let report = manager.update_all().await.unwrap();

        assert!(report.is_empty());
        assert!(!f
            .sink
            .milestones()
            .iter()
            .any(|e| matches!(e, Event::UpdateBatchComplete { .. })));
    }

    #[tokio::test]
    async fn test_update_all_repairs_incompatible_package() {
        let f = Fixture::new();
        let folder = f.packages_root().join("castles");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join(MANIFEST_FILE),
            r#"{"version":1,"minimumJczVersion":"9.0.0"}"#,
        )
        .unwrap();

        let source = MockSource::new()
            .serve(&url("castles", 2), &f.archive("castles", 2, &[]))
            .list("castles", 2, &url("castles", 2), None);
        let mut manager = f.manager(source);
        manager.reload().unwrap();

        let before = manager.registry().get("castles").unwrap();
        assert!(!before.is_usable());
        assert_eq!(before.version, 1);

        let report = manager.update_all().await.unwrap();

        assert_eq!(report.updated, vec!["castles".to_string()]);
        let after = manager.registry().get("castles").unwrap();
        assert_eq!(after.version, 2);
        assert!(after.is_usable());
    }

    #[tokio::test]
    async fn test_failures_survive_a_broken_changeset_log() {
        let f = Fixture::new();
        let folder = f.packages_root().join("castles");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join(MANIFEST_FILE),
            r#"{"version":1,"minimumJczVersion":"6.0.0"}"#,
        )
        .unwrap();

        let source = MockSource::new().list("castles", 2, &url("castles", 2), None);
        let mut manager = f.manager(source);
        manager
            .connection()
            .execute_batch("DROP TABLE changesets")
            .unwrap();

        assert!(manager.load().await.is_ok());

        let report = manager.update_all().await.unwrap();
        assert!(report.updated.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "castles");
    }

    #[tokio::test]
    async fn test_load_resyncs_missing_baseline() {
        let f = Fixture::new();
        let archive = f.archive("classic", 6, &["art"]);
        let mut config = f.config();
        config.baseline.sha256 = sha256_file(&archive).unwrap();
        let mirror = config.baseline.urls[0].clone();

        let source = MockSource::new().serve(&mirror, &archive);
        let mut manager =
            AddonManager::open(config, Arc::new(source), f.sink.clone()).unwrap();

        manager.load().await.unwrap();

        let classic = manager.registry().get("classic").unwrap();
        assert_eq!(classic.version, 6);
        assert!(!classic.removable);
        assert!(matches!(
            manager.uninstall("classic"),
            Err(Error::NotRemovable(_))
        ));
        assert_eq!(
            manager.history().unwrap()[0].action,
            ChangesetAction::Resync
        );
    }

    #[tokio::test]
    async fn test_load_survives_unreachable_baseline() {
        let f = Fixture::new();
        let mut manager = f.manager(MockSource::new());

        let registry = manager.load().await.unwrap();
        assert!(registry.is_empty());

        let history = manager.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ChangesetStatus::Failed);
    }
}
