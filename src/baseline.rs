// src/baseline.rs

//! Baseline package resync
//!
//! The baseline package must always be present and current. When it is
//! missing, broken or older than the reference version it is fetched again
//! from the first reachable mirror, verified against the reference digest
//! and swapped into the packages root. A failed resync leaves the existing
//! copy untouched.

use crate::config::BaselineSpec;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink, progress_callback};
use crate::packages::installer::STAGING_PREFIX;
use crate::packages::{Installer, Package, Registry};
use crate::repository::{Provider, RemoteSource, verify_artifact};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the temporary download directory inside the packages root
const DOWNLOAD_PREFIX: &str = ".download-";

/// Whether the baseline is missing, errored or outdated
pub fn needs_resync(registry: &Registry, baseline: &BaselineSpec) -> bool {
    match registry.get(&baseline.id) {
        None => {
            info!("Baseline add-on {} is missing", baseline.id);
            true
        }
        Some(package) if package.error.is_some() || package.outdated => {
            info!(
                "Baseline add-on {} needs refresh (version {}, error: {:?})",
                package.id, package.version, package.error
            );
            true
        }
        Some(_) => false,
    }
}

/// Probe mirrors in order and return the first reachable one
pub async fn first_reachable(source: &dyn RemoteSource, urls: &[String]) -> Option<String> {
    for url in urls {
        if source.probe(url).await {
            debug!("Mirror {} is reachable", url);
            return Some(url.clone());
        }
        debug!("Mirror {} is unreachable", url);
    }
    None
}

/// Re-fetch the baseline package and activate it
///
/// Errors leave the packages root as it was; callers log them and carry on
/// without a fresh baseline.
pub async fn resync(
    baseline: &BaselineSpec,
    registry: &Registry,
    installer: &Installer,
    source: &dyn RemoteSource,
    events: Arc<dyn EventSink>,
) -> Result<Package> {
    let url = first_reachable(source, &baseline.urls)
        .await
        .ok_or_else(|| {
            Error::BaselineUnavailable(format!(
                "none of {} mirrors reachable for {}",
                baseline.urls.len(),
                baseline.id
            ))
        })?;
    info!("Downloading baseline add-on {} from {}", baseline.id, url);

    let packages_root = installer.packages_root();
    fs::create_dir_all(packages_root)?;
    let download_dir = tempfile::Builder::new()
        .prefix(DOWNLOAD_PREFIX)
        .tempdir_in(packages_root)?;
    let archive = download_dir.path().join(format!("{}.jca", baseline.id));

    source
        .fetch(
            Provider::classify(&url),
            &url,
            &archive,
            progress_callback(events.clone(), &baseline.id),
        )
        .await?;

    let expected = baseline.sha256.clone();
    let verify_path = archive.clone();
    let verified =
        tokio::task::spawn_blocking(move || verify_artifact(&verify_path, Some(expected.as_str())))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    if let Err(e) = verified {
        if matches!(e, Error::ChecksumMismatch { .. }) {
            events.emit(Event::ChecksumFailed {
                id: baseline.id.clone(),
            });
        }
        return Err(e);
    }

    let staged = installer.stage(&archive).await?;
    if staged.id() != baseline.id {
        return Err(Error::MalformedArchive(format!(
            "baseline archive contains {} instead of {}",
            staged.id(),
            baseline.id
        )));
    }
    let (manifest, version) = installer.validate(&staged)?;

    if let Some(previous) = registry.get(&baseline.id) {
        if !previous.folder.starts_with(packages_root) {
            warn!(
                "Baseline copy at {} is outside {} and stays in place",
                previous.folder.display(),
                packages_root.display()
            );
        }
    }

    let target = packages_root.join(&baseline.id);
    let mut package = replace_dir(&target, packages_root, || {
        installer.activate(staged, &manifest, version)
    })?;
    package.removable = false;

    info!("Baseline add-on {} resynced to v{}", package.id, package.version);
    events.emit(Event::BaselineResynced {
        id: package.id.clone(),
        version: package.version,
    });
    Ok(package)
}

/// Run `activate` with any existing `target` parked aside
///
/// The previous directory is moved into a staging directory under `root`
/// first. It is deleted once `activate` succeeds and moved back if it fails.
fn replace_dir<T>(target: &Path, root: &Path, activate: impl FnOnce() -> Result<T>) -> Result<T> {
    if !target.exists() {
        return activate();
    }

    let parking = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(root)?;
    let parked = parking.path().join("previous");
    debug!("Parking {} at {}", target.display(), parked.display());
    fs::rename(target, &parked)?;

    match activate() {
        Ok(value) => {
            info!("Removed previous baseline at {}", target.display());
            Ok(value)
        }
        Err(e) => {
            if let Err(restore) = fs::rename(&parked, target) {
                warn!("Failed to restore {}: {}", target.display(), restore);
            }
            Err(e)
        }
    }
}
