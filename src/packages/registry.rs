// src/packages/registry.rs

//! Installed package discovery
//!
//! The scanner walks an ordered list of roots, highest priority first:
//! 1. explicit package folders added by the user,
//! 2. the bundled/system add-ons directory,
//! 3. the user-writable packages root.
//!
//! The first successfully parsed package for an id wins; copies of the same
//! id in lower-priority roots are discarded, never merged.

use super::manifest::{Package, read_package};
use crate::config::BaselineSpec;
use crate::version::AppVersion;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where a scanned package was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// A single package folder the user pointed at explicitly
    UserPath,
    /// Add-ons bundled with the application
    System,
    /// The user-writable packages root
    UserData,
}

impl RootKind {
    fn removable(self) -> bool {
        matches!(self, RootKind::UserData)
    }

    fn hidden(self) -> bool {
        matches!(self, RootKind::System)
    }
}

/// In-memory index of installed packages, sorted by (removable, id)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    packages: Vec<Package>,
}

impl Registry {
    /// Build a registry, sorting packages for presentation
    pub fn new(mut packages: Vec<Package>) -> Self {
        packages.sort_by(|a, b| (a.removable, &a.id).cmp(&(b.removable, &b.id)));
        Self { packages }
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Whether a package with this id is installed and free of errors
    pub fn has_usable(&self, id: &str) -> bool {
        self.get(id).is_some_and(Package::is_usable)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter()
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Report required packages that are absent or too old
    ///
    /// Missing ids are reported bare; installed ones below the required
    /// version as `"<id> (requires v<n>)"`.
    pub fn find_missing(&self, required: &BTreeMap<String, u32>) -> Vec<String> {
        let mut missing = Vec::new();
        for (id, version) in required {
            match self.get(id) {
                None => missing.push(id.clone()),
                Some(package) if package.version < *version => {
                    missing.push(format!("{} (requires v{})", id, version));
                }
                Some(_) => {}
            }
        }
        missing
    }
}

/// Discovers installed packages across the configured roots
#[derive(Debug, Clone)]
pub struct Scanner {
    user_paths: Vec<PathBuf>,
    system_dir: Option<PathBuf>,
    packages_root: PathBuf,
    app_version: AppVersion,
    baseline_id: String,
    baseline_version: u32,
}

impl Scanner {
    pub fn new(packages_root: PathBuf, app_version: AppVersion, baseline: &BaselineSpec) -> Self {
        Self {
            user_paths: Vec::new(),
            system_dir: None,
            packages_root,
            app_version,
            baseline_id: baseline.id.clone(),
            baseline_version: baseline.version,
        }
    }

    /// Explicit package folders, highest priority first
    pub fn with_user_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.user_paths = paths;
        self
    }

    /// Directory of add-ons bundled with the application
    pub fn with_system_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.system_dir = dir;
        self
    }

    pub fn packages_root(&self) -> &Path {
        &self.packages_root
    }

    /// Scan every root and build a fresh registry
    pub fn scan(&self) -> Registry {
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for path in &self.user_paths {
            let Some(id) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                warn!("Ignoring add-on path without a folder name: {}", path.display());
                continue;
            };
            self.consider(&id, path, RootKind::UserPath, &mut found, &mut seen);
        }

        if let Some(system_dir) = &self.system_dir {
            self.scan_root(system_dir, RootKind::System, &mut found, &mut seen);
        }
        self.scan_root(&self.packages_root, RootKind::UserData, &mut found, &mut seen);

        for package in &found {
            if let Some(error) = &package.error {
                warn!("Can't load {} add-on: {}", package.id, error);
            }
        }

        debug!("Scanned {} add-ons", found.len());
        Registry::new(found)
    }

    fn scan_root(
        &self,
        root: &Path,
        kind: RootKind,
        found: &mut Vec<Package>,
        seen: &mut HashSet<String>,
    ) {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("{} not readable: {}", root.display(), e);
                return;
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        for name in names {
            let folder = root.join(&name);
            self.consider(&name, &folder, kind, found, seen);
        }
    }

    fn consider(
        &self,
        id: &str,
        folder: &Path,
        kind: RootKind,
        found: &mut Vec<Package>,
        seen: &mut HashSet<String>,
    ) {
        if seen.contains(id) {
            debug!("{} shadowed by a higher-priority root", folder.display());
            return;
        }

        let reference = (id == self.baseline_id).then_some(self.baseline_version);
        let mut package = match read_package(id, folder, &self.app_version, reference) {
            Ok(Some(package)) => package,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read {}: {}", folder.display(), e);
                return;
            }
        };

        package.removable = kind.removable() && id != self.baseline_id;
        package.hidden = kind.hidden();

        seen.insert(id.to_string());
        found.push(package);
    }
}
