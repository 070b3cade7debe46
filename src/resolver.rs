// src/resolver.rs

//! Catalog compatibility filtering
//!
//! A catalog version qualifies for the running application when
//! `from <= app < to`, with either bound optional. Pre-release builds
//! (alpha, beta, rc) use the `dev*` bounds where the catalog provides them;
//! each side falls back to its stable bound on its own. All comparisons use
//! coerced versions, so `6.1.0-beta.2` is compared as `6.1.0`.

use crate::repository::{CatalogEntry, PackageVersion};
use crate::version::{AppVersion, coerce};
use semver::Version;
use tracing::debug;

fn bound(dev: bool, dev_bound: &Option<String>, stable_bound: &Option<String>) -> Option<Version> {
    let raw = if dev {
        dev_bound.as_ref().or(stable_bound.as_ref())
    } else {
        stable_bound.as_ref()
    }?;

    let coerced = coerce(raw);
    if coerced.is_none() {
        debug!("Ignoring unparseable version bound {:?}", raw);
    }
    coerced
}

/// Whether a single catalog version accepts the running application
pub fn is_compatible(app: &AppVersion, version: &PackageVersion) -> bool {
    let dev = app.is_prerelease_build();
    let current = app.coerced();

    let from = bound(dev, &version.dev_from_version, &version.from_version);
    let to = bound(dev, &version.dev_to_version, &version.to_version);

    let from_ok = from.is_none_or(|from| current >= &from);
    let to_ok = to.is_none_or(|to| current < &to);
    from_ok && to_ok
}

/// Keep the versions whose bounds accept the running application
pub fn filter_compatible(app: &AppVersion, versions: &[PackageVersion]) -> Vec<PackageVersion> {
    versions
        .iter()
        .filter(|v| is_compatible(app, v))
        .cloned()
        .collect()
}

/// Highest compatible version, if any
pub fn latest_compatible(app: &AppVersion, versions: &[PackageVersion]) -> Option<PackageVersion> {
    versions
        .iter()
        .filter(|v| is_compatible(app, v))
        .max_by_key(|v| v.version)
        .cloned()
}

/// Narrow a catalog to what the running application can install
///
/// Entries left without any compatible version are dropped.
pub fn filter_catalog(app: &AppVersion, catalog: &[CatalogEntry]) -> Vec<CatalogEntry> {
    catalog
        .iter()
        .filter_map(|entry| {
            let versions = filter_compatible(app, &entry.versions);
            if versions.is_empty() {
                debug!("No compatible version of {} for {}", entry.key, app);
                None
            } else {
                Some(CatalogEntry {
                    key: entry.key.clone(),
                    versions,
                })
            }
        })
        .collect()
}
