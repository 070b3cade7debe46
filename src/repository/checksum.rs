// src/repository/checksum.rs

//! Archive integrity verification

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Compute the lowercase hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a downloaded artifact against its expected digest
///
/// Digests compare case-insensitively. On mismatch the file is deleted
/// before [`Error::ChecksumMismatch`] is returned. An absent digest skips
/// verification with a warning.
pub fn verify_artifact(path: &Path, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
        warn!(
            "No digest available for {}, skipping verification",
            path.display()
        );
        return Ok(());
    };

    debug!("Verifying checksum for {}", path.display());
    let actual = sha256_file(path)?;

    if !actual.eq_ignore_ascii_case(expected) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to delete corrupt download {}: {}", path.display(), e);
        }
        return Err(Error::ChecksumMismatch {
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }

    debug!("Checksum verified: {}", actual);
    Ok(())
}
