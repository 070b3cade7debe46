// src/error.rs

use thiserror::Error;

/// Core error types for Artpack
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip archive errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Transient transport failure; the whole fetch may be retried
    #[error("Network error: {0}")]
    Network(String),

    /// Downloaded artifact does not match the expected digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Package manifest is missing or invalid
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A package with this id is already installed
    #[error("Add-on '{0}' is already installed")]
    AlreadyInstalled(String),

    /// Package requires a newer application
    #[error("Add-on requires application {required} or higher (running {running})")]
    IncompatibleVersion { required: String, running: String },

    /// Archive root does not contain exactly one directory
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    /// Package comes from a read-only root or is the baseline
    #[error("Add-on '{0}' cannot be removed")]
    NotRemovable(String),

    /// Requested package, version, or setting does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// No fallback source for the baseline package could be used
    #[error("Baseline package unavailable: {0}")]
    BaselineUnavailable(String),

    /// Malformed input that is not a manifest (versions, timestamps, links)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Initialization error (database, HTTP client)
    #[error("Initialization error: {0}")]
    InitError(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

/// Result type alias using Artpack's Error type
pub type Result<T> = std::result::Result<T, Error>;
