// src/lib.rs

//! Artpack Add-on Manager
//!
//! Installs, verifies, updates and removes add-on bundles for a desktop
//! application, and picks application releases by update channel.
//!
//! # Architecture
//!
//! - Database-first: user settings and the changeset log live in SQLite
//! - Atomic installs: archives are staged inside the packages root and
//!   renamed into place only after validation
//! - Verified downloads: SHA-256 digests checked before anything is installed
//! - Layered roots: explicit user paths shadow bundled add-ons, which shadow
//!   user-installed ones
//! - Self-healing baseline: the mandatory package is re-fetched from the
//!   first reachable mirror when missing or outdated

pub mod baseline;
pub mod config;
pub mod db;
mod error;
pub mod events;
pub mod orchestrator;
pub mod packages;
pub mod release;
pub mod repository;
pub mod resolver;
pub mod version;

#[cfg(test)]
mod testing;

pub use config::{BaselineSpec, Config};
pub use error::{Error, Result};
pub use events::{Event, EventSink};
pub use orchestrator::{AddonManager, UpdateReport};
pub use release::Channel;
pub use version::AppVersion;
