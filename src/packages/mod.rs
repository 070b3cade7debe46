// src/packages/mod.rs

//! Add-on packages on disk
//!
//! This module provides manifest parsing and validation, discovery of
//! installed packages across the configured roots, and atomic install and
//! removal of package archives.

pub mod installer;
pub mod manifest;
pub mod registry;

pub use installer::{Installer, StagedPackage};
pub use manifest::{Artwork, Manifest, Package};
pub use registry::{Registry, RootKind, Scanner};
