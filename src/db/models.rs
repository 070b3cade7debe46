// src/db/models.rs

//! Data models for Artpack database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Kind of mutation a changeset records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetAction {
    Install,
    Uninstall,
    Resync,
}

impl ChangesetAction {
    pub fn as_str(&self) -> &str {
        match self {
            ChangesetAction::Install => "install",
            ChangesetAction::Uninstall => "uninstall",
            ChangesetAction::Resync => "resync",
        }
    }
}

impl FromStr for ChangesetAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(ChangesetAction::Install),
            "uninstall" => Ok(ChangesetAction::Uninstall),
            "resync" => Ok(ChangesetAction::Resync),
            _ => Err(format!("Invalid changeset action: {}", s)),
        }
    }
}

/// Changeset status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetStatus {
    Pending,
    Applied,
    Failed,
}

impl ChangesetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangesetStatus::Pending => "pending",
            ChangesetStatus::Applied => "applied",
            ChangesetStatus::Failed => "failed",
        }
    }
}

impl FromStr for ChangesetStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangesetStatus::Pending),
            "applied" => Ok(ChangesetStatus::Applied),
            "failed" => Ok(ChangesetStatus::Failed),
            _ => Err(format!("Invalid changeset status: {}", s)),
        }
    }
}

/// A Changeset records one mutation of the packages root
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: Option<i64>,
    pub package_id: String,
    pub action: ChangesetAction,
    pub description: String,
    pub status: ChangesetStatus,
    pub created_at: Option<String>,
    pub applied_at: Option<String>,
}

impl Changeset {
    /// Create a new pending Changeset
    pub fn new(package_id: &str, action: ChangesetAction, description: String) -> Self {
        Self {
            id: None,
            package_id: package_id.to_string(),
            action,
            description,
            status: ChangesetStatus::Pending,
            created_at: None,
            applied_at: None,
        }
    }

    /// Insert this changeset into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changesets (package_id, action, description, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &self.package_id,
                self.action.as_str(),
                &self.description,
                self.status.as_str(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a changeset by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, action, description, status, created_at, applied_at
             FROM changesets WHERE id = ?1",
        )?;

        let changeset = stmt.query_row([id], Self::from_row).optional()?;

        Ok(changeset)
    }

    /// List all changesets, oldest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, action, description, status, created_at, applied_at
             FROM changesets ORDER BY id",
        )?;

        let changesets = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changesets)
    }

    /// List the changesets touching one package, oldest first
    pub fn find_by_package(conn: &Connection, package_id: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, action, description, status, created_at, applied_at
             FROM changesets WHERE package_id = ?1 ORDER BY id",
        )?;

        let changesets = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changesets)
    }

    /// Update changeset status
    pub fn update_status(&mut self, conn: &Connection, new_status: ChangesetStatus) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError("Cannot update changeset without ID".to_string()))?;

        if new_status == ChangesetStatus::Applied {
            conn.execute(
                "UPDATE changesets SET status = ?1, applied_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        } else {
            conn.execute(
                "UPDATE changesets SET status = ?1 WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        }

        self.status = new_status;
        Ok(())
    }

    /// Convert a database row to a Changeset
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let action_str: String = row.get(2)?;
        let action = action_str.parse::<ChangesetAction>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        let status_str: String = row.get(4)?;
        let status = status_str.parse::<ChangesetStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            action,
            description: row.get(3)?,
            status,
            created_at: row.get(5)?,
            applied_at: row.get(6)?,
        })
    }
}

/// Key/value user setting
pub struct Setting;

impl Setting {
    /// Read a setting, `None` when it was never written
    pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a setting, replacing any previous value
    pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Extra package folder added by the user; scanned before every other root
pub struct UserAddonPath;

impl UserAddonPath {
    /// Append a path; adding an existing path is a no-op
    pub fn add(conn: &Connection, path: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO user_addon_paths (path) VALUES (?1)",
            [path],
        )?;
        Ok(())
    }

    /// Remove a path, returning whether it was present
    pub fn remove(conn: &Connection, path: &str) -> Result<bool> {
        let removed = conn.execute("DELETE FROM user_addon_paths WHERE path = ?1", [path])?;
        Ok(removed > 0)
    }

    /// All paths in the order they were added
    pub fn list_all(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT path FROM user_addon_paths ORDER BY id")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(paths)
    }
}

/// Artwork the user has switched on
pub struct EnabledArtwork;

impl EnabledArtwork {
    /// Enable artworks belonging to one package
    pub fn enable_all(conn: &Connection, package_id: &str, artwork_ids: &[String]) -> Result<()> {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO enabled_artworks (artwork_id, package_id) VALUES (?1, ?2)",
        )?;
        for artwork_id in artwork_ids {
            stmt.execute(params![artwork_id, package_id])?;
        }
        Ok(())
    }

    /// Drop the given artwork ids, returning how many were enabled
    pub fn disable_all(conn: &Connection, artwork_ids: &[String]) -> Result<usize> {
        let mut stmt = conn.prepare("DELETE FROM enabled_artworks WHERE artwork_id = ?1")?;
        let mut removed = 0;
        for artwork_id in artwork_ids {
            removed += stmt.execute([artwork_id])?;
        }
        Ok(removed)
    }

    /// All enabled artwork ids, sorted
    pub fn list_all(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT artwork_id FROM enabled_artworks ORDER BY artwork_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
