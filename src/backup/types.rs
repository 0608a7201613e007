// Backup System Types - Core data structures and enums

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ConfigError;

/// Format of the timestamp embedded in archive filenames.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Descriptive record for one archive, keyed by `filename` in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// `<prefix>_<timestamp>.zip`
    pub filename: String,
    /// Absolute location of the archive
    pub path: PathBuf,
    /// Creation time formatted as `YYYY-MM-DD-HH-MM-SS`
    pub timestamp: String,
    /// ISO-8601 creation instant, used for all age arithmetic
    pub created_at: String,
    /// Archive length in bytes
    pub size: u64,
    /// SHA-256 hex digest of the archive bytes
    pub checksum: Option<String>,
    /// True only after a successful integrity check
    #[serde(default)]
    pub verified: bool,
}

impl ArchiveRecord {
    /// Parse `created_at`.
    ///
    /// Accepts RFC 3339 instants and, for metadata written without an offset,
    /// naive ISO-8601 date-times interpreted as local time.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.created_at)
    }
}

pub(crate) fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// What kind of source a backup run archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A single file, archived as one entry without directory structure
    File,
    /// A directory tree, archived recursively with its structure preserved
    Directory,
}

/// Tier sizes for tiered retention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredRetention {
    /// Most recent days kept unconditionally
    #[serde(default)]
    pub daily: u32,
    /// Additional week buckets
    #[serde(default)]
    pub weekly: u32,
    /// Additional month buckets
    #[serde(default)]
    pub monthly: u32,
}

impl TieredRetention {
    pub fn new(daily: u32, weekly: u32, monthly: u32) -> Self {
        Self {
            daily,
            weekly,
            monthly,
        }
    }
}

/// Rule set deciding which archives survive a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the `max_backups` most recent archives
    Simple { max_backups: usize },
    /// Daily/weekly/monthly buckets, never keeping fewer than `max_backups`
    Tiered {
        max_backups: usize,
        tiers: TieredRetention,
    },
}

impl RetentionPolicy {
    pub fn simple(max_backups: usize) -> Self {
        Self::Simple { max_backups }
    }

    pub fn tiered(max_backups: usize, tiers: TieredRetention) -> Self {
        Self::Tiered { max_backups, tiers }
    }

    pub fn max_backups(&self) -> usize {
        match self {
            Self::Simple { max_backups } | Self::Tiered { max_backups, .. } => *max_backups,
        }
    }
}

/// Outcome of one rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Archives removed together with their metadata entries
    pub deleted: Vec<String>,
    /// Archives left on storage
    pub retained: usize,
    /// Archives selected for deletion whose file could not be removed
    pub failed: Vec<String>,
    /// Metadata entries dropped because their archive no longer exists
    pub orphans_pruned: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),
    #[error("Archive creation error: {0}")]
    ArchiveCreationError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
