//! Configuration loading and validation
//!
//! A JSON document is read into [`RawConfig`], where every field is optional,
//! then validated into a [`CatalogConfig`]. Validation reports every problem
//! at once instead of stopping at the first.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::backup::types::{RetentionPolicy, TieredRetention};

pub const DEFAULT_MAX_BACKUPS: usize = 7;
pub const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 300;

/// Every missing or invalid setting found during validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {}", .issues.join("; "))]
pub struct ConfigError {
    pub issues: Vec<String>,
}

impl ConfigError {
    fn single(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// A configuration value as found in the document: the expected type, or
/// whatever JSON was there instead, kept for the validation report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Setting<T> {
    Valid(T),
    Invalid(serde_json::Value),
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Self::Valid(value)
    }
}

/// Configuration as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default, alias = "BACKUP_DIR_PATH")]
    pub backup_dir: Option<Setting<String>>,
    #[serde(default, alias = "BACKUP_PREFIX")]
    pub backup_prefix: Option<Setting<String>>,
    #[serde(default, alias = "ZIP_PASSWORD")]
    pub zip_password: Option<Setting<String>>,
    #[serde(default, alias = "MAX_BACKUPS")]
    pub max_backups: Option<Setting<i64>>,
    #[serde(default, alias = "VERIFY_BACKUPS")]
    pub verify_backups: Option<Setting<bool>>,
    #[serde(default, alias = "RETENTION_POLICY")]
    pub retention_policy: Option<Setting<RawRetention>>,
    #[serde(default, alias = "LOG_FILE_PATH")]
    pub log_file: Option<Setting<String>>,
    #[serde(default, alias = "VAULT_PATH")]
    pub source_path: Option<Setting<String>>,
    #[serde(default)]
    pub archive_timeout_secs: Option<Setting<u64>>,
    #[serde(default)]
    pub verify_timeout_secs: Option<Setting<u64>>,
    #[serde(default)]
    pub zip_program: Option<Setting<String>>,
    #[serde(default)]
    pub unzip_program: Option<Setting<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRetention {
    #[serde(default)]
    pub daily: Option<Setting<i64>>,
    #[serde(default)]
    pub weekly: Option<Setting<i64>>,
    #[serde(default)]
    pub monthly: Option<Setting<i64>>,
}

impl RawConfig {
    /// Read and parse a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::single(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Parse a JSON document. Only syntax errors and a non-object document
    /// fail here; wrongly typed values are reported by [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::single(format!("malformed JSON: {}", e)))
    }

    /// Validate into a [`CatalogConfig`], collecting every problem.
    pub fn validate(&self) -> Result<CatalogConfig, ConfigError> {
        let mut issues = Vec::new();

        let backup_dir = match text("backup_dir", &self.backup_dir, &mut issues) {
            Some(dir) => {
                let dir = expand_home(dir);
                if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if !parent.exists() {
                        issues.push(format!("parent directory does not exist: {}", parent.display()));
                    }
                }
                Some(dir)
            }
            None => {
                missing("backup_dir", &self.backup_dir, &mut issues);
                None
            }
        };

        let backup_prefix = match text("backup_prefix", &self.backup_prefix, &mut issues) {
            Some(prefix) if prefix.contains(['/', '\\']) => {
                issues.push(format!("backup_prefix must not contain path separators: {}", prefix));
                None
            }
            Some(prefix) => Some(prefix.to_string()),
            None => {
                missing("backup_prefix", &self.backup_prefix, &mut issues);
                None
            }
        };

        // Passwords are taken verbatim, surrounding whitespace included
        let zip_password = match typed("zip_password", &self.zip_password, "a string", &mut issues) {
            Some(pw) if !pw.is_empty() => Some(pw.clone()),
            _ => {
                missing("zip_password", &self.zip_password, &mut issues);
                None
            }
        };

        let max_backups = match typed("max_backups", &self.max_backups, "an integer", &mut issues) {
            None => DEFAULT_MAX_BACKUPS,
            Some(&n) if n >= 1 => n as usize,
            Some(n) => {
                issues.push(format!("max_backups must be at least 1, got {}", n));
                DEFAULT_MAX_BACKUPS
            }
        };

        let verify_backups = typed("verify_backups", &self.verify_backups, "a boolean", &mut issues)
            .copied()
            .unwrap_or(true);

        let tiers = typed(
            "retention_policy",
            &self.retention_policy,
            "an object of daily/weekly/monthly counts",
            &mut issues,
        )
        .and_then(|raw| raw.validate(&mut issues));
        let retention = match tiers {
            Some(tiers) => RetentionPolicy::tiered(max_backups, tiers),
            None => RetentionPolicy::simple(max_backups),
        };

        let archive_timeout = timeout(
            "archive_timeout_secs",
            &self.archive_timeout_secs,
            DEFAULT_ARCHIVE_TIMEOUT_SECS,
            &mut issues,
        );
        let verify_timeout = timeout(
            "verify_timeout_secs",
            &self.verify_timeout_secs,
            DEFAULT_VERIFY_TIMEOUT_SECS,
            &mut issues,
        );
        let zip_program = text("zip_program", &self.zip_program, &mut issues).unwrap_or("zip");
        let unzip_program = text("unzip_program", &self.unzip_program, &mut issues).unwrap_or("unzip");
        text("log_file", &self.log_file, &mut issues);
        text("source_path", &self.source_path, &mut issues);

        let (Some(backup_dir), Some(backup_prefix), Some(zip_password)) =
            (backup_dir, backup_prefix, zip_password)
        else {
            return Err(ConfigError { issues });
        };
        if !issues.is_empty() {
            return Err(ConfigError { issues });
        }

        Ok(CatalogConfig {
            backup_dir,
            backup_prefix,
            zip_password,
            verify_backups,
            retention,
            archive_timeout,
            verify_timeout,
            zip_program: zip_program.into(),
            unzip_program: unzip_program.into(),
            staging_root: None,
        })
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        valid_text(&self.log_file).map(expand_home)
    }

    pub fn source_path(&self) -> Option<PathBuf> {
        valid_text(&self.source_path).map(expand_home)
    }
}

impl RawRetention {
    /// `None` when every tier is zero or absent, which means simple rotation.
    fn validate(&self, issues: &mut Vec<String>) -> Option<TieredRetention> {
        let mut tier = |name: &str, value: &Option<Setting<i64>>| {
            let key = format!("retention_policy.{}", name);
            match typed(&key, value, "a non-negative integer", issues) {
                None => 0,
                Some(&v) if (0..=i64::from(u32::MAX)).contains(&v) => v as u32,
                Some(v) => {
                    issues.push(format!("{} must be a non-negative integer, got {}", key, v));
                    0
                }
            }
        };
        let tiers = TieredRetention::new(
            tier("daily", &self.daily),
            tier("weekly", &self.weekly),
            tier("monthly", &self.monthly),
        );
        (tiers != TieredRetention::default()).then_some(tiers)
    }
}

/// Validated settings consumed by the backup catalog.
#[derive(Clone)]
pub struct CatalogConfig {
    pub backup_dir: PathBuf,
    pub backup_prefix: String,
    pub zip_password: String,
    pub verify_backups: bool,
    pub retention: RetentionPolicy,
    pub archive_timeout: Duration,
    pub verify_timeout: Duration,
    pub zip_program: PathBuf,
    pub unzip_program: PathBuf,
    /// Parent for staging directories; the system temp dir when `None`
    pub staging_root: Option<PathBuf>,
}

impl CatalogConfig {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        backup_prefix: impl Into<String>,
        zip_password: impl Into<String>,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            backup_prefix: backup_prefix.into(),
            zip_password: zip_password.into(),
            verify_backups: true,
            retention: RetentionPolicy::simple(DEFAULT_MAX_BACKUPS),
            archive_timeout: Duration::from_secs(DEFAULT_ARCHIVE_TIMEOUT_SECS),
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            zip_program: PathBuf::from("zip"),
            unzip_program: PathBuf::from("unzip"),
            staging_root: None,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_verify_backups(mut self, enabled: bool) -> Self {
        self.verify_backups = enabled;
        self
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }
}

impl fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("backup_dir", &self.backup_dir)
            .field("backup_prefix", &self.backup_prefix)
            .field("zip_password", &"<redacted>")
            .field("verify_backups", &self.verify_backups)
            .field("retention", &self.retention)
            .field("archive_timeout", &self.archive_timeout)
            .field("verify_timeout", &self.verify_timeout)
            .field("zip_program", &self.zip_program)
            .field("unzip_program", &self.unzip_program)
            .field("staging_root", &self.staging_root)
            .finish()
    }
}

/// The value of a present, well-typed setting; a wrongly typed one is
/// reported and read as absent.
fn typed<'a, T>(
    name: &str,
    value: &'a Option<Setting<T>>,
    expected: &str,
    issues: &mut Vec<String>,
) -> Option<&'a T> {
    match value.as_ref()? {
        Setting::Valid(v) => Some(v),
        Setting::Invalid(raw) => {
            issues.push(format!("{} must be {}, got {}", name, expected, raw));
            None
        }
    }
}

/// Trimmed, non-empty string setting.
fn text<'a>(name: &str, value: &'a Option<Setting<String>>, issues: &mut Vec<String>) -> Option<&'a str> {
    typed(name, value, "a string", issues)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn valid_text(value: &Option<Setting<String>>) -> Option<&str> {
    match value {
        Some(Setting::Valid(v)) => Some(v.trim()).filter(|v| !v.is_empty()),
        _ => None,
    }
}

/// Report a required key as missing unless it was already reported as
/// wrongly typed.
fn missing<T>(name: &str, value: &Option<Setting<T>>, issues: &mut Vec<String>) {
    if !matches!(value, Some(Setting::Invalid(_))) {
        issues.push(format!("missing required key: {}", name));
    }
}

fn timeout(
    name: &str,
    value: &Option<Setting<u64>>,
    default: u64,
    issues: &mut Vec<String>,
) -> Duration {
    match typed(name, value, "a positive integer", issues) {
        Some(0) => {
            issues.push(format!("{} must be greater than zero", name));
            Duration::from_secs(default)
        }
        Some(&secs) => Duration::from_secs(secs),
        None => Duration::from_secs(default),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}
