//! # Vault Backup
//!
//! Turns a data source (a password-vault export or a directory tree) into
//! timestamped, password-encrypted, checksummed archives, verifies them, and
//! prunes old archives under a retention policy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vault_backup::backup::{BackupCatalog, RetentionPolicy, SourceKind, TieredRetention};
//! use vault_backup::config::CatalogConfig;
//! use std::path::Path;
//!
//! # async fn example() -> vault_backup::Result<()> {
//! let config = CatalogConfig::new("/var/backups/vault", "bitwarden_backup", "zip-password")
//!     .with_retention(RetentionPolicy::tiered(7, TieredRetention::new(7, 4, 12)));
//! let catalog = BackupCatalog::new(config).await?;
//!
//! let (record, report) = catalog
//!     .run(Path::new("/tmp/export.json"), SourceKind::File)
//!     .await?;
//! println!("created {} ({} bytes), pruned {}", record.filename, record.size, report.deleted.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! - **External encryption**: archives are produced and tested by an external
//!   tool (Info-ZIP by default) behind the [`backup::ArchiveTool`] trait
//! - **Scoped staging**: plaintext copies live in a temporary directory that
//!   is removed on every exit path
//! - **Advisory metadata**: a hidden JSON document records size, checksum and
//!   verification state; the archives on disk stay the ground truth
//! - **Tiered retention**: daily, weekly and monthly buckets with a
//!   `max_backups` floor, or plain "keep the newest N"
//!
//! ## Modules
//!
//! - [`backup`]: archive creation, verification, metadata and retention
//! - [`config`]: configuration loading and validation
//! - [`logging`]: subscriber setup for binaries

#![warn(rustdoc::missing_crate_level_docs)]

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;

pub use backup::BackupError;

/// Archive creation, verification, metadata and retention
pub mod backup;

/// Configuration loading and validation
pub mod config;

/// Logging setup
pub mod logging;
