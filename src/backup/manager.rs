// Backup Catalog - create, list, inspect, verify and rotate archives
//
// Composes the builder, verifier, metadata store and retention engine. All
// mutating calls go through `write_lock`, which provides the single-writer
// discipline the metadata store relies on within one process. Runs from
// separate processes against the same directory must be serialized by the
// caller.

use super::archiver::{ArchiveTool, ZipCli};
use super::builder::ArchiveBuilder;
use super::retention::{select_for_deletion, sort_newest_first};
use super::storage::{JsonMetadataStore, MetadataStore};
use super::types::{ArchiveRecord, BackupError, RotationReport, SourceKind, TIMESTAMP_FORMAT};
use super::verifier::IntegrityVerifier;
use crate::config::CatalogConfig;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct BackupCatalog {
    config: CatalogConfig,
    builder: ArchiveBuilder,
    verifier: IntegrityVerifier,
    store: Box<dyn MetadataStore>,
    archive_name: Regex,
    write_lock: Mutex<()>,
}

impl BackupCatalog {
    /// Catalog driving the configured `zip`/`unzip` programs.
    pub async fn new(config: CatalogConfig) -> Result<Self, BackupError> {
        let tool = ZipCli::new()
            .with_programs(&config.zip_program, &config.unzip_program)
            .with_timeouts(config.archive_timeout, config.verify_timeout);
        Self::with_tool(config, Arc::new(tool)).await
    }

    /// Catalog driving an arbitrary archive tool.
    pub async fn with_tool(
        mut config: CatalogConfig,
        tool: Arc<dyn ArchiveTool>,
    ) -> Result<Self, BackupError> {
        fs::create_dir_all(&config.backup_dir).await.map_err(|e| {
            BackupError::IoError(format!(
                "Failed to create backup directory {}: {}",
                config.backup_dir.display(),
                e
            ))
        })?;
        // Records carry absolute archive paths
        if config.backup_dir.is_relative() {
            config.backup_dir = fs::canonicalize(&config.backup_dir).await.map_err(|e| {
                BackupError::IoError(format!(
                    "Failed to resolve backup directory {}: {}",
                    config.backup_dir.display(),
                    e
                ))
            })?;
        }

        let mut builder = ArchiveBuilder::new(tool.clone());
        if let Some(root) = &config.staging_root {
            builder = builder.with_staging_root(root);
        }
        let archive_name = Regex::new(&format!(
            r"^{}_(\d{{4}}-\d{{2}}-\d{{2}}-\d{{2}}-\d{{2}}-\d{{2}})\.zip$",
            regex::escape(&config.backup_prefix)
        ))
        .map_err(|e| BackupError::IoError(format!("Invalid backup prefix: {}", e)))?;

        Ok(Self {
            store: Box::new(JsonMetadataStore::in_dir(&config.backup_dir)),
            verifier: IntegrityVerifier::new(tool),
            builder,
            archive_name,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Replace the metadata store.
    pub fn with_store(mut self, store: Box<dyn MetadataStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Build, optionally verify, and record one archive of `source`.
    ///
    /// If the testing tool cannot be launched the archive is recorded as
    /// unverified before the error is returned.
    pub async fn create(
        &self,
        source: &Path,
        kind: SourceKind,
    ) -> Result<(PathBuf, ArchiveRecord), BackupError> {
        let _guard = self.write_lock.lock().await;

        info!(source = %source.display(), ?kind, "Creating backup");
        let (path, mut record) = self
            .builder
            .build(
                source,
                kind,
                &self.config.backup_prefix,
                &self.config.zip_password,
                &self.config.backup_dir,
            )
            .await?;

        if self.config.verify_backups {
            record.verified = match self.verifier.verify(&path, &self.config.zip_password).await {
                Ok(verified) => verified,
                Err(e) => {
                    // The archive is on disk; keep its checksum on record
                    self.store.save(&record).await?;
                    return Err(e);
                }
            };
            if record.verified {
                info!(filename = %record.filename, "Backup verified successfully");
            } else {
                warn!(filename = %record.filename, "Backup verification failed, keeping it as unverified");
            }
        }

        self.store.save(&record).await?;
        Ok((path, record))
    }

    /// Create a backup of `source`, then rotate.
    pub async fn run(
        &self,
        source: &Path,
        kind: SourceKind,
    ) -> Result<(ArchiveRecord, RotationReport), BackupError> {
        let (_, record) = self.create(source, kind).await?;
        let report = self.rotate().await?;
        Ok((record, report))
    }

    /// Archives currently on storage, newest first.
    ///
    /// Stored records are reconciled against the directory: vanished archives
    /// are dropped, untracked archives get a synthesized record, and sizes are
    /// refreshed. Nothing is written back.
    pub async fn list(&self) -> Result<Vec<ArchiveRecord>, BackupError> {
        let stored = self.store.load().await;
        let dir = &self.config.backup_dir;

        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            BackupError::IoError(format!("Failed to read backup directory {}: {}", dir.display(), e))
        })?;

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            BackupError::IoError(format!("Failed to read directory entry: {}", e))
        })? {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(timestamp) = self.timestamp_of(&filename) else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Removed between read_dir and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(BackupError::IoError(format!(
                        "Failed to stat {}: {}",
                        filename, e
                    )))
                }
            };

            let path = entry.path();
            let record = match stored.get(&filename) {
                Some(record) => {
                    let mut record = record.clone();
                    if record.size != meta.len() {
                        debug!(filename = %filename, old = record.size, new = meta.len(), "archive size changed");
                        record.size = meta.len();
                    }
                    record.path = path;
                    record
                }
                None => {
                    let modified: DateTime<Utc> = meta
                        .modified()
                        .map(DateTime::from)
                        .unwrap_or_else(|_| timestamp_instant(&timestamp));
                    debug!(filename = %filename, "synthesizing record for untracked archive");
                    ArchiveRecord {
                        filename: filename.clone(),
                        path,
                        timestamp,
                        created_at: modified.to_rfc3339(),
                        size: meta.len(),
                        checksum: None,
                        verified: false,
                    }
                }
            };
            backups.push(record);
        }

        sort_newest_first(&mut backups);
        Ok(backups)
    }

    /// Reconciled record for `filename`, if that archive exists.
    pub async fn info(&self, filename: &str) -> Result<Option<ArchiveRecord>, BackupError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|record| record.filename == filename))
    }

    /// Test every listed archive. Stored `verified` flags are left untouched.
    pub async fn verify_all(&self) -> Result<BTreeMap<String, bool>, BackupError> {
        let mut results = BTreeMap::new();
        for record in self.list().await? {
            let ok = self
                .verifier
                .verify(&record.path, &self.config.zip_password)
                .await?;
            results.insert(record.filename, ok);
        }
        Ok(results)
    }

    /// Apply the retention policy to the archives on storage.
    pub async fn rotate(&self) -> Result<RotationReport, BackupError> {
        self.rotate_at(Utc::now()).await
    }

    /// [`rotate`](Self::rotate) with an explicit notion of "now".
    pub async fn rotate_at(&self, now: DateTime<Utc>) -> Result<RotationReport, BackupError> {
        let _guard = self.write_lock.lock().await;

        let backups = self.list().await?;
        let doomed = select_for_deletion(&backups, &self.config.retention, now);
        let total = backups.len();

        let selected: Vec<_> = backups
            .into_iter()
            .filter(|record| doomed.contains(&record.filename))
            .collect();
        let mut report = self.delete_archives(selected).await;
        report.retained = total - report.deleted.len();
        report.orphans_pruned = self.prune_orphans().await?;

        if report.deleted.is_empty() {
            info!("No old backups to delete");
        }
        Ok(report)
    }

    /// Remove each archive, then its metadata entry. A failure affects only
    /// that archive.
    async fn delete_archives(&self, selected: Vec<ArchiveRecord>) -> RotationReport {
        let mut report = RotationReport::default();
        for record in selected {
            match fs::remove_file(&record.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(filename = %record.filename, "archive already gone");
                }
                Err(e) => {
                    warn!(filename = %record.filename, error = %e, "Failed to delete old backup");
                    report.failed.push(record.filename);
                    continue;
                }
            }

            if let Err(e) = self.store.remove(&record.filename).await {
                // The file is gone; the stale entry is retried as an orphan
                warn!(filename = %record.filename, error = %e, "Failed to remove backup metadata");
            }
            info!(filename = %record.filename, "Deleted old backup");
            report.deleted.push(record.filename);
        }
        report
    }

    /// Drop stored records whose archive no longer exists.
    async fn prune_orphans(&self) -> Result<usize, BackupError> {
        let mut pruned = 0;
        for (filename, record) in self.store.load().await {
            let path = self.config.backup_dir.join(&filename);
            if fs::try_exists(&path).await.unwrap_or(true) {
                continue;
            }
            debug!(filename = %filename, stored_path = %record.path.display(), "pruning orphan metadata");
            self.store.remove(&filename).await?;
            pruned += 1;
        }
        Ok(pruned)
    }

    /// Timestamp embedded in `filename` if it follows this catalog's naming
    /// convention.
    fn timestamp_of(&self, filename: &str) -> Option<String> {
        let captures = self.archive_name.captures(filename)?;
        let timestamp = captures.get(1)?.as_str();
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(timestamp.to_string())
    }
}

fn timestamp_instant(timestamp: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}
