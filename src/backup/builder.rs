// Archive Builder - stages a source and drives the external archiver

use super::archiver::{ArchiveRequest, ArchiveTool};
use super::checksum::checksum;
use super::types::{ArchiveRecord, BackupError, SourceKind, TIMESTAMP_FORMAT};
use chrono::{Local, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Archive filename for `prefix` at `timestamp`.
pub fn archive_filename(prefix: &str, timestamp: &str) -> String {
    format!("{}_{}.zip", prefix, timestamp)
}

pub struct ArchiveBuilder {
    tool: Arc<dyn ArchiveTool>,
    staging_root: Option<PathBuf>,
}

impl ArchiveBuilder {
    pub fn new(tool: Arc<dyn ArchiveTool>) -> Self {
        Self {
            tool,
            staging_root: None,
        }
    }

    /// Create staging directories under `root` instead of the system temp dir.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// Build one encrypted archive of `source` in `destination_dir`.
    ///
    /// The archive is written inside the staging directory and moved into
    /// place only once the archiver succeeds, so a failed build never
    /// disturbs an existing archive of the same name. The returned record is
    /// not persisted and has `verified = false`.
    pub async fn build(
        &self,
        source: &Path,
        kind: SourceKind,
        prefix: &str,
        password: &str,
        destination_dir: &Path,
    ) -> Result<(PathBuf, ArchiveRecord), BackupError> {
        let started = Utc::now();
        let timestamp = started.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string();
        let filename = archive_filename(prefix, &timestamp);
        let archive_path = destination_dir.join(&filename);

        check_source(source, kind).await?;

        // Removed on drop, whichever way this function returns
        let staging = self.staging_dir()?;
        debug!(staging = %staging.path().display(), "staging backup source");
        // The archiver runs inside `content_dir`, so its output path must be absolute
        let staging_path = fs::canonicalize(staging.path()).await.map_err(|e| {
            BackupError::IoError(format!("Failed to resolve staging directory: {}", e))
        })?;
        let content_dir = staging_path.join("content");
        let output_dir = staging_path.join("output");
        for dir in [&content_dir, &output_dir] {
            fs::create_dir(dir).await.map_err(|e| {
                BackupError::IoError(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let entry_name = source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("source"));
        let staged = content_dir.join(&entry_name);
        match kind {
            SourceKind::File => {
                fs::copy(source, &staged).await.map_err(|e| {
                    BackupError::IoError(format!(
                        "Failed to stage {}: {}",
                        source.display(),
                        e
                    ))
                })?;
            }
            SourceKind::Directory => copy_tree(source, &staged).await?,
        }

        let staged_archive = output_dir.join(&filename);
        let request = ArchiveRequest {
            password,
            working_dir: &content_dir,
            entries: vec![entry_name],
            output: &staged_archive,
            recursive: kind == SourceKind::Directory,
        };

        let outcome = self
            .tool
            .create(&request)
            .await
            .map_err(|e| BackupError::ArchiveCreationError(e.to_string()))?;
        if !outcome.is_success() {
            return Err(BackupError::ArchiveCreationError(format!(
                "Failed to create encrypted backup: {}",
                outcome.describe()
            )));
        }

        let size = match fs::metadata(&staged_archive).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BackupError::ArchiveCreationError(format!(
                    "Archiver reported success but produced no output for {}",
                    filename
                )));
            }
            Err(e) => {
                return Err(BackupError::IoError(format!(
                    "Failed to stat {}: {}",
                    staged_archive.display(),
                    e
                )))
            }
        };
        let digest = checksum(&staged_archive).await?;

        publish(&staged_archive, &archive_path).await?;
        drop(staging);

        info!(filename = %filename, size = size, "Encrypted backup created");

        let record = ArchiveRecord {
            filename,
            path: archive_path.clone(),
            timestamp,
            created_at: started.to_rfc3339(),
            size,
            checksum: Some(digest),
            verified: false,
        };
        Ok((archive_path, record))
    }

    fn staging_dir(&self) -> Result<tempfile::TempDir, BackupError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("backup-");
        let created = match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        created.map_err(|e| BackupError::IoError(format!("Failed to create staging directory: {}", e)))
    }
}

async fn check_source(source: &Path, kind: SourceKind) -> Result<(), BackupError> {
    let meta = fs::metadata(source).await.map_err(|e| {
        BackupError::IoError(format!("Source {} is not accessible: {}", source.display(), e))
    })?;
    match kind {
        SourceKind::File if !meta.is_file() => Err(BackupError::IoError(format!(
            "Source {} is not a file",
            source.display()
        ))),
        SourceKind::Directory if !meta.is_dir() => Err(BackupError::IoError(format!(
            "Source {} is not a directory",
            source.display()
        ))),
        _ => Ok(()),
    }
}

/// Recursively copy `from` into `to`, following symlinks.
async fn copy_tree(from: &Path, to: &Path) -> Result<(), BackupError> {
    let io_err = |what: &str, path: &Path, e: std::io::Error| {
        BackupError::IoError(format!("Failed to {} {}: {}", what, path.display(), e))
    };

    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src_dir, dst_dir)) = pending.pop() {
        fs::create_dir_all(&dst_dir)
            .await
            .map_err(|e| io_err("create", &dst_dir, e))?;

        let mut entries = fs::read_dir(&src_dir)
            .await
            .map_err(|e| io_err("read directory", &src_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err("read directory", &src_dir, e))?
        {
            let src = entry.path();
            let dst = dst_dir.join(entry.file_name());
            let meta = fs::metadata(&src).await.map_err(|e| io_err("stat", &src, e))?;
            if meta.is_dir() {
                pending.push((src, dst));
            } else if meta.is_file() {
                fs::copy(&src, &dst).await.map_err(|e| io_err("copy", &src, e))?;
            } else {
                debug!(path = %src.display(), "skipping special file");
            }
        }
    }
    Ok(())
}

/// Move a finished archive to `destination`, replacing an archive of the same
/// name (same-second collision: last successful write wins).
async fn publish(staged: &Path, destination: &Path) -> Result<(), BackupError> {
    if fs::try_exists(destination).await.unwrap_or(false) {
        warn!(path = %destination.display(), "Replacing archive with the same timestamp");
    }
    if fs::rename(staged, destination).await.is_ok() {
        return Ok(());
    }

    // Staging may live on another file system: copy next to the destination,
    // then rename within the backup directory
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = destination.with_file_name(format!(".{}.partial", name));
    let moved = match fs::copy(staged, &partial).await {
        Ok(_) => fs::rename(&partial, destination).await,
        Err(e) => Err(e),
    };
    if let Err(e) = moved {
        discard_partial(&partial).await;
        return Err(BackupError::IoError(format!(
            "Failed to move archive to {}: {}",
            destination.display(),
            e
        )));
    }
    Ok(())
}

async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial archive"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial archive"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archiver::ToolOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records requests and writes a listing of the staged entries as the "archive".
    #[derive(Default)]
    struct ListingTool {
        /// Outcome to report; success when `None`
        outcome: Option<ToolOutcome>,
        seen: Mutex<Vec<(Vec<PathBuf>, bool)>>,
    }

    #[async_trait]
    impl ArchiveTool for ListingTool {
        async fn create(&self, request: &ArchiveRequest<'_>) -> Result<ToolOutcome, BackupError> {
            let mut listing = Vec::new();
            for entry in &request.entries {
                collect(&request.working_dir.join(entry), request.working_dir, &mut listing);
            }
            listing.sort();
            std::fs::write(request.output, listing.join("\n")).unwrap();
            self.seen
                .lock()
                .unwrap()
                .push((request.entries.clone(), request.recursive));
            Ok(self.outcome.clone().unwrap_or(ToolOutcome::Succeeded))
        }

        async fn test(&self, _archive: &Path, _password: &str) -> Result<ToolOutcome, BackupError> {
            Ok(ToolOutcome::Succeeded)
        }
    }

    fn collect(path: &Path, base: &Path, out: &mut Vec<String>) {
        if path.is_dir() {
            for entry in std::fs::read_dir(path).unwrap() {
                collect(&entry.unwrap().path(), base, out);
            }
        } else {
            out.push(path.strip_prefix(base).unwrap().display().to_string());
        }
    }

    fn failing_tool() -> ListingTool {
        ListingTool {
            outcome: Some(ToolOutcome::Failed {
                code: Some(15),
                diagnostics: "zip I/O error: disk full".to_string(),
            }),
            ..Default::default()
        }
    }

    /// Archives named for every second around now, so a build collides with
    /// one of them whatever second it starts in.
    fn occupy_nearby_names(dest: &Path, prefix: &str) -> Vec<PathBuf> {
        (-1..=3)
            .map(|offset| {
                let ts = (Local::now() + chrono::Duration::seconds(offset)).format(TIMESTAMP_FORMAT);
                let path = dest.join(archive_filename(prefix, &ts.to_string()));
                std::fs::write(&path, b"previous archive").unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn file_source_builds_flat_archive_and_record() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("export.json");
        std::fs::write(&source, b"{\"items\": []}").unwrap();
        let dest = root.path().join("backups");
        std::fs::create_dir(&dest).unwrap();
        let staging = root.path().join("staging");
        std::fs::create_dir(&staging).unwrap();

        let tool = Arc::new(ListingTool::default());
        let builder = ArchiveBuilder::new(tool.clone()).with_staging_root(&staging);
        let (path, record) = builder
            .build(&source, SourceKind::File, "bitwarden_backup", "pw", &dest)
            .await
            .unwrap();

        assert_eq!(path, dest.join(&record.filename));
        assert!(record.filename.starts_with("bitwarden_backup_"));
        assert!(record.filename.ends_with(".zip"));
        assert_eq!(record.filename, archive_filename("bitwarden_backup", &record.timestamp));
        assert_eq!(record.size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(record.checksum, Some(checksum(&path).await.unwrap()));
        assert!(!record.verified);
        assert!(record.created_at().is_some());

        let seen = tool.seen.lock().unwrap();
        assert_eq!(seen[0], (vec![PathBuf::from("export.json")], false));
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn directory_source_preserves_structure() {
        let root = tempfile::tempdir().unwrap();
        let vault = root.path().join("vault");
        std::fs::create_dir_all(vault.join("notes/daily")).unwrap();
        std::fs::write(vault.join("index.md"), b"# index").unwrap();
        std::fs::write(vault.join("notes/daily/2024-01-01.md"), b"entry").unwrap();
        let dest = root.path().join("backups");
        std::fs::create_dir(&dest).unwrap();

        let tool = Arc::new(ListingTool::default());
        let builder = ArchiveBuilder::new(tool.clone());
        let (path, _) = builder
            .build(&vault, SourceKind::Directory, "obsidian_backup", "pw", &dest)
            .await
            .unwrap();

        let listing = std::fs::read_to_string(path).unwrap();
        assert_eq!(listing, "vault/index.md\nvault/notes/daily/2024-01-01.md");
        assert!(tool.seen.lock().unwrap()[0].1);
    }

    #[tokio::test]
    async fn failed_archiver_leaves_no_staging_and_no_archive() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("export.json");
        std::fs::write(&source, b"secret plaintext").unwrap();
        let dest = root.path().join("backups");
        std::fs::create_dir(&dest).unwrap();
        let staging = root.path().join("staging");
        std::fs::create_dir(&staging).unwrap();

        let tool = Arc::new(failing_tool());
        let builder = ArchiveBuilder::new(tool).with_staging_root(&staging);
        let err = builder
            .build(&source, SourceKind::File, "bitwarden_backup", "pw", &dest)
            .await
            .unwrap_err();

        match err {
            BackupError::ArchiveCreationError(msg) => assert!(msg.contains("disk full")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn mismatched_source_kind_fails_before_archiving() {
        let root = tempfile::tempdir().unwrap();
        let tool = Arc::new(ListingTool::default());
        let builder = ArchiveBuilder::new(tool.clone());

        let err = builder
            .build(root.path(), SourceKind::File, "b", "pw", root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::IoError(_)));

        let err = builder
            .build(&root.path().join("missing"), SourceKind::Directory, "b", "pw", root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::IoError(_)));
        assert!(tool.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timed_out_archiver_is_creation_error_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("export.json");
        std::fs::write(&source, b"secret plaintext").unwrap();
        let dest = root.path().join("backups");
        std::fs::create_dir(&dest).unwrap();
        let staging = root.path().join("staging");
        std::fs::create_dir(&staging).unwrap();

        let tool = Arc::new(ListingTool {
            outcome: Some(ToolOutcome::TimedOut(std::time::Duration::from_secs(600))),
            ..Default::default()
        });
        let builder = ArchiveBuilder::new(tool).with_staging_root(&staging);
        let err = builder
            .build(&source, SourceKind::File, "bitwarden_backup", "pw", &dest)
            .await
            .unwrap_err();

        match err {
            BackupError::ArchiveCreationError(msg) => assert!(msg.contains("timed out after 600s")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_archive_of_same_second() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("export.json");
        std::fs::write(&source, b"secret plaintext").unwrap();
        let dest = root.path().join("backups");
        std::fs::create_dir(&dest).unwrap();
        let existing = occupy_nearby_names(&dest, "bitwarden_backup");

        let builder = ArchiveBuilder::new(Arc::new(failing_tool()));
        let err = builder
            .build(&source, SourceKind::File, "bitwarden_backup", "pw", &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ArchiveCreationError(_)));
        for path in &existing {
            assert_eq!(std::fs::read(path).unwrap(), b"previous archive");
        }
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), existing.len());
    }

    #[tokio::test]
    async fn successful_rebuild_replaces_archive_of_same_second() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("export.json");
        std::fs::write(&source, b"secret plaintext").unwrap();
        let dest = root.path().join("backups");
        std::fs::create_dir(&dest).unwrap();
        let existing = occupy_nearby_names(&dest, "bitwarden_backup");

        let builder = ArchiveBuilder::new(Arc::new(ListingTool::default()));
        let (path, record) = builder
            .build(&source, SourceKind::File, "bitwarden_backup", "pw", &dest)
            .await
            .unwrap();

        assert!(existing.contains(&path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "export.json");
        assert_eq!(record.checksum, Some(checksum(&path).await.unwrap()));
        // Replaced in place, no stray partial files
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), existing.len());
    }
}
