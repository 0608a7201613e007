// Metadata Store - durable filename -> record mapping inside the backup directory

use super::types::{ArchiveRecord, BackupError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Name of the metadata document; dot-prefixed so archive scans skip it.
pub const METADATA_FILE_NAME: &str = ".backup_metadata.json";

/// Advisory store of archive records.
///
/// Callers serialize all mutating calls; the store does not guard against
/// concurrent writers.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All stored records. Never fails: unreadable metadata yields an empty map.
    async fn load(&self) -> BTreeMap<String, ArchiveRecord>;

    /// Insert or replace the record keyed by its filename.
    async fn save(&self, record: &ArchiveRecord) -> Result<(), BackupError>;

    /// Drop the record for `filename`, if any.
    async fn remove(&self, filename: &str) -> Result<(), BackupError>;
}

/// Single pretty-printed JSON object keyed by archive filename.
pub struct JsonMetadataStore {
    path: PathBuf,
}

impl JsonMetadataStore {
    /// Store at `<backup_dir>/.backup_metadata.json`.
    pub fn in_dir(backup_dir: &Path) -> Self {
        Self {
            path: backup_dir.join(METADATA_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&self, records: &BTreeMap<String, ArchiveRecord>) -> Result<(), BackupError> {
        let json = serde_json::to_string_pretty(records).map_err(|e| {
            BackupError::SerializationError(format!("Failed to serialize metadata: {}", e))
        })?;

        // Whole-document replace via rename so readers never see a torn file
        let tmp = self.path.with_file_name(format!("{}.tmp", METADATA_FILE_NAME));
        fs::write(&tmp, json)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to write metadata: {}", e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to replace metadata: {}", e)))
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn load(&self) -> BTreeMap<String, ArchiveRecord> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load metadata");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&json) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load metadata");
                BTreeMap::new()
            }
        }
    }

    async fn save(&self, record: &ArchiveRecord) -> Result<(), BackupError> {
        let mut records = self.load().await;
        records.insert(record.filename.clone(), record.clone());
        self.write_all(&records).await
    }

    async fn remove(&self, filename: &str) -> Result<(), BackupError> {
        let mut records = self.load().await;
        if records.remove(filename).is_some() {
            self.write_all(&records).await?;
        }
        Ok(())
    }
}
