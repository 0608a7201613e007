// Integrity Verifier - asks the archive-testing tool whether an archive opens

use super::archiver::ArchiveTool;
use super::types::BackupError;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error};

pub struct IntegrityVerifier {
    tool: Arc<dyn ArchiveTool>,
}

impl IntegrityVerifier {
    pub fn new(tool: Arc<dyn ArchiveTool>) -> Self {
        Self { tool }
    }

    /// `Ok(false)` for a missing, corrupt, or wrongly-keyed archive; `Err`
    /// only when the testing tool cannot be launched.
    pub async fn verify(&self, archive: &Path, password: &str) -> Result<bool, BackupError> {
        if !fs::try_exists(archive).await.unwrap_or(false) {
            error!(path = %archive.display(), "Backup file does not exist");
            return Ok(false);
        }

        let outcome = self.tool.test(archive, password).await?;
        if outcome.is_success() {
            debug!(path = %archive.display(), "archive integrity check passed");
            Ok(true)
        } else {
            error!(
                path = %archive.display(),
                reason = %outcome.describe(),
                "ZIP integrity check failed"
            );
            Ok(false)
        }
    }
}
