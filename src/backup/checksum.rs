// Archive checksums - streaming SHA-256 over the archive bytes

use super::types::BackupError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 4096;

/// SHA-256 hex digest of the file at `path`, read in 4 KiB chunks.
pub async fn checksum(path: &Path) -> Result<String, BackupError> {
    let mut file = fs::File::open(path).await.map_err(|e| {
        BackupError::IoError(format!("Failed to open {} for checksum: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(|e| {
            BackupError::IoError(format!("Failed to read {} for checksum: {}", path.display(), e))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
