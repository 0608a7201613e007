// Backup engine - encrypted archives, integrity checks and retention

pub mod archiver;
pub mod builder;
pub mod checksum;
pub mod manager;
pub mod retention;
pub mod storage;
pub mod types;
pub mod verifier;

pub use archiver::{ArchiveRequest, ArchiveTool, ToolOutcome, ZipCli};
pub use builder::{archive_filename, ArchiveBuilder};
pub use checksum::checksum;
pub use manager::BackupCatalog;
pub use retention::{select_for_deletion, sort_newest_first};
pub use storage::{JsonMetadataStore, MetadataStore, METADATA_FILE_NAME};
pub use types::{
    ArchiveRecord, BackupError, RetentionPolicy, RotationReport, SourceKind, TieredRetention,
    TIMESTAMP_FORMAT,
};
pub use verifier::IntegrityVerifier;
