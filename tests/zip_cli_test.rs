// Integration tests against the real Info-ZIP tools
// Each test returns early when `zip`/`unzip` are not installed.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use vault_backup::backup::{
    BackupCatalog, IntegrityVerifier, RetentionPolicy, SourceKind, ZipCli,
};
use vault_backup::config::CatalogConfig;

fn zip_tools_available() -> bool {
    let available = |program: &str| {
        Command::new(program)
            .arg("-h")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    };
    available("zip") && available("unzip")
}

fn list_entries(archive: &Path) -> Vec<String> {
    let out = Command::new("unzip")
        .args(["-Z1"])
        .arg(archive)
        .output()
        .expect("Failed to list archive");
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_real_zip_file_backup_round_trip() {
    if !zip_tools_available() {
        eprintln!("zip/unzip not installed, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("bitwarden_export.json");
    std::fs::write(&source, r#"{"encrypted": true, "items": []}"#).unwrap();

    let config = CatalogConfig::new(dir.path().join("backups"), "bitwarden_backup", "s3cret")
        .with_retention(RetentionPolicy::simple(3));
    let catalog = BackupCatalog::new(config).await.unwrap();

    let (path, record) = catalog.create(&source, SourceKind::File).await.unwrap();
    assert!(record.verified);
    assert_eq!(list_entries(&path), vec!["bitwarden_export.json".to_string()]);

    let verifier = IntegrityVerifier::new(Arc::new(ZipCli::new()));
    assert!(verifier.verify(&path, "s3cret").await.unwrap());
    assert!(!verifier.verify(&path, "not the password").await.unwrap());
}

#[tokio::test]
async fn test_real_zip_directory_backup_keeps_structure() {
    if !zip_tools_available() {
        eprintln!("zip/unzip not installed, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let vault = dir.path().join("vault");
    std::fs::create_dir_all(vault.join("notes")).unwrap();
    std::fs::write(vault.join("notes/today.md"), "# Today").unwrap();

    let config = CatalogConfig::new(dir.path().join("backups"), "obsidian_backup", "pw");
    let catalog = BackupCatalog::new(config).await.unwrap();

    let (path, record) = catalog.create(&vault, SourceKind::Directory).await.unwrap();
    assert!(record.verified);
    assert!(list_entries(&path).contains(&"vault/notes/today.md".to_string()));
}

#[tokio::test]
async fn test_real_unzip_rejects_garbage() {
    if !zip_tools_available() {
        eprintln!("zip/unzip not installed, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("vault_backup_2024-01-01-00-00-00.zip");
    std::fs::write(&bogus, b"definitely not a zip archive").unwrap();

    let verifier = IntegrityVerifier::new(Arc::new(ZipCli::new()));
    assert!(!verifier.verify(&bogus, "pw").await.unwrap());
}
