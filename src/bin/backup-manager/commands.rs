//! Subcommand implementations

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::Path;
use std::process::ExitCode;
use vault_backup::backup::{ArchiveRecord, BackupCatalog, RotationReport, SourceKind};

pub async fn list(catalog: &BackupCatalog) -> Result<ExitCode> {
    let backups = catalog.list().await.context("Failed to list backups")?;
    if backups.is_empty() {
        println!("No backups found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("\nFound {} backup(s):\n", backups.len());
    println!("{:<50} {:<12} {:<20} {:<8}", "Filename", "Size", "Created", "Verified");
    println!("{}", "-".repeat(90));
    for backup in &backups {
        println!(
            "{:<50} {:<12} {:<20} {:<8}",
            backup.filename,
            format_size(backup.size),
            created_display(backup),
            if backup.verified { "✓" } else { "✗" }
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn info(catalog: &BackupCatalog, filename: &str) -> Result<ExitCode> {
    let Some(info) = catalog.info(filename).await.context("Failed to read backup info")? else {
        println!("Backup not found: {}", filename);
        return Ok(ExitCode::FAILURE);
    };

    println!("\nBackup Information: {}\n", filename);
    println!("  Path:       {}", info.path.display());
    println!("  Size:       {}", format_size(info.size));
    println!("  Created:    {}", info.created_at);
    println!("  Timestamp:  {}", info.timestamp);
    println!(
        "  Checksum:   {}",
        info.checksum.as_deref().unwrap_or("Not calculated")
    );
    println!("  Verified:   {}", if info.verified { "Yes" } else { "No" });
    Ok(ExitCode::SUCCESS)
}

pub async fn verify(catalog: &BackupCatalog) -> Result<ExitCode> {
    println!("Verifying backups...");
    let results = catalog.verify_all().await.context("Failed to verify backups")?;
    let valid = results.values().filter(|ok| **ok).count();

    println!("\nVerification Results: {}/{} backups verified\n", valid, results.len());
    for (filename, ok) in &results {
        let status = if *ok { "✓ Valid" } else { "✗ Invalid" };
        println!("  {:<50} {}", filename, status);
    }

    Ok(if valid < results.len() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

pub async fn rotate(catalog: &BackupCatalog) -> Result<ExitCode> {
    let report = catalog.rotate().await.context("Failed to rotate backups")?;
    print_report(&report);
    Ok(ExitCode::SUCCESS)
}

pub async fn create(catalog: &BackupCatalog, source: &Path, directory: bool) -> Result<ExitCode> {
    let kind = if directory || source.is_dir() {
        SourceKind::Directory
    } else {
        SourceKind::File
    };

    let (record, report) = catalog
        .run(source, kind)
        .await
        .with_context(|| format!("Backup of {} failed", source.display()))?;

    let checksum = record.checksum.as_deref().unwrap_or("");
    println!(
        "Backup created: {} ({}, checksum: {}...)",
        record.filename,
        format_size(record.size),
        &checksum[..checksum.len().min(16)]
    );
    if catalog.config().verify_backups && !record.verified {
        println!("Warning: backup could not be verified");
    }
    print_report(&report);
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RotationReport) {
    if report.deleted.is_empty() {
        println!("No old backups to delete.");
    }
    for filename in &report.deleted {
        println!("Deleted old backup: {}", filename);
    }
    for filename in &report.failed {
        println!("Could not delete: {}", filename);
    }
    println!("{} backup(s) retained.", report.retained);
}

fn created_display(record: &ArchiveRecord) -> String {
    record
        .created_at()
        .map(|created| {
            DateTime::<Local>::from(created)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Human-readable size using 1024-based units.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(1024u64.pow(5) * 3), "3.00 PB");
    }
}
