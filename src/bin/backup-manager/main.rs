//! Backup Manager CLI - create, inspect, verify and rotate encrypted backups

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use vault_backup::backup::BackupCatalog;
use vault_backup::config::{RawConfig, Setting};

mod commands;

#[derive(Parser)]
#[command(name = "backup-manager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration JSON file
    #[arg(short, long, env = "BACKUP_CONFIG")]
    config: PathBuf,

    /// Kind of backup; selects the archive prefix when the config has none
    #[arg(short = 't', long = "type")]
    kind: Option<BackupKind>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackupKind {
    Bitwarden,
    Obsidian,
}

impl BackupKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Bitwarden => "bitwarden_backup",
            Self::Obsidian => "obsidian_backup",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List all backups, newest first
    List,

    /// Show detailed information about one backup
    Info {
        /// Backup filename
        filename: String,
    },

    /// Verify the integrity of every backup
    Verify,

    /// Delete backups outside the retention policy
    Rotate,

    /// Back up a file or directory, then rotate
    Create {
        /// Source to back up (defaults to `source_path` from the config)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Treat the source as a directory tree
        #[arg(short, long)]
        directory: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut raw = RawConfig::from_file(&cli.config)?;
    if raw.backup_prefix.is_none() {
        raw.backup_prefix = cli.kind.map(|kind| Setting::Valid(kind.prefix().to_string()));
    }

    let log_level = if cli.verbose { "debug" } else { "info" };
    vault_backup::logging::init(log_level, raw.log_file().as_deref())
        .context("Failed to initialize logging")?;

    let mut config = raw.validate()?;
    if !matches!(cli.command, Commands::Create { .. }) {
        // Inspection commands never block on a post-create check
        config.verify_backups = false;
    }
    let catalog = BackupCatalog::new(config)
        .await
        .context("Failed to open backup directory")?;

    match cli.command {
        Commands::List => commands::list(&catalog).await,
        Commands::Info { filename } => commands::info(&catalog, &filename).await,
        Commands::Verify => commands::verify(&catalog).await,
        Commands::Rotate => commands::rotate(&catalog).await,
        Commands::Create { source, directory } => {
            let source = source
                .or_else(|| raw.source_path())
                .context("No source given: pass --source or set source_path in the config")?;
            commands::create(&catalog, &source, directory).await
        }
    }
}
