// External archive tools - encrypting-archive and archive-testing capabilities
//
// The engine never implements encryption itself: it drives an external
// archiver (Info-ZIP `zip`/`unzip` by default) behind the `ArchiveTool` seam.

use super::types::BackupError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Input to the encrypting-archive capability.
#[derive(Debug, Clone)]
pub struct ArchiveRequest<'a> {
    pub password: &'a str,
    /// Working directory the entries are relative to
    pub working_dir: &'a Path,
    pub entries: Vec<PathBuf>,
    pub output: &'a Path,
    /// Recurse into directories and keep their structure; otherwise store
    /// entries flat
    pub recursive: bool,
}

/// How an external tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Succeeded,
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },
    TimedOut(Duration),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Human-readable reason for a non-successful outcome.
    pub fn describe(&self) -> String {
        match self {
            Self::Succeeded => "succeeded".to_string(),
            Self::Failed { code, diagnostics } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                format!("exit status {}: {}", code, diagnostics.trim())
            }
            Self::TimedOut(limit) => format!("timed out after {}s", limit.as_secs()),
        }
    }
}

/// External encrypting-archive and archive-testing capabilities.
///
/// `Err` is reserved for tools that cannot be launched at all; a tool that
/// runs and fails reports it through [`ToolOutcome`].
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    async fn create(&self, request: &ArchiveRequest<'_>) -> Result<ToolOutcome, BackupError>;

    async fn test(&self, archive: &Path, password: &str) -> Result<ToolOutcome, BackupError>;
}

/// Info-ZIP command-line tools.
#[derive(Debug, Clone)]
pub struct ZipCli {
    zip_program: PathBuf,
    unzip_program: PathBuf,
    create_timeout: Duration,
    test_timeout: Duration,
}

impl ZipCli {
    pub fn new() -> Self {
        Self {
            zip_program: PathBuf::from("zip"),
            unzip_program: PathBuf::from("unzip"),
            create_timeout: Duration::from_secs(600),
            test_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_programs(mut self, zip: impl Into<PathBuf>, unzip: impl Into<PathBuf>) -> Self {
        self.zip_program = zip.into();
        self.unzip_program = unzip.into();
        self
    }

    pub fn with_timeouts(mut self, create: Duration, test: Duration) -> Self {
        self.create_timeout = create;
        self.test_timeout = test;
        self
    }

    async fn run(&self, mut command: Command, limit: Duration) -> Result<ToolOutcome, BackupError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = format!("{:?}", command.as_std().get_program());
        let child = command
            .spawn()
            .map_err(|e| BackupError::IoError(format!("Failed to launch {}: {}", program, e)))?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output
                .map_err(|e| BackupError::IoError(format!("Failed to wait for {}: {}", program, e)))?,
            Err(_) => return Ok(ToolOutcome::TimedOut(limit)),
        };

        debug!(program = %program, status = ?output.status, "archive tool finished");
        if output.status.success() {
            return Ok(ToolOutcome::Succeeded);
        }

        let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if diagnostics.trim().is_empty() {
            diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        Ok(ToolOutcome::Failed {
            code: output.status.code(),
            diagnostics,
        })
    }
}

impl Default for ZipCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveTool for ZipCli {
    async fn create(&self, request: &ArchiveRequest<'_>) -> Result<ToolOutcome, BackupError> {
        let mut command = Command::new(&self.zip_program);
        command
            .current_dir(request.working_dir)
            .arg("-q")
            .arg("-P")
            .arg(request.password)
            .arg("-r");
        if !request.recursive {
            command.arg("-j");
        }
        command.arg(request.output).args(&request.entries);

        self.run(command, self.create_timeout).await
    }

    async fn test(&self, archive: &Path, password: &str) -> Result<ToolOutcome, BackupError> {
        let mut command = Command::new(&self.unzip_program);
        command.arg("-t").arg("-q").arg("-P").arg(password).arg(archive);

        self.run(command, self.test_timeout).await
    }
}
