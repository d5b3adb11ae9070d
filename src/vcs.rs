//! Version-control gateway for the backup history.
//!
//! Git runs as a subprocess with prompts disabled and a hard timeout, so an
//! unreachable or credential-hungry remote degrades into a reported failure
//! instead of a hung cycle. The trait exists so the export pipeline can be
//! tested against a scripted double.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::BackupConfig;
use crate::error::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The index matched HEAD; nothing to record.
    NothingToCommit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote has commits we do not. Carries git's explanation.
    Rejected(String),
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    fn is_repo(&self) -> bool;
    async fn status_changed(&self, path: &Path) -> Result<bool, VaultError>;
    async fn add(&self, path: &Path) -> Result<(), VaultError>;
    async fn commit(&self, message: &str) -> Result<CommitOutcome, VaultError>;
    async fn push(&self) -> Result<PushOutcome, VaultError>;
    async fn pull_rebase(&self) -> Result<(), VaultError>;
}

pub struct GitGateway {
    repo_root: PathBuf,
    remote: String,
    branch: String,
    timeout: Duration,
}

impl GitGateway {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            repo_root: config.repo_root.clone(),
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, VaultError> {
        debug!(args = ?args, "running git");
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.repo_root)
            .env("GIT_TERMINAL_PROMPT", "0");
        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(VaultError::Backup(format!(
                "failed to run 'git {}': {}",
                args.join(" "),
                e
            ))),
            Err(_) => Err(VaultError::Backup(format!(
                "'git {}' timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            ))),
        }
    }

    fn combined_output(output: &Output) -> String {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        text
    }
}

#[async_trait]
impl VersionControl for GitGateway {
    fn is_repo(&self) -> bool {
        self.repo_root.join(".git").exists()
    }

    async fn status_changed(&self, path: &Path) -> Result<bool, VaultError> {
        let path = path.to_string_lossy();
        let output = self.run(&["status", "--porcelain", "--", &path]).await?;
        if !output.status.success() {
            return Err(VaultError::Backup(format!(
                "git status failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(!output.stdout.is_empty())
    }

    async fn add(&self, path: &Path) -> Result<(), VaultError> {
        let path = path.to_string_lossy();
        let output = self.run(&["add", "--", &path]).await?;
        if !output.status.success() {
            return Err(VaultError::Backup(format!(
                "git add failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<CommitOutcome, VaultError> {
        let output = self.run(&["commit", "-m", message]).await?;
        if output.status.success() {
            return Ok(CommitOutcome::Committed);
        }
        let text = Self::combined_output(&output);
        if text.contains("nothing to commit") || text.contains("nothing added to commit") {
            return Ok(CommitOutcome::NothingToCommit);
        }
        Err(VaultError::Backup(format!(
            "git commit failed: {}",
            text.trim()
        )))
    }

    async fn push(&self) -> Result<PushOutcome, VaultError> {
        let output = self.run(&["push", &self.remote, &self.branch]).await?;
        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }
        let text = Self::combined_output(&output);
        if text.contains("rejected") || text.contains("non-fast-forward") {
            return Ok(PushOutcome::Rejected(text.trim().to_string()));
        }
        Err(VaultError::Backup(format!(
            "git push failed: {}",
            text.trim()
        )))
    }

    async fn pull_rebase(&self) -> Result<(), VaultError> {
        let output = self
            .run(&["pull", "--rebase", &self.remote, &self.branch])
            .await?;
        if !output.status.success() {
            return Err(VaultError::Backup(format!(
                "git pull --rebase failed: {}",
                Self::combined_output(&output).trim()
            )));
        }
        Ok(())
    }
}
