use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Root directory of the flat-file snapshot (one collection per
    /// entity kind and category).
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Working tree of the version-controlled backup history. The snapshot
    /// directory must live inside it.
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Upper bound for a single git invocation during publish.
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            remote: default_remote(),
            branch: default_branch(),
            timeout_secs: default_git_timeout_secs(),
        }
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_remote() -> String {
    "origin".to_string()
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_git_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Period of the registered export job, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    // Daily; the backup commit label still carries the ISO week.
    86_400
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.backup.timeout_secs == 0 {
        anyhow::bail!("backup.timeout_secs must be > 0");
    }
    if config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be > 0");
    }
    if config.backup.remote.trim().is_empty() || config.backup.branch.trim().is_empty() {
        anyhow::bail!("backup.remote and backup.branch must be non-empty");
    }

    Ok(config)
}
