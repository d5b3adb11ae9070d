//! Export pipeline: canonical store to snapshot to backup history.
//!
//! `write_snapshot` regenerates the flat-file snapshot from the relational
//! content; `run_backup` then records the snapshot in the git-backed backup
//! history and publishes it to the remote.

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use tracing::{info, warn};

use crate::error::VaultError;
use crate::models::{Record, RecordKind};
use crate::store::{SnapshotStore, SqliteStore, Store};
use crate::vcs::{CommitOutcome, PushOutcome, VersionControl};

/// Article categories that exist only as working state in the relational
/// store. They never reach the snapshot or the backup history.
pub const EPHEMERAL_ARTICLE_CATEGORIES: [&str; 2] = ["ai_candidates", "ai_articles"];

/// Collection a non-featured tool without a category lands in.
const DEFAULT_TOOL_COLLECTION: &str = "other";
/// Collection an article without a category lands in.
const DEFAULT_ARTICLE_COLLECTION: &str = "uncategorized";

#[derive(Debug, Default)]
pub struct ExportReport {
    pub articles: usize,
    pub tools: usize,
    pub prompts: usize,
    pub rules: usize,
    pub resources: usize,
    pub collections_written: usize,
    pub committed: bool,
    pub published: bool,
}

impl ExportReport {
    pub fn records_written(&self) -> usize {
        self.articles + self.tools + self.prompts + self.rules + self.resources
    }
}

fn write_sharded(
    snapshot: &SnapshotStore,
    kind: RecordKind,
    collections: BTreeMap<String, Vec<Record>>,
) -> Result<usize, VaultError> {
    // Drop collection files for categories that no longer exist, then
    // rewrite the current set.
    for stale in snapshot.collection_names(kind)? {
        if !collections.contains_key(&stale) {
            std::fs::remove_file(snapshot.collection_path(kind, &stale))?;
        }
    }
    let mut written = 0;
    for (name, records) in &collections {
        snapshot.write_collection(kind, name, records)?;
        written += 1;
    }
    Ok(written)
}

/// Regenerate the whole snapshot from the relational store. Articles shard
/// by category (ephemeral categories excluded), tools split into a featured
/// collection plus per-category collections, and the remaining kinds each
/// write a single collection.
pub async fn write_snapshot(
    store: &SqliteStore,
    snapshot: &SnapshotStore,
) -> Result<ExportReport, VaultError> {
    let mut report = ExportReport::default();

    let mut article_collections: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in store.fetch(RecordKind::Article, None).await? {
        let category = record
            .category()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_ARTICLE_COLLECTION)
            .to_string();
        if EPHEMERAL_ARTICLE_CATEGORIES.contains(&category.as_str()) {
            continue;
        }
        report.articles += 1;
        article_collections.entry(category).or_default().push(record);
    }
    report.collections_written +=
        write_sharded(snapshot, RecordKind::Article, article_collections)?;

    let mut tool_collections: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in store.fetch(RecordKind::Tool, None).await? {
        report.tools += 1;
        let collection = if record.is_featured() {
            "featured".to_string()
        } else {
            record
                .category()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_TOOL_COLLECTION)
                .to_string()
        };
        tool_collections.entry(collection).or_default().push(record);
    }
    report.collections_written += write_sharded(snapshot, RecordKind::Tool, tool_collections)?;

    for kind in [RecordKind::Prompt, RecordKind::Rule, RecordKind::Resource] {
        let records = store.fetch(kind, None).await?;
        let count = records.len();
        match kind {
            RecordKind::Prompt => report.prompts = count,
            RecordKind::Rule => report.rules = count,
            RecordKind::Resource => report.resources = count,
            _ => unreachable!(),
        }
        let name = match kind {
            RecordKind::Prompt => "prompts",
            RecordKind::Rule => "rules",
            _ => "resources",
        };
        snapshot.write_collection(kind, name, &records)?;
        report.collections_written += 1;
    }

    info!(
        records = report.records_written(),
        collections = report.collections_written,
        "snapshot written"
    );
    Ok(report)
}

/// Commit label carrying the backup date and ISO week.
pub fn backup_commit_message() -> String {
    let now = Utc::now();
    format!(
        "chore: weekly backup from database - {} (Week {})",
        now.format("%Y-%m-%d"),
        now.iso_week().week()
    )
}

/// Full backup cycle: regenerate the snapshot, commit it, publish it.
///
/// A diverged remote gets one rebase-and-retry; a second rejection is a
/// `PublishConflict` and the local commit waits for the next cycle. A
/// snapshot directory outside any git work tree downgrades the cycle to a
/// plain export with a warning.
pub async fn run_backup(
    store: &SqliteStore,
    snapshot: &SnapshotStore,
    vcs: &dyn VersionControl,
) -> Result<ExportReport, VaultError> {
    let mut report = write_snapshot(store, snapshot).await?;

    if !vcs.is_repo() {
        warn!("backup root is not a git repository; snapshot written but not committed");
        return Ok(report);
    }
    if !vcs.status_changed(snapshot.root()).await? {
        info!("snapshot unchanged since last backup; nothing to commit");
        return Ok(report);
    }

    vcs.add(snapshot.root()).await?;
    match vcs.commit(&backup_commit_message()).await? {
        CommitOutcome::NothingToCommit => {
            info!("snapshot unchanged since last backup; nothing to commit");
            return Ok(report);
        }
        CommitOutcome::Committed => report.committed = true,
    }

    match vcs.push().await? {
        PushOutcome::Pushed => report.published = true,
        PushOutcome::Rejected(first) => {
            info!("push rejected, rebasing onto remote and retrying");
            vcs.pull_rebase().await?;
            match vcs.push().await? {
                PushOutcome::Pushed => report.published = true,
                PushOutcome::Rejected(second) => {
                    return Err(VaultError::PublishConflict(format!(
                        "push rejected twice ({}; then {})",
                        first.lines().next().unwrap_or_default(),
                        second.lines().next().unwrap_or_default()
                    )));
                }
            }
        }
    }

    info!(
        committed = report.committed,
        published = report.published,
        "backup cycle complete"
    );
    Ok(report)
}
