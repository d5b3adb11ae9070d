//! In-process tests for the storage backends, the query pipeline, and the
//! export/backup cycle.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use content_vault::db;
use content_vault::error::VaultError;
use content_vault::export;
use content_vault::migrate;
use content_vault::models::{Record, RecordKind, Tool};
use content_vault::query::{self, QueryParams, RecentFilter, SortBy};
use content_vault::store::{ArchiveOutcome, SnapshotStore, SqliteStore, Store};
use content_vault::vcs::{CommitOutcome, PushOutcome, VersionControl};

fn raw(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

async fn sqlite_store(dir: &TempDir) -> SqliteStore {
    let pool = db::connect(&dir.path().join("vault.db")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

async fn archive_article(store: &dyn Store, url: &str, title: &str, category: &str) {
    store
        .archive(
            RecordKind::Article,
            raw(json!({"title": title, "url": url})),
            category,
            &[],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn sqlite_archive_is_idempotent_upsert() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    let first = store
        .archive(
            RecordKind::Article,
            raw(json!({"title": "Rust 1.80", "url": "https://e.com/a", "score": 5})),
            "news",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(first, ArchiveOutcome::Inserted);

    let before = store
        .get_by_natural_key(RecordKind::Article, "https://e.com/a")
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    // Re-import with a new title and no score: title updates, score stays,
    // archived_at refreshes, and no second row appears.
    let second = store
        .archive(
            RecordKind::Article,
            raw(json!({"title": "Rust 1.80 released", "url": "https://e.com/a"})),
            "news",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(second, ArchiveOutcome::Updated);

    let all = store.fetch(RecordKind::Article, None).await.unwrap();
    assert_eq!(all.len(), 1);

    let after = &all[0];
    assert_eq!(after.id(), before.id());
    assert_eq!(after.display_name(), "Rust 1.80 released");
    assert_eq!(after.score(), 5);
    assert!(after.archived_at().unwrap() > before.archived_at().unwrap());
}

#[tokio::test]
async fn sqlite_tool_lookup_by_identifier_or_url() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    store
        .archive(
            RecordKind::Tool,
            raw(json!({
                "identifier": "cursor",
                "name": "Cursor",
                "url": "https://cursor.sh",
            })),
            "editors",
            &[],
        )
        .await
        .unwrap();

    for key in ["cursor", "https://cursor.sh"] {
        let found = store
            .get_by_natural_key(RecordKind::Tool, key)
            .await
            .unwrap();
        assert!(found.is_some(), "lookup by {} failed", key);
        assert!(store.is_archived(RecordKind::Tool, key).await.unwrap());
    }
    assert!(!store.is_archived(RecordKind::Tool, "zed").await.unwrap());
}

#[tokio::test]
async fn sqlite_extension_bag_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    store
        .archive(
            RecordKind::Article,
            raw(json!({
                "title": "t",
                "url": "https://e.com/a",
                "github_stars": 1234,
                "mirrors": ["https://m1", "https://m2"],
            })),
            "news",
            &[],
        )
        .await
        .unwrap();

    let record = store
        .get_by_natural_key(RecordKind::Article, "https://e.com/a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.extra().get("github_stars"), Some(&json!(1234)));
    assert_eq!(
        record.extra().get("mirrors"),
        Some(&json!(["https://m1", "https://m2"]))
    );
}

#[tokio::test]
async fn sqlite_rejects_record_without_natural_key() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    let err = store
        .archive(
            RecordKind::Article,
            raw(json!({"title": "no url"})),
            "news",
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidRecord(_)));
    assert_eq!(store.count(RecordKind::Article).await.unwrap(), 0);
}

#[tokio::test]
async fn view_counter_hits_and_misses() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    archive_article(&store, "https://e.com/a", "t", "news").await;

    for _ in 0..3 {
        assert!(store
            .increment_view_count(RecordKind::Article, "https://e.com/a")
            .await
            .unwrap());
    }
    assert!(!store
        .increment_view_count(RecordKind::Article, "https://e.com/missing")
        .await
        .unwrap());
    assert!(!store
        .increment_view_count(RecordKind::Rule, "some-rule")
        .await
        .unwrap());

    let record = store
        .get_by_natural_key(RecordKind::Article, "https://e.com/a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.view_count(), 3);
}

#[tokio::test]
async fn delete_article_by_url() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    archive_article(&store, "https://e.com/a", "t", "news").await;

    assert!(store.delete_article("https://e.com/a").await.unwrap());
    assert!(!store.delete_article("https://e.com/a").await.unwrap());
    assert_eq!(store.count(RecordKind::Article).await.unwrap(), 0);
}

#[tokio::test]
async fn query_filters_search_and_paginates() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    for i in 1..=45 {
        let category = if i % 2 == 0 { "news" } else { "guides" };
        store
            .archive(
                RecordKind::Article,
                raw(json!({
                    "title": format!("Article number {}", i),
                    "url": format!("https://e.com/{}", i),
                    "score": i,
                })),
                category,
                &[],
            )
            .await
            .unwrap();
    }

    // Page boundaries: 45 matches, pages of 20.
    let params = QueryParams {
        page: 3,
        ..Default::default()
    };
    let page = query::query(&store, RecordKind::Article, &params).await.unwrap();
    assert_eq!(page.total, 45);
    assert_eq!(page.records.len(), 5);

    // Out-of-range pages are empty, not errors.
    let params = QueryParams {
        page: 10,
        ..Default::default()
    };
    let page = query::query(&store, RecordKind::Article, &params).await.unwrap();
    assert_eq!(page.total, 45);
    assert!(page.records.is_empty());

    // Category filter.
    let params = QueryParams {
        category: Some("news".into()),
        page_size: 100,
        ..Default::default()
    };
    let page = query::query(&store, RecordKind::Article, &params).await.unwrap();
    assert_eq!(page.total, 22);

    // Case-insensitive search; whitespace-only search is no search.
    let params = QueryParams {
        search: Some("ARTICLE NUMBER 7".into()),
        page_size: 100,
        ..Default::default()
    };
    let page = query::query(&store, RecordKind::Article, &params).await.unwrap();
    assert_eq!(page.total, 1);

    let params = QueryParams {
        search: Some("   ".into()),
        page_size: 100,
        ..Default::default()
    };
    let page = query::query(&store, RecordKind::Article, &params).await.unwrap();
    assert_eq!(page.total, 45);
}

#[tokio::test]
async fn query_sorts_identically_on_both_backends() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let sqlite = sqlite_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());

    let fixtures = [
        ("https://e.com/a", "alpha", 5, "2026-01-03T00:00:00Z"),
        ("https://e.com/b", "beta", 5, "2026-01-01T00:00:00Z"),
        ("https://e.com/c", "gamma", 9, "2026-01-02T00:00:00Z"),
    ];
    for (url, title, score, created) in fixtures {
        let record = json!({
            "title": title,
            "url": url,
            "score": score,
            "created_at": created,
        });
        sqlite
            .archive(RecordKind::Article, raw(record.clone()), "news", &[])
            .await
            .unwrap();
        snapshot
            .archive(RecordKind::Article, raw(record), "news", &[])
            .await
            .unwrap();
    }

    for sort_by in [
        SortBy::Score,
        SortBy::ViewCount,
        SortBy::CreatedAt,
        SortBy::PublishedTime,
        SortBy::ArchivedAt,
    ] {
        let params = QueryParams {
            sort_by,
            ..Default::default()
        };
        let from_db = query::query(&sqlite, RecordKind::Article, &params)
            .await
            .unwrap();
        let from_snap = query::query(&snapshot, RecordKind::Article, &params)
            .await
            .unwrap();
        let db_keys: Vec<_> = from_db.records.iter().map(|r| r.natural_key()).collect();
        let snap_keys: Vec<_> = from_snap.records.iter().map(|r| r.natural_key()).collect();
        assert_eq!(db_keys, snap_keys, "order diverged under {:?}", sort_by);
    }

    // Equal scores break toward the newest id.
    let params = QueryParams::default();
    let page = query::query(&sqlite, RecordKind::Article, &params).await.unwrap();
    let titles: Vec<_> = page.records.iter().map(Record::display_name).collect();
    assert_eq!(titles, vec!["gamma", "beta", "alpha"]);
}

#[tokio::test]
async fn snapshot_dedup_prefers_featured_copy() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());

    // Same tool in its category file and in featured; the featured copy is
    // read first and wins the dedup.
    let category_copy = Record::Tool(Tool {
        id: Some(1),
        identifier: Some("cursor".into()),
        name: "Cursor (stale)".into(),
        url: "https://cursor.sh".into(),
        category: Some("editors".into()),
        ..Default::default()
    });
    let featured_copy = Record::Tool(Tool {
        id: Some(2),
        identifier: Some("cursor".into()),
        name: "Cursor".into(),
        url: "https://cursor.sh".into(),
        category: Some("editors".into()),
        is_featured: true,
        ..Default::default()
    });
    store
        .write_collection(RecordKind::Tool, "editors", &[category_copy])
        .unwrap();
    store
        .write_collection(RecordKind::Tool, "featured", &[featured_copy])
        .unwrap();

    let page = query::query(&store, RecordKind::Tool, &QueryParams::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].display_name(), "Cursor");
}

#[tokio::test]
async fn related_articles_prefer_explicit_associations() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    store
        .archive(
            RecordKind::Article,
            raw(json!({
                "title": "Cursor 1.0 ships",
                "url": "https://e.com/cursor-10",
                "published_time": "2026-02-01T00:00:00Z",
            })),
            "news",
            &["cursor".to_string()],
        )
        .await
        .unwrap();
    store
        .archive(
            RecordKind::Article,
            raw(json!({
                "title": "Editor roundup",
                "url": "https://e.com/roundup",
                "tags": ["cursor", "zed"],
                "published_time": "2026-01-01T00:00:00Z",
            })),
            "news",
            &[],
        )
        .await
        .unwrap();

    let tool = Tool {
        identifier: Some("cursor".into()),
        name: "Cursor".into(),
        url: "https://cursor.sh".into(),
        ..Default::default()
    };
    let page = query::related_articles(&store, &tool, 1, 20).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].display_name(), "Cursor 1.0 ships");

    // Without an identifier the tag fallback kicks in.
    let nameless = Tool {
        name: "Zed".into(),
        url: "https://zed.dev".into(),
        ..Default::default()
    };
    let page = query::related_articles(&store, &nameless, 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].display_name(), "Editor roundup");
}

#[tokio::test]
async fn recent_items_merge_articles_and_tools() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    archive_article(&store, "https://e.com/a", "fresh article", "news").await;
    store
        .archive(
            RecordKind::Tool,
            raw(json!({
                "identifier": "old-tool",
                "name": "Old Tool",
                "url": "https://old.dev",
                "created_at": "2020-01-01T00:00:00Z",
            })),
            "editors",
            &[],
        )
        .await
        .unwrap();

    let page = query::recent_items(&store, RecentFilter::All, 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    // The just-archived article outranks the 2020 tool.
    assert_eq!(page.records[0].display_name(), "fresh article");

    let tools_only = query::recent_items(&store, RecentFilter::Tools, 1, 20)
        .await
        .unwrap();
    assert_eq!(tools_only.total, 1);
    assert_eq!(tools_only.records[0].display_name(), "Old Tool");
}

#[tokio::test]
async fn export_shards_by_category_and_skips_ephemeral() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let store = sqlite_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());

    archive_article(&store, "https://e.com/a", "kept", "news").await;
    archive_article(&store, "https://e.com/b", "also kept", "guides").await;
    archive_article(&store, "https://e.com/c", "working state", "ai_candidates").await;
    store
        .archive(
            RecordKind::Tool,
            raw(json!({
                "identifier": "cursor",
                "name": "Cursor",
                "url": "https://cursor.sh",
                "is_featured": true,
            })),
            "editors",
            &[],
        )
        .await
        .unwrap();
    store
        .archive(
            RecordKind::Rule,
            raw(json!({"name": "no-unwrap", "content": "propagate errors"})),
            "style",
            &[],
        )
        .await
        .unwrap();

    let report = export::write_snapshot(&store, &snapshot).await.unwrap();
    assert_eq!(report.articles, 2);
    assert_eq!(report.tools, 1);
    assert_eq!(report.rules, 1);

    assert!(snap_dir.path().join("articles/news.json").is_file());
    assert!(snap_dir.path().join("articles/guides.json").is_file());
    assert!(!snap_dir.path().join("articles/ai_candidates.json").exists());
    assert!(snap_dir.path().join("tools/featured.json").is_file());
    assert!(snap_dir.path().join("rules.json").is_file());

    // The snapshot now answers the same queries as the database.
    let from_snap = query::query(&snapshot, RecordKind::Article, &QueryParams::default())
        .await
        .unwrap();
    assert_eq!(from_snap.total, 2);

    // A category emptied in the database disappears on the next export.
    store.delete_article("https://e.com/b").await.unwrap();
    export::write_snapshot(&store, &snapshot).await.unwrap();
    assert!(!snap_dir.path().join("articles/guides.json").exists());
}

/// Scripted version-control double for pipeline tests.
struct MockVcs {
    is_repo: bool,
    changed: bool,
    push_rejections: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl MockVcs {
    fn new(is_repo: bool, changed: bool, push_rejections: usize) -> Self {
        Self {
            is_repo,
            changed,
            push_rejections: AtomicUsize::new(push_rejections),
            log: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    fn is_repo(&self) -> bool {
        self.is_repo
    }

    async fn status_changed(&self, _path: &Path) -> Result<bool, VaultError> {
        self.record("status");
        Ok(self.changed)
    }

    async fn add(&self, _path: &Path) -> Result<(), VaultError> {
        self.record("add");
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<CommitOutcome, VaultError> {
        self.record("commit");
        assert!(message.starts_with("chore: weekly backup from database - "));
        assert!(message.contains("(Week "));
        Ok(CommitOutcome::Committed)
    }

    async fn push(&self) -> Result<PushOutcome, VaultError> {
        self.record("push");
        if self.push_rejections.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        }).is_ok()
        {
            Ok(PushOutcome::Rejected("fetch first".into()))
        } else {
            Ok(PushOutcome::Pushed)
        }
    }

    async fn pull_rebase(&self) -> Result<(), VaultError> {
        self.record("rebase");
        Ok(())
    }
}

async fn seeded_store(dir: &TempDir) -> SqliteStore {
    let store = sqlite_store(dir).await;
    archive_article(&store, "https://e.com/a", "t", "news").await;
    store
}

#[tokio::test]
async fn backup_outside_repo_still_exports() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let store = seeded_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());
    let vcs = MockVcs::new(false, true, 0);

    let report = export::run_backup(&store, &snapshot, &vcs).await.unwrap();
    assert!(!report.committed);
    assert!(!report.published);
    assert!(vcs.calls().is_empty());
    assert!(snap_dir.path().join("articles/news.json").is_file());
}

#[tokio::test]
async fn backup_skips_commit_when_unchanged() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let store = seeded_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());
    let vcs = MockVcs::new(true, false, 0);

    let report = export::run_backup(&store, &snapshot, &vcs).await.unwrap();
    assert!(!report.committed);
    assert_eq!(vcs.calls(), vec!["status"]);
}

#[tokio::test]
async fn backup_commits_and_publishes() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let store = seeded_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());
    let vcs = MockVcs::new(true, true, 0);

    let report = export::run_backup(&store, &snapshot, &vcs).await.unwrap();
    assert!(report.committed);
    assert!(report.published);
    assert_eq!(vcs.calls(), vec!["status", "add", "commit", "push"]);
}

#[tokio::test]
async fn backup_rebases_once_on_rejected_push() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let store = seeded_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());
    let vcs = MockVcs::new(true, true, 1);

    let report = export::run_backup(&store, &snapshot, &vcs).await.unwrap();
    assert!(report.committed);
    assert!(report.published);
    assert_eq!(
        vcs.calls(),
        vec!["status", "add", "commit", "push", "rebase", "push"]
    );
}

#[tokio::test]
async fn backup_surfaces_conflict_after_second_rejection() {
    let db_dir = TempDir::new().unwrap();
    let snap_dir = TempDir::new().unwrap();
    let store = seeded_store(&db_dir).await;
    let snapshot = SnapshotStore::new(snap_dir.path());
    let vcs = MockVcs::new(true, true, 2);

    let err = export::run_backup(&store, &snapshot, &vcs).await.unwrap_err();
    assert!(matches!(err, VaultError::PublishConflict(_)));
    assert_eq!(
        vcs.calls(),
        vec!["status", "add", "commit", "push", "rebase", "push"]
    );
}
