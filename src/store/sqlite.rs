//! Canonical relational backend on SQLite.
//!
//! List-valued and extension-bag fields are stored as JSON text columns;
//! everything else maps to plain columns. Archival runs in a transaction so
//! the read-merge-write cycle cannot interleave with a concurrent import of
//! the same key.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::archive;
use crate::error::VaultError;
use crate::models::{now_iso, Article, Prompt, Record, RecordKind, Resource, Rule, Tool};
use crate::store::{ArchiveOutcome, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn json_list(row: &SqliteRow, col: &str) -> Vec<String> {
    let text: String = row.get(col);
    serde_json::from_str(&text).unwrap_or_default()
}

fn json_map(row: &SqliteRow, col: &str) -> Map<String, Value> {
    let text: String = row.get(col);
    serde_json::from_str(&text).unwrap_or_default()
}

fn row_to_record(kind: RecordKind, row: &SqliteRow) -> Record {
    match kind {
        RecordKind::Article => Record::Article(Article {
            id: Some(row.get("id")),
            title: row.get("title"),
            url: row.get("url"),
            summary: row.get("summary"),
            source: row.get("source"),
            category: row.get("category"),
            published_time: row.get("published_time"),
            created_at: row.get("created_at"),
            archived_at: row.get("archived_at"),
            view_count: row.get("view_count"),
            score: row.get("score"),
            tags: json_list(row, "tags"),
            tool_tags: json_list(row, "tool_tags"),
            extra: json_map(row, "extra_data"),
        }),
        RecordKind::Tool => Record::Tool(Tool {
            id: Some(row.get("id")),
            identifier: row.get("identifier"),
            name: row.get("name"),
            url: row.get("url"),
            description: row.get("description"),
            category: row.get("category"),
            is_featured: row.get::<i64, _>("is_featured") != 0,
            view_count: row.get("view_count"),
            score: row.get("score"),
            created_at: row.get("created_at"),
            extra: json_map(row, "extra_data"),
        }),
        RecordKind::Prompt => Record::Prompt(Prompt {
            id: Some(row.get("id")),
            identifier: row.get("identifier"),
            name: row.get("name"),
            description: row.get("description"),
            content: row.get("content"),
            category: row.get("category"),
            extra: json_map(row, "extra_data"),
        }),
        RecordKind::Rule => Record::Rule(Rule {
            id: Some(row.get("id")),
            name: row.get("name"),
            description: row.get("description"),
            content: row.get("content"),
            category: row.get("category"),
            extra: json_map(row, "extra_data"),
        }),
        RecordKind::Resource => Record::Resource(Resource {
            id: Some(row.get("id")),
            title: row.get("title"),
            url: row.get("url"),
            description: row.get("description"),
            resource_type: row.get("type"),
            category: row.get("category"),
            subcategory: row.get("subcategory"),
            created_at: row.get("created_at"),
            extra: json_map(row, "extra_data"),
        }),
    }
}

/// Natural-key predicate for point lookups. Tools match on either the
/// identifier or the URL.
fn key_predicate(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Article | RecordKind::Resource => "url = ?",
        RecordKind::Tool => "(identifier = ? OR url = ?)",
        RecordKind::Prompt => "identifier = ?",
        RecordKind::Rule => "name = ?",
    }
}

fn bind_key<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    kind: RecordKind,
    key: &'q str,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if kind == RecordKind::Tool {
        query.bind(key).bind(key)
    } else {
        query.bind(key)
    }
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        kind: RecordKind,
        key: &str,
    ) -> Result<Option<Record>, VaultError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            kind.table(),
            key_predicate(kind)
        );
        let row = bind_key(sqlx::query(&sql), kind, key)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|row| row_to_record(kind, &row)))
    }

    async fn insert_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        record: &Record,
        now: &str,
    ) -> Result<i64, VaultError> {
        let result = match record {
            Record::Article(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO articles
                        (title, url, summary, source, category, published_time,
                         created_at, archived_at, view_count, score, tags,
                         tool_tags, extra_data, created_at_db, updated_at_db)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&r.title)
                .bind(&r.url)
                .bind(&r.summary)
                .bind(&r.source)
                .bind(&r.category)
                .bind(&r.published_time)
                .bind(&r.created_at)
                .bind(&r.archived_at)
                .bind(r.view_count)
                .bind(r.score)
                .bind(serde_json::to_string(&r.tags)?)
                .bind(serde_json::to_string(&r.tool_tags)?)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?
            }
            Record::Tool(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO tools
                        (identifier, name, url, description, category,
                         is_featured, view_count, score, created_at,
                         extra_data, created_at_db, updated_at_db)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&r.identifier)
                .bind(&r.name)
                .bind(&r.url)
                .bind(&r.description)
                .bind(&r.category)
                .bind(r.is_featured as i64)
                .bind(r.view_count)
                .bind(r.score)
                .bind(&r.created_at)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?
            }
            Record::Prompt(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO prompts
                        (identifier, name, description, content, category,
                         extra_data, created_at_db, updated_at_db)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&r.identifier)
                .bind(&r.name)
                .bind(&r.description)
                .bind(&r.content)
                .bind(&r.category)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?
            }
            Record::Rule(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO rules
                        (name, description, content, category, extra_data,
                         created_at_db, updated_at_db)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&r.name)
                .bind(&r.description)
                .bind(&r.content)
                .bind(&r.category)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?
            }
            Record::Resource(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO resources
                        (title, url, description, type, category, subcategory,
                         created_at, extra_data, created_at_db, updated_at_db)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&r.title)
                .bind(&r.url)
                .bind(&r.description)
                .bind(&r.resource_type)
                .bind(&r.category)
                .bind(&r.subcategory)
                .bind(&r.created_at)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?
            }
        };
        Ok(result.last_insert_rowid())
    }

    async fn update_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        record: &Record,
        id: i64,
        now: &str,
    ) -> Result<(), VaultError> {
        match record {
            Record::Article(r) => {
                sqlx::query(
                    r#"
                    UPDATE articles SET
                        title = ?, url = ?, summary = ?, source = ?,
                        category = ?, published_time = ?, created_at = ?,
                        archived_at = ?, view_count = ?, score = ?, tags = ?,
                        tool_tags = ?, extra_data = ?, updated_at_db = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&r.title)
                .bind(&r.url)
                .bind(&r.summary)
                .bind(&r.source)
                .bind(&r.category)
                .bind(&r.published_time)
                .bind(&r.created_at)
                .bind(&r.archived_at)
                .bind(r.view_count)
                .bind(r.score)
                .bind(serde_json::to_string(&r.tags)?)
                .bind(serde_json::to_string(&r.tool_tags)?)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(id)
                .execute(&mut **tx)
                .await?
            }
            Record::Tool(r) => {
                sqlx::query(
                    r#"
                    UPDATE tools SET
                        identifier = ?, name = ?, url = ?, description = ?,
                        category = ?, is_featured = ?, view_count = ?,
                        score = ?, created_at = ?, extra_data = ?,
                        updated_at_db = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&r.identifier)
                .bind(&r.name)
                .bind(&r.url)
                .bind(&r.description)
                .bind(&r.category)
                .bind(r.is_featured as i64)
                .bind(r.view_count)
                .bind(r.score)
                .bind(&r.created_at)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(id)
                .execute(&mut **tx)
                .await?
            }
            Record::Prompt(r) => {
                sqlx::query(
                    r#"
                    UPDATE prompts SET
                        identifier = ?, name = ?, description = ?, content = ?,
                        category = ?, extra_data = ?, updated_at_db = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&r.identifier)
                .bind(&r.name)
                .bind(&r.description)
                .bind(&r.content)
                .bind(&r.category)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(id)
                .execute(&mut **tx)
                .await?
            }
            Record::Rule(r) => {
                sqlx::query(
                    r#"
                    UPDATE rules SET
                        name = ?, description = ?, content = ?, category = ?,
                        extra_data = ?, updated_at_db = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&r.name)
                .bind(&r.description)
                .bind(&r.content)
                .bind(&r.category)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(id)
                .execute(&mut **tx)
                .await?
            }
            Record::Resource(r) => {
                sqlx::query(
                    r#"
                    UPDATE resources SET
                        title = ?, url = ?, description = ?, type = ?,
                        category = ?, subcategory = ?, created_at = ?,
                        extra_data = ?, updated_at_db = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&r.title)
                .bind(&r.url)
                .bind(&r.description)
                .bind(&r.resource_type)
                .bind(&r.category)
                .bind(&r.subcategory)
                .bind(&r.created_at)
                .bind(serde_json::to_string(&r.extra)?)
                .bind(now)
                .bind(id)
                .execute(&mut **tx)
                .await?
            }
        };
        Ok(())
    }

    /// Remove an article by URL. Relational only; the snapshot keeps its
    /// copy until the next export rewrites it. Returns false for an
    /// unknown URL.
    pub async fn delete_article(&self, url: &str) -> Result<bool, VaultError> {
        let result = sqlx::query("DELETE FROM articles WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self, kind: RecordKind) -> Result<i64, VaultError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", kind.table());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get("n"))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch(
        &self,
        kind: RecordKind,
        category: Option<&str>,
    ) -> Result<Vec<Record>, VaultError> {
        let rows = match category {
            Some(cat) => {
                let sql = format!(
                    "SELECT * FROM {} WHERE category = ? ORDER BY id ASC",
                    kind.table()
                );
                sqlx::query(&sql).bind(cat).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!("SELECT * FROM {} ORDER BY id ASC", kind.table());
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        Ok(rows.iter().map(|row| row_to_record(kind, row)).collect())
    }

    async fn archive(
        &self,
        kind: RecordKind,
        raw: Map<String, Value>,
        category: &str,
        extra_tags: &[String],
    ) -> Result<ArchiveOutcome, VaultError> {
        let key = archive::natural_key_of(kind, &raw)?;

        let mut tx = self.pool.begin().await?;
        let existing = Self::find_in_tx(&mut tx, kind, &key).await?;
        let now = now_iso();
        let existing_map = existing.as_ref().map(Record::to_map);
        let record = archive::merge(kind, &raw, existing_map.as_ref(), category, extra_tags, &now)?;

        let outcome = match existing.as_ref().and_then(Record::id) {
            Some(id) => {
                Self::update_in_tx(&mut tx, &record, id, &now).await?;
                ArchiveOutcome::Updated
            }
            None => {
                Self::insert_in_tx(&mut tx, &record, &now).await?;
                ArchiveOutcome::Inserted
            }
        };
        tx.commit().await?;

        debug!(kind = %kind, key = %key, outcome = ?outcome, "archived record");
        Ok(outcome)
    }

    async fn get_by_natural_key(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<Option<Record>, VaultError> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            kind.table(),
            key_predicate(kind)
        );
        let row = bind_key(sqlx::query(&sql), kind, key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row_to_record(kind, &row)))
    }

    async fn increment_view_count(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<bool, VaultError> {
        if !matches!(kind, RecordKind::Article | RecordKind::Tool) {
            return Ok(false);
        }
        let key = key.trim();
        if key.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE {} SET view_count = view_count + 1, updated_at_db = ? WHERE {}",
            kind.table(),
            key_predicate(kind)
        );
        let result = bind_key(sqlx::query(&sql).bind(now_iso()), kind, key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
