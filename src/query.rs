//! Query engine: dedup, filter, search, sort, paginate.
//!
//! Everything here is backend-agnostic. A store hands over its records and
//! the same pipeline runs whether they came from SQLite or from the file
//! snapshot, so both backends answer queries identically.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::VaultError;
use crate::models::{Record, RecordKind, Tool};
use crate::store::Store;

/// Sort policy. Each policy has a deterministic tie-break so paginated
/// output is stable across calls and backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Descending score; ties broken by newest id first.
    #[default]
    Score,
    /// Descending view count; ties broken by oldest `created_at` first.
    ViewCount,
    CreatedAt,
    PublishedTime,
    ArchivedAt,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Score => "score",
            SortBy::ViewCount => "view_count",
            SortBy::CreatedAt => "created_at",
            SortBy::PublishedTime => "published_time",
            SortBy::ArchivedAt => "archived_at",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "score" => Ok(SortBy::Score),
            "view_count" | "views" => Ok(SortBy::ViewCount),
            "created_at" => Ok(SortBy::CreatedAt),
            "published_time" => Ok(SortBy::PublishedTime),
            "archived_at" => Ok(SortBy::ArchivedAt),
            other => Err(format!(
                "unknown sort policy '{}'. Available: score, view_count, created_at, published_time, archived_at",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub category: Option<String>,
    pub featured: Option<bool>,
    pub resource_type: Option<String>,
    pub subcategory: Option<String>,
    /// Case-insensitive substring over the kind's search fields.
    /// Whitespace-only input means no search.
    pub search: Option<String>,
    pub sort_by: SortBy,
    /// 1-indexed. Values below 1 are clamped to the first page.
    pub page: usize,
    pub page_size: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            category: None,
            featured: None,
            resource_type: None,
            subcategory: None,
            search: None,
            sort_by: SortBy::default(),
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Matching records before pagination.
    pub total: usize,
}

/// Drop later duplicates of a natural key, keeping the first occurrence in
/// store read order. Records without a key are kept as-is.
pub fn dedup_by_natural_key(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| match r.natural_key() {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

fn time_key(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

fn id_desc(a: &Record, b: &Record) -> Ordering {
    b.id().unwrap_or(0).cmp(&a.id().unwrap_or(0))
}

/// Total order for a sort policy. ISO-8601 timestamps compare correctly as
/// strings; records missing the timestamp sort last under the descending
/// policies.
pub fn compare(a: &Record, b: &Record, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::Score => b.score().cmp(&a.score()).then_with(|| id_desc(a, b)),
        SortBy::ViewCount => b
            .view_count()
            .cmp(&a.view_count())
            .then_with(|| time_key(a.created_at()).cmp(time_key(b.created_at())))
            .then_with(|| id_desc(a, b)),
        SortBy::CreatedAt => time_key(b.created_at())
            .cmp(time_key(a.created_at()))
            .then_with(|| id_desc(a, b)),
        SortBy::PublishedTime => time_key(b.published_time())
            .cmp(time_key(a.published_time()))
            .then_with(|| id_desc(a, b)),
        SortBy::ArchivedAt => time_key(b.archived_at())
            .cmp(time_key(a.archived_at()))
            .then_with(|| id_desc(a, b)),
    }
}

fn paginate(records: Vec<Record>, page: usize, page_size: usize) -> Vec<Record> {
    let page = page.max(1);
    let start = (page - 1).saturating_mul(page_size);
    records.into_iter().skip(start).take(page_size).collect()
}

fn matches_search(record: &Record, needle: &str) -> bool {
    record
        .search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Run the full pipeline against a store. Out-of-range pages return an
/// empty page with the true total; the pipeline never errors on paging.
pub async fn query(
    store: &dyn Store,
    kind: RecordKind,
    params: &QueryParams,
) -> Result<QueryPage, VaultError> {
    let records = store.fetch(kind, params.category.as_deref()).await?;
    let mut records = dedup_by_natural_key(records);

    // The category hint narrows the fetch; the filter is still re-applied
    // so both backends agree on the result set.
    if let Some(category) = params.category.as_deref() {
        records.retain(|r| r.category() == Some(category));
    }
    if let Some(featured) = params.featured {
        records.retain(|r| r.is_featured() == featured);
    }
    if let Some(resource_type) = params.resource_type.as_deref() {
        records.retain(|r| r.resource_type() == Some(resource_type));
    }
    if let Some(subcategory) = params.subcategory.as_deref() {
        records.retain(|r| r.subcategory() == Some(subcategory));
    }
    if let Some(needle) = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let needle = needle.to_lowercase();
        records.retain(|r| matches_search(r, &needle));
    }

    records.sort_by(|a, b| compare(a, b, params.sort_by));
    let total = records.len();
    let records = paginate(records, params.page, params.page_size);
    Ok(QueryPage { records, total })
}

fn recency_key(record: &Record) -> &str {
    match record {
        Record::Article(_) => time_key(record.archived_at().or(record.created_at())),
        _ => time_key(record.created_at()),
    }
}

/// Which kinds a recent-items query unions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecentFilter {
    #[default]
    All,
    Articles,
    Tools,
}

impl FromStr for RecentFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(RecentFilter::All),
            "article" | "articles" => Ok(RecentFilter::Articles),
            "tool" | "tools" => Ok(RecentFilter::Tools),
            other => Err(format!(
                "unknown recent-items filter '{}'. Available: all, articles, tools",
                other
            )),
        }
    }
}

/// Newest articles and tools merged into one feed. Articles rank by their
/// archival time (import time for records that never carried one); tools by
/// `created_at`.
pub async fn recent_items(
    store: &dyn Store,
    filter: RecentFilter,
    page: usize,
    page_size: usize,
) -> Result<QueryPage, VaultError> {
    let mut records = Vec::new();
    if matches!(filter, RecentFilter::All | RecentFilter::Articles) {
        records.extend(dedup_by_natural_key(
            store.fetch(RecordKind::Article, None).await?,
        ));
    }
    if matches!(filter, RecentFilter::All | RecentFilter::Tools) {
        records.extend(dedup_by_natural_key(
            store.fetch(RecordKind::Tool, None).await?,
        ));
    }
    records.sort_by(|a, b| {
        recency_key(b)
            .cmp(recency_key(a))
            .then_with(|| id_desc(a, b))
    });
    let total = records.len();
    let records = paginate(records, page, page_size);
    Ok(QueryPage { records, total })
}

/// Articles related to a tool. An explicit `tool_tags` entry matching the
/// tool's identifier wins; without one, tags are matched fuzzily against the
/// tool name (substring in either direction, case-insensitive).
pub async fn related_articles(
    store: &dyn Store,
    tool: &Tool,
    page: usize,
    page_size: usize,
) -> Result<QueryPage, VaultError> {
    let articles = dedup_by_natural_key(store.fetch(RecordKind::Article, None).await?);

    let identifier = tool.identifier.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let mut matched: Vec<Record> = match identifier {
        Some(id) => articles
            .iter()
            .filter(|r| {
                matches!(r, Record::Article(a) if a.tool_tags.iter().any(|t| t.as_str() == id))
            })
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    if matched.is_empty() {
        let name = tool.name.trim().to_lowercase();
        if !name.is_empty() {
            matched = articles
                .iter()
                .filter(|r| {
                    let tags = match r {
                        Record::Article(a) => &a.tags,
                        _ => return false,
                    };
                    tags.iter().any(|tag| {
                        let tag = tag.to_lowercase();
                        tag.contains(&name) || name.contains(&tag)
                    })
                })
                .cloned()
                .collect();
        }
    }

    matched.sort_by(|a, b| {
        let key_a = time_key(a.published_time().or(a.created_at()));
        let key_b = time_key(b.published_time().or(b.created_at()));
        key_b.cmp(key_a).then_with(|| id_desc(a, b))
    });
    let total = matched.len();
    let records = paginate(matched, page, page_size);
    Ok(QueryPage { records, total })
}
