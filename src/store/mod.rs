//! Storage abstraction over the two persistence backends.
//!
//! The relational store is canonical; the flat-file snapshot serves the
//! published backup history. Both expose the same operations, and the query
//! engine in [`crate::query`] runs identically against either.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::VaultError;
use crate::models::{Record, RecordKind};

pub mod snapshot;
pub mod sqlite;

pub use snapshot::SnapshotStore;
pub use sqlite::SqliteStore;

/// What an archival call did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// First import of this natural key.
    Inserted,
    /// The key existed; the stored copy was merged and refreshed.
    Updated,
    /// Snapshot backend only: the key already existed in the target
    /// collection and the incoming record was discarded.
    Duplicate,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// All records of a kind, optionally narrowed to a category. The
    /// narrowing is a fetch hint; the query engine re-applies the category
    /// filter uniformly afterwards.
    async fn fetch(
        &self,
        kind: RecordKind,
        category: Option<&str>,
    ) -> Result<Vec<Record>, VaultError>;

    /// Idempotent upsert keyed by the natural key. See [`crate::archive`]
    /// for the merge rules.
    async fn archive(
        &self,
        kind: RecordKind,
        raw: Map<String, Value>,
        category: &str,
        extra_tags: &[String],
    ) -> Result<ArchiveOutcome, VaultError>;

    /// Point lookup by natural key. For tools the key may be either the
    /// identifier or the URL.
    async fn get_by_natural_key(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<Option<Record>, VaultError>;

    async fn is_archived(&self, kind: RecordKind, key: &str) -> Result<bool, VaultError> {
        Ok(self.get_by_natural_key(kind, key).await?.is_some())
    }

    /// Bump the view counter by one. Returns false when the key is unknown;
    /// a miss is not an error.
    async fn increment_view_count(&self, kind: RecordKind, key: &str)
        -> Result<bool, VaultError>;
}
