//! Error taxonomy for the vault.
//!
//! "Not found" is deliberately absent: a missing record is a normal outcome
//! (an `Option` or `bool`), never an error.

use thiserror::Error;

use crate::models::RecordKind;

#[derive(Debug, Error)]
pub enum VaultError {
    /// The record is missing its natural key or a required field.
    /// Rejected locally, never persisted.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// An extension-bag field collides with a fixed-schema name.
    #[error("field '{field}' collides with the fixed {kind} schema")]
    SchemaConflict { kind: RecordKind, field: String },

    /// Transactional failure in the relational store. The operation that
    /// raised it has no partial effect.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// I/O failure in the file snapshot.
    #[error("snapshot i/o error: {0}")]
    SnapshotIo(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A git invocation failed or timed out during backup.
    #[error("backup failure: {0}")]
    Backup(String),

    /// The remote backup history diverged and one rebase-and-retry did not
    /// resolve it. The local commit is kept; the next cycle retries.
    #[error("publish conflict: {0}")]
    PublishConflict(String),
}
