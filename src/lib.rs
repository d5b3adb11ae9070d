//! content-vault: a content repository and archival engine.
//!
//! Five record kinds (articles, tools, prompts, rules, resources) are
//! archived idempotently by natural key into a canonical SQLite store, with
//! a flat-file JSON snapshot serving a git-backed backup history. One query
//! engine answers identically over either backend.
//!
//! ```text
//!   importers ──> archive (merge by natural key)
//!                     │
//!             ┌───────┴────────┐
//!             ▼                ▼
//!        SqliteStore      SnapshotStore
//!        (canonical)      (flat JSON files)
//!             │                ▲
//!             │   export       │
//!             └────────────────┘
//!                     │
//!                     ▼
//!          vcs (git commit + push)
//! ```
//!
//! Modules:
//! - [`models`]: the five record kinds, natural keys, extension bags
//! - [`archive`]: merge semantics shared by both backends
//! - [`store`]: the [`store::Store`] trait and its two backends
//! - [`query`]: dedup, filter, search, sort, paginate
//! - [`export`]: snapshot regeneration and the backup cycle
//! - [`vcs`]: git subprocess gateway
//! - [`scheduler`]: periodic backup driver
//! - [`config`], [`db`], [`migrate`], [`error`]: ambient plumbing

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod migrate;
pub mod models;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod vcs;
