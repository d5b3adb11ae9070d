//! # Content Vault CLI (`cvault`)
//!
//! The `cvault` binary is the operator interface for the content vault. It
//! provides commands for database initialization, record archival, querying,
//! counters, snapshot export, and the git-backed backup cycle.
//!
//! ## Usage
//!
//! ```bash
//! cvault --config ./config/cvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvault init` | Create the SQLite database and run schema migrations |
//! | `cvault archive <kind> <file>` | Import records from a JSON file (idempotent upsert) |
//! | `cvault list <kind>` | Query records with filters, search, sort, pagination |
//! | `cvault get <kind> <key>` | Retrieve one record by natural key |
//! | `cvault view <kind> <key>` | Bump a record's view counter |
//! | `cvault delete <url>` | Remove an article from the relational store |
//! | `cvault recent` | Newest articles and tools as one feed |
//! | `cvault related <key>` | Articles related to a tool |
//! | `cvault export` | Regenerate the flat-file snapshot from the database |
//! | `cvault backup` | Export, commit, and push the snapshot |
//! | `cvault stats` | Record counts per table |
//! | `cvault watch` | Run the backup cycle on the configured period |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::EnvFilter;

use content_vault::config::{self, Config};
use content_vault::db;
use content_vault::export;
use content_vault::migrate;
use content_vault::models::{Record, RecordKind};
use content_vault::query::{self, QueryParams, RecentFilter, SortBy};
use content_vault::scheduler::Scheduler;
use content_vault::store::{ArchiveOutcome, SnapshotStore, SqliteStore, Store};
use content_vault::vcs::GitGateway;

/// Content Vault CLI — an archival engine for articles, tools, prompts,
/// rules, and resources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cvault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cvault",
    about = "Content Vault — a content repository and archival engine",
    version,
    long_about = "Content Vault archives five kinds of records (articles, tools, prompts, \
    rules, resources) into a canonical SQLite store, mirrors them into a flat-file JSON \
    snapshot, and publishes the snapshot into a git-backed backup history."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cvault.toml`. Database, snapshot, backup, and
    /// scheduler settings are read from this file.
    #[arg(long, global = true, default_value = "./config/cvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all five entity tables with
    /// their natural-key uniques and indexes. Idempotent.
    Init,

    /// Import records from a JSON file.
    ///
    /// The file holds either one record object or an array of them.
    /// Archival is an idempotent upsert keyed by the natural key: on the
    /// database backend re-imports merge into the stored copy; on the
    /// snapshot backend duplicates within a collection are rejected.
    Archive {
        /// Record kind: `article`, `tool`, `prompt`, `rule`, or `resource`.
        kind: String,

        /// Path to the JSON file to import.
        file: PathBuf,

        /// Category stamped onto every imported record.
        #[arg(long)]
        category: String,

        /// Extra tag(s) unioned into article tags (repeatable). Also
        /// recorded as the article's tool associations.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Storage backend: `db` or `snapshot`.
        #[arg(long, default_value = "db")]
        backend: String,
    },

    /// Query records of a kind.
    ///
    /// Runs the full pipeline (dedup, filter, search, sort, paginate) and
    /// prints one line per record plus the total match count. The same
    /// pipeline runs on either backend.
    List {
        /// Record kind: `article`, `tool`, `prompt`, `rule`, or `resource`.
        kind: String,

        /// Only records in this category.
        #[arg(long)]
        category: Option<String>,

        /// Only tools with this featured status (`true`/`false`).
        #[arg(long)]
        featured: Option<bool>,

        /// Only resources of this type.
        #[arg(long = "type")]
        resource_type: Option<String>,

        /// Only resources in this subcategory.
        #[arg(long)]
        subcategory: Option<String>,

        /// Case-insensitive substring search over the kind's text fields.
        #[arg(long)]
        search: Option<String>,

        /// Sort policy: `score`, `view_count`, `created_at`,
        /// `published_time`, or `archived_at`.
        #[arg(long, default_value = "score")]
        sort: String,

        /// Page number (1-indexed).
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Records per page.
        #[arg(long, default_value_t = 20)]
        page_size: usize,

        /// Storage backend: `db` or `snapshot`.
        #[arg(long, default_value = "db")]
        backend: String,
    },

    /// Retrieve one record by natural key.
    ///
    /// Prints the full record as pretty JSON, extension-bag fields
    /// included. Tools match on either their identifier or URL.
    Get {
        /// Record kind: `article`, `tool`, `prompt`, `rule`, or `resource`.
        kind: String,

        /// Natural key (URL, identifier, or name, depending on the kind).
        key: String,

        /// Storage backend: `db` or `snapshot`.
        #[arg(long, default_value = "db")]
        backend: String,
    },

    /// Bump a record's view counter.
    ///
    /// Only articles and tools carry counters. A missing key reports
    /// "not found" without erroring.
    View {
        /// Record kind: `article` or `tool`.
        kind: String,

        /// Natural key (URL or identifier).
        key: String,

        /// Storage backend: `db` or `snapshot`.
        #[arg(long, default_value = "db")]
        backend: String,
    },

    /// Remove an article from the relational store by URL.
    ///
    /// The snapshot keeps its copy until the next export rewrites it.
    Delete {
        /// The article's URL.
        url: String,
    },

    /// Newest articles and tools merged into one feed.
    Recent {
        /// Which kinds to include: `all`, `articles`, or `tools`.
        #[arg(long, default_value = "all")]
        filter: String,

        /// Page number (1-indexed).
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Records per page.
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Articles related to a tool.
    ///
    /// Prefers explicit tool associations on articles; falls back to fuzzy
    /// tag matching against the tool name.
    Related {
        /// The tool's identifier or URL.
        key: String,

        /// Page number (1-indexed).
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Records per page.
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Regenerate the flat-file snapshot from the database.
    Export,

    /// Run one full backup cycle.
    ///
    /// Regenerates the snapshot, commits it into the backup history, and
    /// pushes to the configured remote. A diverged remote gets one
    /// rebase-and-retry.
    Backup,

    /// Record counts per table.
    Stats,

    /// Run the backup cycle on the configured period until interrupted.
    Watch,
}

fn parse_kind(kind: &str) -> anyhow::Result<RecordKind> {
    kind.parse::<RecordKind>().map_err(anyhow::Error::msg)
}

async fn open_sqlite(cfg: &Config) -> anyhow::Result<SqliteStore> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}

async fn open_store(cfg: &Config, backend: &str) -> anyhow::Result<Box<dyn Store>> {
    match backend {
        "db" => Ok(Box::new(open_sqlite(cfg).await?)),
        "snapshot" => Ok(Box::new(SnapshotStore::new(&cfg.snapshot.dir))),
        other => bail!("unknown backend '{}'. Available: db, snapshot", other),
    }
}

/// Read one record object or an array of them from a JSON file.
fn read_records(path: &PathBuf) -> anyhow::Result<Vec<serde_json::Map<String, Value>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&text).with_context(|| "Failed to parse records file as JSON")?;
    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(values) => values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => Ok(map),
                other => bail!("expected a JSON object per record, found: {}", other),
            })
            .collect(),
        other => bail!("expected a JSON object or array of objects, found: {}", other),
    }
}

fn print_record_line(record: &Record) {
    let key = record.natural_key().unwrap_or_default();
    println!(
        "{:>6}  {}  [{}]  score={} views={}",
        record.id().map(|id| id.to_string()).unwrap_or_default(),
        record.display_name(),
        key,
        record.score(),
        record.view_count()
    );
}

fn print_report(report: &export::ExportReport) {
    println!(
        "Exported {} records into {} collections:",
        report.records_written(),
        report.collections_written
    );
    println!("  articles:  {}", report.articles);
    println!("  tools:     {}", report.tools);
    println!("  prompts:   {}", report.prompts);
    println!("  rules:     {}", report.rules);
    println!("  resources: {}", report.resources);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Archive {
            kind,
            file,
            category,
            tags,
            backend,
        } => {
            let kind = parse_kind(&kind)?;
            let store = open_store(&cfg, &backend).await?;
            let records = read_records(&file)?;

            let (mut inserted, mut updated, mut duplicates) = (0, 0, 0);
            for raw in records {
                match store.archive(kind, raw, &category, &tags).await? {
                    ArchiveOutcome::Inserted => inserted += 1,
                    ArchiveOutcome::Updated => updated += 1,
                    ArchiveOutcome::Duplicate => duplicates += 1,
                }
            }
            println!(
                "Archived {}s: {} inserted, {} updated, {} duplicates skipped.",
                kind, inserted, updated, duplicates
            );
        }
        Commands::List {
            kind,
            category,
            featured,
            resource_type,
            subcategory,
            search,
            sort,
            page,
            page_size,
            backend,
        } => {
            let kind = parse_kind(&kind)?;
            let sort_by = sort.parse::<SortBy>().map_err(anyhow::Error::msg)?;
            let store = open_store(&cfg, &backend).await?;
            let params = QueryParams {
                category,
                featured,
                resource_type,
                subcategory,
                search,
                sort_by,
                page,
                page_size,
            };
            let result = query::query(store.as_ref(), kind, &params).await?;
            println!("total: {}", result.total);
            for record in &result.records {
                print_record_line(record);
            }
        }
        Commands::Get { kind, key, backend } => {
            let kind = parse_kind(&kind)?;
            let store = open_store(&cfg, &backend).await?;
            match store.get_by_natural_key(kind, &key).await? {
                Some(record) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&Value::Object(record.to_map()))?
                    );
                }
                None => println!("No {} found for key: {}", kind, key),
            }
        }
        Commands::View { kind, key, backend } => {
            let kind = parse_kind(&kind)?;
            let store = open_store(&cfg, &backend).await?;
            if store.increment_view_count(kind, &key).await? {
                println!("View count updated.");
            } else {
                println!("No {} found for key: {}", kind, key);
            }
        }
        Commands::Delete { url } => {
            let store = open_sqlite(&cfg).await?;
            if store.delete_article(&url).await? {
                println!("Article deleted.");
            } else {
                println!("No article found for URL: {}", url);
            }
        }
        Commands::Recent {
            filter,
            page,
            page_size,
        } => {
            let filter = filter.parse::<RecentFilter>().map_err(anyhow::Error::msg)?;
            let store = open_sqlite(&cfg).await?;
            let result = query::recent_items(&store, filter, page, page_size).await?;
            println!("total: {}", result.total);
            for record in &result.records {
                print_record_line(record);
            }
        }
        Commands::Related {
            key,
            page,
            page_size,
        } => {
            let store = open_sqlite(&cfg).await?;
            let tool = match store.get_by_natural_key(RecordKind::Tool, &key).await? {
                Some(Record::Tool(tool)) => tool,
                _ => bail!("no tool found for key: {}", key),
            };
            let result = query::related_articles(&store, &tool, page, page_size).await?;
            println!("total: {}", result.total);
            for record in &result.records {
                print_record_line(record);
            }
        }
        Commands::Export => {
            let store = open_sqlite(&cfg).await?;
            let snapshot = SnapshotStore::new(&cfg.snapshot.dir);
            let report = export::write_snapshot(&store, &snapshot).await?;
            print_report(&report);
        }
        Commands::Backup => {
            let store = open_sqlite(&cfg).await?;
            let snapshot = SnapshotStore::new(&cfg.snapshot.dir);
            let vcs = GitGateway::new(&cfg.backup);
            let report = export::run_backup(&store, &snapshot, &vcs).await?;
            print_report(&report);
            if report.published {
                println!("Backup committed and pushed.");
            } else if report.committed {
                println!("Backup committed; push pending.");
            } else {
                println!("No changes to back up.");
            }
        }
        Commands::Stats => {
            let store = open_sqlite(&cfg).await?;
            println!("Record counts:");
            for kind in RecordKind::ALL {
                println!("  {:<10} {}", kind.table(), store.count(kind).await?);
            }
        }
        Commands::Watch => {
            let store = Arc::new(open_sqlite(&cfg).await?);
            let snapshot = Arc::new(SnapshotStore::new(&cfg.snapshot.dir));
            let vcs = Arc::new(GitGateway::new(&cfg.backup));
            let period = std::time::Duration::from_secs(cfg.scheduler.interval_secs);

            let scheduler = Scheduler::start(period, move || {
                let store = store.clone();
                let snapshot = snapshot.clone();
                let vcs = vcs.clone();
                async move {
                    if let Err(e) = export::run_backup(&store, &snapshot, vcs.as_ref()).await {
                        error!(error = %e, "scheduled backup failed");
                    }
                }
            });

            println!(
                "Backup scheduler running every {}s. Press Ctrl-C to stop.",
                cfg.scheduler.interval_secs
            );
            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
            println!("Scheduler stopped.");
        }
    }

    Ok(())
}
