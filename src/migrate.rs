use anyhow::Result;
use sqlx::SqlitePool;

/// Create the five entity tables and their indexes. Idempotent; archival
/// and counter operations are natural-key point lookups, so every natural
/// key carries a unique index.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            summary TEXT,
            source TEXT,
            category TEXT,
            published_time TEXT,
            created_at TEXT,
            archived_at TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            tool_tags TEXT NOT NULL DEFAULT '[]',
            extra_data TEXT NOT NULL DEFAULT '{}',
            created_at_db TEXT NOT NULL,
            updated_at_db TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tools (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT UNIQUE,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            description TEXT,
            category TEXT,
            is_featured INTEGER NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            extra_data TEXT NOT NULL DEFAULT '{}',
            created_at_db TEXT NOT NULL,
            updated_at_db TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            content TEXT NOT NULL,
            category TEXT,
            extra_data TEXT NOT NULL DEFAULT '{}',
            created_at_db TEXT NOT NULL,
            updated_at_db TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            content TEXT NOT NULL,
            category TEXT,
            extra_data TEXT NOT NULL DEFAULT '{}',
            created_at_db TEXT NOT NULL,
            updated_at_db TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            description TEXT,
            type TEXT,
            category TEXT,
            subcategory TEXT,
            created_at TEXT,
            extra_data TEXT NOT NULL DEFAULT '{}',
            created_at_db TEXT NOT NULL,
            updated_at_db TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Category and counter indexes for the query engine's hot paths.
    let index_ddl = [
        "CREATE INDEX IF NOT EXISTS idx_articles_category_archived ON articles(category, archived_at)",
        "CREATE INDEX IF NOT EXISTS idx_articles_view_count ON articles(view_count)",
        "CREATE INDEX IF NOT EXISTS idx_tools_category_featured ON tools(category, is_featured)",
        "CREATE INDEX IF NOT EXISTS idx_tools_view_count ON tools(view_count)",
        "CREATE INDEX IF NOT EXISTS idx_tools_url ON tools(url)",
        "CREATE INDEX IF NOT EXISTS idx_prompts_category ON prompts(category)",
        "CREATE INDEX IF NOT EXISTS idx_rules_category ON rules(category)",
        "CREATE INDEX IF NOT EXISTS idx_resources_type_category ON resources(type, category)",
    ];
    for ddl in index_ddl {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
