use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating forum schema");

    // Ids are the site's own; rows are upserted by id, so no AUTOINCREMENT.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS forums (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            parent_id INTEGER
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create forums table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            avatar TEXT,
            avatar_width INTEGER,
            avatar_height INTEGER,
            location TEXT,
            rank TEXT,
            joined TEXT,
            first_video TEXT,
            signature TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY,
            forum_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            date_created TEXT,
            author_user_id INTEGER,
            is_announcement INTEGER NOT NULL DEFAULT 0,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            latest_post_date TEXT,
            latest_post_id INTEGER
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topics table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY,
            topic_id INTEGER NOT NULL,
            author_user_id INTEGER NOT NULL,
            subject TEXT NOT NULL,
            date_posted TEXT NOT NULL,
            body TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS assets (
            url TEXT PRIMARY KEY,
            file_name TEXT,
            is_fetched INTEGER NOT NULL DEFAULT 0
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create assets table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: adding lookup indexes");

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_topics_forum ON topics(forum_id)")
        .execute(pool)
        .await
        .context("Failed to create topics forum index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_topic ON posts(topic_id, date_posted)")
        .execute(pool)
        .await
        .context("Failed to create posts topic index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_user_id)")
        .execute(pool)
        .await
        .context("Failed to create posts author index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_forums_parent ON forums(parent_id)")
        .execute(pool)
        .await
        .context("Failed to create forums parent index")?;

    Ok(())
}
