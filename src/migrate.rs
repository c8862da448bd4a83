use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Configured sources, one row per name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reindex_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            status TEXT NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Object hierarchy. Roots have no parent and name their source.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS objects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            modified_time INTEGER NOT NULL,
            size INTEGER NOT NULL,
            parent_id INTEGER,
            source_id INTEGER,
            last_changed_run INTEGER NOT NULL,
            last_seen_run INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(name, parent_id),
            CHECK ((parent_id IS NULL) = (source_id IS NOT NULL)),
            FOREIGN KEY (parent_id) REFERENCES objects(id),
            FOREIGN KEY (source_id) REFERENCES sources(id),
            FOREIGN KEY (last_changed_run) REFERENCES reindex_runs(id),
            FOREIGN KEY (last_seen_run) REFERENCES reindex_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // UNIQUE(name, parent_id) does not constrain NULL parents
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_objects_root_name ON objects(name) WHERE parent_id IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_id INTEGER NOT NULL,
            reindex_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (object_id) REFERENCES objects(id),
            FOREIGN KEY (reindex_id) REFERENCES reindex_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generator_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            source_id INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            status TEXT NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS derivatives (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            generator_name TEXT NOT NULL,
            generator_version TEXT NOT NULL,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            object_id INTEGER NOT NULL,
            generator_run_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(generator_name, generator_version, name, type, object_id),
            FOREIGN KEY (object_id) REFERENCES objects(id),
            FOREIGN KEY (generator_run_id) REFERENCES generator_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            derivative_id INTEGER NOT NULL,
            object_id INTEGER NOT NULL,
            revision_id INTEGER NOT NULL,
            UNIQUE(derivative_id, object_id),
            FOREIGN KEY (derivative_id) REFERENCES derivatives(id),
            FOREIGN KEY (object_id) REFERENCES objects(id),
            FOREIGN KEY (revision_id) REFERENCES revisions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_parent ON objects(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_source ON objects(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_revisions_object ON revisions(object_id, id DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_generator_runs_lookup ON generator_runs(source_id, name, version, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dependencies_derivative ON dependencies(derivative_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
