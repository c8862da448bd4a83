//! Source rows and run lifecycle bookkeeping.
//!
//! Reindex runs and generator runs share one state machine:
//! `running → succeeded | failed`. A run interrupted mid-flight stays
//! `running` and is left for manual recovery.

use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::{GeneratorRun, ReindexRun, RunStatus, SourceRecord};

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn find_source(conn: &mut SqliteConnection, name: &str) -> Result<Option<SourceRecord>> {
    let row: Option<(i64, String, String)> =
        sqlx::query_as("SELECT id, name, type FROM sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(row.map(|(id, name, source_type)| SourceRecord {
        id,
        name,
        source_type,
    }))
}

/// Fetch the row for a configured source, creating it on first use.
pub async fn get_or_create_source(
    conn: &mut SqliteConnection,
    name: &str,
    source_type: &str,
) -> Result<SourceRecord> {
    sqlx::query(
        r#"
        INSERT INTO sources (name, type, created_at) VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET type = excluded.type
        "#,
    )
    .bind(name)
    .bind(source_type)
    .bind(now())
    .execute(&mut *conn)
    .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM sources WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

    Ok(SourceRecord {
        id,
        name: name.to_string(),
        source_type: source_type.to_string(),
    })
}

pub async fn start_reindex(conn: &mut SqliteConnection, source_id: i64) -> Result<ReindexRun> {
    let started_at = now();
    let result = sqlx::query(
        "INSERT INTO reindex_runs (source_id, started_at, ended_at, status) VALUES (?, ?, NULL, ?)",
    )
    .bind(source_id)
    .bind(started_at)
    .bind(RunStatus::Running.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(ReindexRun {
        id: result.last_insert_rowid(),
        source_id,
        started_at,
        ended_at: None,
        status: RunStatus::Running,
    })
}

pub async fn finish_reindex(
    conn: &mut SqliteConnection,
    run: &mut ReindexRun,
    status: RunStatus,
) -> Result<()> {
    let ended_at = now();
    sqlx::query("UPDATE reindex_runs SET status = ?, ended_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(ended_at)
        .bind(run.id)
        .execute(&mut *conn)
        .await?;

    run.status = status;
    run.ended_at = Some(ended_at);
    Ok(())
}

pub async fn get_reindex(conn: &mut SqliteConnection, id: i64) -> Result<Option<ReindexRun>> {
    let row = sqlx::query(
        "SELECT id, source_id, started_at, ended_at, status FROM reindex_runs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(ReindexRun::from_row).transpose()?)
}

pub async fn start_generator_run(
    conn: &mut SqliteConnection,
    name: &str,
    version: &str,
    source_id: i64,
) -> Result<GeneratorRun> {
    let started_at = now();
    let result = sqlx::query(
        r#"
        INSERT INTO generator_runs (name, version, source_id, started_at, ended_at, status)
        VALUES (?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(name)
    .bind(version)
    .bind(source_id)
    .bind(started_at)
    .bind(RunStatus::Running.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(GeneratorRun {
        id: result.last_insert_rowid(),
        name: name.to_string(),
        version: version.to_string(),
        source_id,
        started_at,
        ended_at: None,
        status: RunStatus::Running,
    })
}

pub async fn finish_generator_run(
    conn: &mut SqliteConnection,
    run: &mut GeneratorRun,
    status: RunStatus,
) -> Result<()> {
    let ended_at = now();
    sqlx::query("UPDATE generator_runs SET status = ?, ended_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(ended_at)
        .bind(run.id)
        .execute(&mut *conn)
        .await?;

    run.status = status;
    run.ended_at = Some(ended_at);
    Ok(())
}

/// Most recent succeeded run of `(name, version)` against a source.
///
/// A different version never matches, so a version bump drops the baseline.
pub async fn last_successful_generator_run(
    conn: &mut SqliteConnection,
    source_id: i64,
    name: &str,
    version: &str,
) -> Result<Option<GeneratorRun>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, version, source_id, started_at, ended_at, status
        FROM generator_runs
        WHERE source_id = ? AND name = ? AND version = ? AND status = ?
        ORDER BY started_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(source_id)
    .bind(name)
    .bind(version)
    .bind(RunStatus::Succeeded.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(GeneratorRun::from_row).transpose()?)
}
