//! Append-only revision ledger.
//!
//! A revision records that an object was created or changed state during a
//! reindex run. Rows are never updated or deleted; the latest revision of an
//! object is the one with the highest id.

use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::Revision;
use crate::runs::now;

pub async fn record_revision(
    conn: &mut SqliteConnection,
    object_id: i64,
    reindex_id: i64,
) -> Result<Revision> {
    let created_at = now();
    let result =
        sqlx::query("INSERT INTO revisions (object_id, reindex_id, created_at) VALUES (?, ?, ?)")
            .bind(object_id)
            .bind(reindex_id)
            .bind(created_at)
            .execute(&mut *conn)
            .await?;

    Ok(Revision {
        id: result.last_insert_rowid(),
        object_id,
        reindex_id,
        created_at,
    })
}

/// The most recent revision of an object, or `None` if it has never been revised.
pub async fn latest_revision(
    conn: &mut SqliteConnection,
    object_id: i64,
) -> Result<Option<Revision>> {
    let row = sqlx::query(
        r#"
        SELECT id, object_id, reindex_id, created_at
        FROM revisions
        WHERE object_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(object_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(Revision::from_row).transpose()?)
}

/// Every revision of an object, oldest first.
pub async fn revisions_for(conn: &mut SqliteConnection, object_id: i64) -> Result<Vec<Revision>> {
    let rows = sqlx::query(
        "SELECT id, object_id, reindex_id, created_at FROM revisions WHERE object_id = ? ORDER BY id",
    )
    .bind(object_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Revision::from_row(row).map_err(Into::into))
        .collect()
}

pub async fn count_revisions(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revisions")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
