//! Dependency staleness resolution.
//!
//! A derivative is identified by `(generator name, generator version,
//! derivative name, type, primary object)` and owns one dependency edge per
//! input object, pinned to the revision it was last computed against.
//!
//! [`resolve`] compares each edge with the latest revision of its object by
//! revision id. Any mismatch makes the derivative stale; a derivative with no
//! row yet is new. Pins only move in [`commit`], which the coordinator calls
//! after the generator has computed the derivative successfully.

use sqlx::{Connection, SqliteConnection};
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{Dependency, Derivative, GeneratorRun, Object, ProposedDerivative};
use crate::revisions::latest_revision;
use crate::runs::now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No derivative row existed; it must be computed.
    New,
    /// At least one dependency moved since the last computation.
    Stale,
    /// Every dependency is still at its pinned revision.
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The pinned revision is no longer the object's latest.
    RevisionChanged,
    /// The dependency has no edge yet.
    Unpinned,
    /// The object has no revision at all, so it can never be pinned.
    Untracked,
}

/// A dependency edge that needs (re)pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEdge {
    pub object_id: i64,
    pub pinned_revision: Option<i64>,
    pub latest_revision: Option<i64>,
    pub reason: StaleReason,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub derivative: Derivative,
    pub verdict: Verdict,
    /// Edges to replace once the derivative has been recomputed.
    pub changed: Vec<StaleEdge>,
    declared: Vec<i64>,
}

impl Resolution {
    pub fn needs_compute(&self) -> bool {
        self.verdict != Verdict::Current
    }
}

pub async fn find_derivative(
    conn: &mut SqliteConnection,
    run: &GeneratorRun,
    object: &Object,
    proposal: &ProposedDerivative,
) -> Result<Option<Derivative>> {
    let row = sqlx::query(
        r#"
        SELECT id, generator_name, generator_version, name, type, object_id, generator_run_id
        FROM derivatives
        WHERE generator_name = ? AND generator_version = ? AND name = ? AND type = ? AND object_id = ?
        "#,
    )
    .bind(&run.name)
    .bind(&run.version)
    .bind(&proposal.name)
    .bind(proposal.derivative_type.as_str())
    .bind(object.id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(Derivative::from_row).transpose()?)
}

pub async fn dependencies_of(
    conn: &mut SqliteConnection,
    derivative_id: i64,
) -> Result<Vec<Dependency>> {
    let rows = sqlx::query(
        "SELECT id, derivative_id, object_id, revision_id FROM dependencies WHERE derivative_id = ? ORDER BY object_id",
    )
    .bind(derivative_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Dependency::from_row(row).map_err(Into::into))
        .collect()
}

async fn create_derivative(
    conn: &mut SqliteConnection,
    run: &GeneratorRun,
    object: &Object,
    proposal: &ProposedDerivative,
) -> Result<Derivative> {
    let result = sqlx::query(
        r#"
        INSERT INTO derivatives (generator_name, generator_version, name, type, object_id,
                                 generator_run_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.name)
    .bind(&run.version)
    .bind(&proposal.name)
    .bind(proposal.derivative_type.as_str())
    .bind(object.id)
    .bind(run.id)
    .bind(now())
    .execute(&mut *conn)
    .await?;

    Ok(Derivative {
        id: result.last_insert_rowid(),
        generator_name: run.name.clone(),
        generator_version: run.version.clone(),
        name: proposal.name.clone(),
        derivative_type: proposal.derivative_type,
        object_id: object.id,
        generator_run_id: run.id,
    })
}

fn declared_ids(proposal: &ProposedDerivative) -> Vec<i64> {
    let mut seen = HashSet::new();
    proposal
        .dependencies
        .iter()
        .map(|d| d.id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Decide whether the proposed derivative of `object` must be computed.
///
/// Creates the derivative row on first sight. Dependency edges are left
/// untouched; see [`commit`].
pub async fn resolve(
    conn: &mut SqliteConnection,
    run: &GeneratorRun,
    object: &Object,
    proposal: &ProposedDerivative,
) -> Result<Resolution> {
    let declared = declared_ids(proposal);

    let Some(derivative) = find_derivative(conn, run, object, proposal).await? else {
        let derivative = create_derivative(conn, run, object, proposal).await?;
        let mut changed = Vec::with_capacity(declared.len());
        for object_id in &declared {
            let latest = latest_revision(conn, *object_id).await?.map(|r| r.id);
            changed.push(StaleEdge {
                object_id: *object_id,
                pinned_revision: None,
                latest_revision: latest,
                reason: if latest.is_some() {
                    StaleReason::Unpinned
                } else {
                    StaleReason::Untracked
                },
            });
        }
        return Ok(Resolution {
            derivative,
            verdict: Verdict::New,
            changed,
            declared,
        });
    };

    let edges = dependencies_of(conn, derivative.id).await?;
    let mut changed = Vec::new();

    for edge in &edges {
        let latest = latest_revision(conn, edge.object_id).await?.map(|r| r.id);
        if latest != Some(edge.revision_id) {
            changed.push(StaleEdge {
                object_id: edge.object_id,
                pinned_revision: Some(edge.revision_id),
                latest_revision: latest,
                reason: if latest.is_some() {
                    StaleReason::RevisionChanged
                } else {
                    StaleReason::Untracked
                },
            });
        }
    }

    for object_id in &declared {
        if edges.iter().any(|e| e.object_id == *object_id) {
            continue;
        }
        let latest = latest_revision(conn, *object_id).await?.map(|r| r.id);
        changed.push(StaleEdge {
            object_id: *object_id,
            pinned_revision: None,
            latest_revision: latest,
            reason: if latest.is_some() {
                StaleReason::Unpinned
            } else {
                StaleReason::Untracked
            },
        });
    }

    let verdict = if changed.is_empty() {
        Verdict::Current
    } else {
        Verdict::Stale
    };

    Ok(Resolution {
        derivative,
        verdict,
        changed,
        declared,
    })
}

/// Pin the changed edges of a successfully recomputed derivative.
///
/// Edges are pinned to the revisions observed by [`resolve`], so a change
/// that lands during computation is still detected next time. Edges to
/// objects the generator no longer declares are dropped.
pub async fn commit(
    conn: &mut SqliteConnection,
    resolution: &Resolution,
    run: &GeneratorRun,
) -> Result<()> {
    let mut tx = conn.begin().await?;
    let derivative_id = resolution.derivative.id;

    for edge in &resolution.changed {
        sqlx::query("DELETE FROM dependencies WHERE derivative_id = ? AND object_id = ?")
            .bind(derivative_id)
            .bind(edge.object_id)
            .execute(&mut *tx)
            .await?;

        if let Some(revision_id) = edge.latest_revision {
            sqlx::query(
                "INSERT INTO dependencies (derivative_id, object_id, revision_id) VALUES (?, ?, ?)",
            )
            .bind(derivative_id)
            .bind(edge.object_id)
            .bind(revision_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    for edge in dependencies_of(&mut tx, derivative_id).await? {
        if !resolution.declared.contains(&edge.object_id) {
            sqlx::query("DELETE FROM dependencies WHERE id = ?")
                .bind(edge.id)
                .execute(&mut *tx)
                .await?;
        }
    }

    sqlx::query("UPDATE derivatives SET generator_run_id = ? WHERE id = ?")
        .bind(run.id)
        .bind(derivative_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
