//! Object hierarchy store.
//!
//! Objects form a tree keyed by `(name, parent)`. Bucket roots have no
//! parent and carry the id of the source that owns them; every other
//! object has a parent and no source.
//!
//! [`upsert_object`] is the merge primitive used by the indexer. It
//! resolves the parent chain through a run-scoped [`ParentCache`], then
//! creates, updates, or merely marks the object as seen, appending a
//! revision whenever the object is created or its observable state changes.

use sqlx::{Connection, Row, SqliteConnection};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Result, UmetaError};
use crate::models::{Descendant, Object, ObjectKind, ReindexRun, ReportedObject, SourceRecord};
use crate::revisions::record_revision;
use crate::runs::now;

/// Per-run memo of resolved directories.
///
/// Keyed by `(parent id, child name)`. Create one per reindex run and drop
/// it when the run ends; entries are never valid across runs.
#[derive(Debug, Default)]
pub struct ParentCache {
    buckets: HashMap<String, Object>,
    children: HashMap<(i64, String), Object>,
}

impl ParentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len() + self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn child(&self, parent_id: i64, name: &str) -> Option<&Object> {
        self.children.get(&(parent_id, name.to_string()))
    }

    fn remember(&mut self, object: &Object) {
        match object.parent_id {
            None => {
                self.buckets.insert(object.name.clone(), object.clone());
            }
            Some(parent_id) => {
                let key = (parent_id, object.name.clone());
                if object.is_directory() {
                    self.children.insert(key, object.clone());
                } else {
                    self.children.remove(&key);
                }
            }
        }
    }
}

/// What [`upsert_object`] did with a reported object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Upserted {
    pub object: Object,
    pub change: Change,
}

fn select_objects(filter: &str) -> String {
    format!("SELECT {} FROM objects WHERE {}", Object::COLUMNS, filter)
}

pub async fn get_object(conn: &mut SqliteConnection, id: i64) -> Result<Option<Object>> {
    let row = sqlx::query(&select_objects("id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(Object::from_row).transpose()?)
}

/// The root object named `name`, if any.
pub async fn get_bucket(conn: &mut SqliteConnection, name: &str) -> Result<Option<Object>> {
    let row = sqlx::query(&select_objects("parent_id IS NULL AND name = ?"))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(Object::from_row).transpose()?)
}

/// Fetch or create the bucket root `name` owned by `source`.
///
/// An existing bucket is never diffed; it is only marked as seen by `run`.
/// A bucket owned by a different source is a configuration error.
pub async fn get_or_create_bucket(
    conn: &mut SqliteConnection,
    name: &str,
    run: &ReindexRun,
    source: &SourceRecord,
) -> Result<Upserted> {
    let mut tx = conn.begin().await?;

    let upserted = match get_bucket(&mut tx, name).await? {
        Some(mut bucket) => {
            if bucket.source_id != Some(source.id) {
                return Err(UmetaError::BucketOwnedElsewhere {
                    bucket: name.to_string(),
                    owner: bucket.source_id.unwrap_or_default(),
                });
            }
            mark_seen(&mut tx, &mut bucket, run).await?;
            Upserted {
                object: bucket,
                change: Change::Unchanged,
            }
        }
        None => {
            let result = sqlx::query(
                r#"
                INSERT INTO objects (name, kind, modified_time, size, parent_id, source_id,
                                     last_changed_run, last_seen_run, created_at)
                VALUES (?, ?, ?, 0, NULL, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(ObjectKind::Directory.as_str())
            .bind(run.started_at)
            .bind(source.id)
            .bind(run.id)
            .bind(run.id)
            .bind(now())
            .execute(&mut *tx)
            .await?;

            let object = Object {
                id: result.last_insert_rowid(),
                name: name.to_string(),
                kind: ObjectKind::Directory,
                modified_time: run.started_at,
                size: 0,
                parent_id: None,
                source_id: Some(source.id),
                last_changed_run: run.id,
                last_seen_run: run.id,
            };
            record_revision(&mut tx, object.id, run.id).await?;
            tracing::debug!(bucket = name, id = object.id, "created bucket");
            Upserted {
                object,
                change: Change::Created,
            }
        }
    };

    tx.commit().await?;
    Ok(upserted)
}

/// Look up the child of `parent_id` named `name`.
pub async fn find_child(
    conn: &mut SqliteConnection,
    parent_id: i64,
    name: &str,
) -> Result<Option<Object>> {
    let row = sqlx::query(&select_objects("parent_id = ? AND name = ?"))
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(Object::from_row).transpose()?)
}

/// Direct children of `parent_id`, ordered by name.
pub async fn children(conn: &mut SqliteConnection, parent_id: i64) -> Result<Vec<Object>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY name",
        select_objects("parent_id = ?")
    ))
    .bind(parent_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Object::from_row(row).map_err(Into::into))
        .collect()
}

/// Resolve the directory at `dir` (relative to `bucket`), walking down from
/// the bucket root one segment at a time.
///
/// Every ancestor must already exist; nothing is created here. Each
/// resolved directory is memoized in `cache`. The bucket must be owned by
/// `source`.
pub async fn resolve_parent(
    conn: &mut SqliteConnection,
    bucket: &str,
    dir: &str,
    source: &SourceRecord,
    cache: &mut ParentCache,
) -> Result<Object> {
    let mut current = match cache.buckets.get(bucket) {
        Some(root) => root.clone(),
        None => {
            let root = get_bucket(conn, bucket)
                .await?
                .ok_or_else(|| UmetaError::MissingAncestor {
                    bucket: bucket.to_string(),
                    path: dir.to_string(),
                    missing: bucket.to_string(),
                })?;
            cache.remember(&root);
            root
        }
    };
    if current.source_id != Some(source.id) {
        return Err(UmetaError::BucketOwnedElsewhere {
            bucket: bucket.to_string(),
            owner: current.source_id.unwrap_or_default(),
        });
    }

    let mut walked = String::new();
    for segment in dir.split('/').filter(|s| !s.is_empty()) {
        if !walked.is_empty() {
            walked.push('/');
        }
        walked.push_str(segment);

        let next = match cache.child(current.id, segment) {
            Some(hit) => hit.clone(),
            None => find_child(conn, current.id, segment).await?.ok_or_else(|| {
                UmetaError::MissingAncestor {
                    bucket: bucket.to_string(),
                    path: dir.to_string(),
                    missing: walked.clone(),
                }
            })?,
        };

        if !next.is_directory() {
            return Err(UmetaError::NotADirectory {
                bucket: bucket.to_string(),
                path: dir.to_string(),
                segment: walked,
            });
        }

        cache.remember(&next);
        current = next;
    }

    Ok(current)
}

/// Merge one reported object into the hierarchy.
///
/// The object write and its revision (if any) commit together; earlier
/// objects of the same run stay committed if a later one fails.
pub async fn upsert_object(
    conn: &mut SqliteConnection,
    reported: &ReportedObject,
    run: &ReindexRun,
    source: &SourceRecord,
    cache: &mut ParentCache,
) -> Result<Upserted> {
    let segments: Vec<&str> = reported
        .path
        .as_deref()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let Some((name, ancestors)) = segments.split_last() else {
        let upserted = get_or_create_bucket(conn, &reported.bucket, run, source).await?;
        cache.remember(&upserted.object);
        return Ok(upserted);
    };

    let parent =
        resolve_parent(conn, &reported.bucket, &ancestors.join("/"), source, cache).await?;

    let mut tx = conn.begin().await?;
    let upserted = match find_child(&mut tx, parent.id, name).await? {
        None => {
            let object = insert_child(&mut tx, &parent, name, reported, run).await?;
            record_revision(&mut tx, object.id, run.id).await?;
            Upserted {
                object,
                change: Change::Created,
            }
        }
        Some(mut existing) if existing.differs_from(reported) => {
            existing.kind = reported.kind;
            existing.size = reported.size;
            existing.modified_time = reported.modified_time;
            existing.last_changed_run = run.id;
            existing.last_seen_run = run.id;
            sqlx::query(
                r#"
                UPDATE objects
                SET kind = ?, size = ?, modified_time = ?, last_changed_run = ?, last_seen_run = ?
                WHERE id = ?
                "#,
            )
            .bind(existing.kind.as_str())
            .bind(existing.size)
            .bind(existing.modified_time)
            .bind(run.id)
            .bind(run.id)
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;
            record_revision(&mut tx, existing.id, run.id).await?;
            Upserted {
                object: existing,
                change: Change::Updated,
            }
        }
        Some(mut existing) => {
            mark_seen(&mut tx, &mut existing, run).await?;
            Upserted {
                object: existing,
                change: Change::Unchanged,
            }
        }
    };
    tx.commit().await?;

    cache.remember(&upserted.object);
    Ok(upserted)
}

async fn insert_child(
    conn: &mut SqliteConnection,
    parent: &Object,
    name: &str,
    reported: &ReportedObject,
    run: &ReindexRun,
) -> Result<Object> {
    let result = sqlx::query(
        r#"
        INSERT INTO objects (name, kind, modified_time, size, parent_id, source_id,
                             last_changed_run, last_seen_run, created_at)
        VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(reported.kind.as_str())
    .bind(reported.modified_time)
    .bind(reported.size)
    .bind(parent.id)
    .bind(run.id)
    .bind(run.id)
    .bind(now())
    .execute(&mut *conn)
    .await?;

    Ok(Object {
        id: result.last_insert_rowid(),
        name: name.to_string(),
        kind: reported.kind,
        modified_time: reported.modified_time,
        size: reported.size,
        parent_id: Some(parent.id),
        source_id: None,
        last_changed_run: run.id,
        last_seen_run: run.id,
    })
}

async fn mark_seen(conn: &mut SqliteConnection, object: &mut Object, run: &ReindexRun) -> Result<()> {
    if object.last_seen_run == run.id {
        return Ok(());
    }
    sqlx::query("UPDATE objects SET last_seen_run = ? WHERE id = ?")
        .bind(run.id)
        .bind(object.id)
        .execute(&mut *conn)
        .await?;
    object.last_seen_run = run.id;
    Ok(())
}

/// Every transitive descendant of `root`, breadth first, siblings by name.
///
/// With `modified_since`, only objects whose `modified_time` is at or after
/// it are returned, but traversal still descends through older directories.
/// Revisiting an object means the parent links form a cycle, which is fatal.
pub async fn list_descendants(
    conn: &mut SqliteConnection,
    root: &Object,
    modified_since: Option<i64>,
) -> Result<Vec<Descendant>> {
    let mut out = Vec::new();
    let mut visited = HashSet::from([root.id]);
    let mut frontier = vec![(root.id, String::new())];
    let mut depth = 0u32;

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for (parent_id, parent_key) in &frontier {
            for child in children(conn, *parent_id).await? {
                if !visited.insert(child.id) {
                    return Err(UmetaError::HierarchyCycle {
                        object_id: child.id,
                    });
                }
                let key = if parent_key.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", parent_key, child.name)
                };
                next.push((child.id, key.clone()));
                if modified_since.map_or(true, |since| child.modified_time >= since) {
                    out.push(Descendant {
                        object: child,
                        depth,
                        key,
                    });
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(out)
}

/// Bucket roots owned by a source, ordered by name.
pub async fn buckets_for_source(conn: &mut SqliteConnection, source_id: i64) -> Result<Vec<Object>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY name",
        select_objects("parent_id IS NULL AND source_id = ?")
    ))
    .bind(source_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Object::from_row(row).map_err(Into::into))
        .collect()
}

/// Buckets grouped by source name, optionally restricted to one source.
pub async fn list_buckets(
    conn: &mut SqliteConnection,
    source_name: Option<&str>,
) -> Result<BTreeMap<String, Vec<Object>>> {
    let rows = sqlx::query(
        r#"
        SELECT s.name AS source_name,
               o.id, o.name, o.kind, o.modified_time, o.size, o.parent_id, o.source_id,
               o.last_changed_run, o.last_seen_run
        FROM objects o
        JOIN sources s ON s.id = o.source_id
        WHERE o.parent_id IS NULL AND (? IS NULL OR s.name = ?)
        ORDER BY s.name, o.name
        "#,
    )
    .bind(source_name)
    .bind(source_name)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: BTreeMap<String, Vec<Object>> = BTreeMap::new();
    for row in &rows {
        let source: String = row.try_get("source_name")?;
        grouped.entry(source).or_default().push(Object::from_row(row)?);
    }
    Ok(grouped)
}

/// Number of objects reachable from the buckets of a source, buckets included.
pub async fn count_source_objects(conn: &mut SqliteConnection, source_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        WITH RECURSIVE tree(id) AS (
            SELECT id FROM objects WHERE parent_id IS NULL AND source_id = ?
            UNION
            SELECT o.id FROM objects o JOIN tree t ON o.parent_id = t.id
        )
        SELECT COUNT(*) FROM tree
        "#,
    )
    .bind(source_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
