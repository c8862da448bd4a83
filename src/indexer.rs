//! Indexing pipeline.
//!
//! Consumes a source adapter's object stream and merges it into the
//! hierarchy, appending revisions for created or changed objects:
//!
//! ```text
//! SourceAdapter ──▶ upsert_object ──▶ objects + revisions
//!   scan_buckets        │
//!   index (lazy)        └──▶ ProgressReporter (one tick per object)
//! ```
//!
//! Each run is recorded as a `reindex_runs` row that ends `succeeded` only
//! when the whole stream was consumed. Any error marks the run `failed` and
//! is returned to the caller. Objects committed before the error stay
//! indexed.

use sqlx::{SqliteConnection, SqlitePool};

use crate::config::{Config, SourceConfig};
use crate::error::{Result, UmetaError};
use crate::hierarchy::{count_source_objects, upsert_object, Change, ParentCache};
use crate::models::{ReindexRun, RunStatus, SourceRecord};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::runs::{finish_reindex, get_or_create_source, start_reindex};
use crate::traits::{Registry, SourceAdapter};

/// Counts for one reindex run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub source: String,
    pub run_id: i64,
    pub status: RunStatus,
    pub buckets: u64,
    /// Objects consumed from the stream.
    pub seen: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl IndexSummary {
    fn new(source: &str, run: &ReindexRun) -> Self {
        Self {
            source: source.to_string(),
            run_id: run.id,
            status: run.status,
            buckets: 0,
            seen: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
        }
    }

    fn record(&mut self, change: Change) {
        self.seen += 1;
        match change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }
}

/// Index the configured source `source_name`.
///
/// Unknown source names and types fail before anything is written.
pub async fn run_index(
    pool: &SqlitePool,
    config: &Config,
    registry: &Registry,
    source_name: &str,
    reporter: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let source_config = config
        .source(source_name)
        .ok_or_else(|| UmetaError::UnknownSource(source_name.to_string()))?;
    let adapter = registry.sources.for_source(source_config)?;

    let mut conn = pool.acquire().await?;
    index_source(&mut conn, source_config, adapter, reporter).await
}

/// Run one reindex pass of `adapter` over `source_config`.
pub async fn index_source(
    conn: &mut SqliteConnection,
    source_config: &SourceConfig,
    adapter: &dyn SourceAdapter,
    reporter: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let source =
        get_or_create_source(conn, &source_config.name, &source_config.source_type).await?;
    let mut run = start_reindex(conn, source.id).await?;
    tracing::info!(source = %source.name, run = run.id, "reindex started");

    let mut summary = IndexSummary::new(&source.name, &run);
    let outcome = consume(
        conn,
        source_config,
        adapter,
        &source,
        &run,
        &mut summary,
        reporter,
    )
    .await;

    match outcome {
        Ok(()) => {
            finish_reindex(conn, &mut run, RunStatus::Succeeded).await?;
            summary.status = run.status;
            tracing::info!(
                source = %source.name,
                run = run.id,
                seen = summary.seen,
                created = summary.created,
                updated = summary.updated,
                "reindex succeeded"
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(finish_err) = finish_reindex(conn, &mut run, RunStatus::Failed).await {
                tracing::error!(run = run.id, error = %finish_err, "could not mark reindex failed");
            }
            tracing::warn!(
                source = %source.name,
                run = run.id,
                seen = summary.seen,
                error = %err,
                "reindex failed"
            );
            Err(err)
        }
    }
}

async fn consume(
    conn: &mut SqliteConnection,
    source_config: &SourceConfig,
    adapter: &dyn SourceAdapter,
    source: &SourceRecord,
    run: &ReindexRun,
    summary: &mut IndexSummary,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let source_err = |error: anyhow::Error| UmetaError::Source {
        source_name: source.name.clone(),
        error,
    };

    let buckets = adapter.scan_buckets(source_config).map_err(source_err)?;
    let estimate = count_source_objects(conn, source.id).await? as u64;
    reporter.report(ProgressEvent::IndexStarted {
        source: source.name.clone(),
        buckets: buckets.len() as u64,
        estimate,
    });

    let mut cache = ParentCache::new();
    for bucket in &buckets {
        upsert_object(conn, bucket, run, source, &mut cache).await?;
        summary.buckets += 1;
    }

    let stream = adapter.index(source_config).map_err(source_err)?;
    for item in stream {
        let reported = item.map_err(source_err)?;
        let upserted = upsert_object(conn, &reported, run, source, &mut cache).await?;
        tracing::trace!(
            bucket = %reported.bucket,
            path = reported.path.as_deref().unwrap_or(""),
            change = ?upserted.change,
            "indexed"
        );
        summary.record(upserted.change);
        reporter.report(ProgressEvent::Indexed {
            source: source.name.clone(),
            n: summary.seen,
            estimate,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hierarchy::{find_child, get_bucket, get_object, list_descendants};
    use crate::models::{Object, ReportedObject};
    use crate::progress::tests::RecordingProgress;
    use crate::progress::NoProgress;
    use crate::revisions::{count_revisions, revisions_for};
    use crate::runs::get_reindex;
    use crate::testutil::{config_with, memory_db, source_config, StaticSource};
    use std::collections::HashSet;

    fn photos() -> Vec<ReportedObject> {
        vec![
            ReportedObject::bucket("b", 0),
            ReportedObject::directory("b", "dir", 50),
            ReportedObject::file("b", "dir/a.txt", 100, 10),
            ReportedObject::file("b", "dir/b.jpg", 100, 20),
            ReportedObject::directory("b", "dir/sub", 60),
            ReportedObject::file("b", "dir/sub/c.jpg", 70, 30),
            ReportedObject::file("b", "top.txt", 80, 5),
        ]
    }

    async fn index(
        conn: &mut SqliteConnection,
        adapter: &StaticSource,
    ) -> Result<IndexSummary> {
        index_source(conn, &source_config("s", "static", &[]), adapter, &NoProgress).await
    }

    async fn file(conn: &mut SqliteConnection, path: &str) -> Object {
        let mut current = get_bucket(conn, "b").await.unwrap().unwrap();
        for segment in path.split('/') {
            current = find_child(conn, current.id, segment).await.unwrap().unwrap();
        }
        current
    }

    #[tokio::test]
    async fn two_runs_with_changed_mtime() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = StaticSource::new(
            &["b"],
            vec![
                ReportedObject::directory("b", "dir", 50),
                ReportedObject::file("b", "dir/a.txt", 100, 10),
            ],
        );
        index(&mut conn, &first).await.unwrap();
        let dir = file(&mut conn, "dir").await;
        let dir_revisions = revisions_for(&mut conn, dir.id).await.unwrap().len();
        let total_before = count_revisions(&mut conn).await.unwrap();

        let second = StaticSource::new(
            &["b"],
            vec![
                ReportedObject::directory("b", "dir", 50),
                ReportedObject::file("b", "dir/a.txt", 200, 10),
            ],
        );
        let summary = index(&mut conn, &second).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 1);

        let a = file(&mut conn, "dir/a.txt").await;
        assert_eq!(a.modified_time, 200);
        assert_eq!(a.size, 10);
        assert_eq!(revisions_for(&mut conn, a.id).await.unwrap().len(), 2);
        assert_eq!(
            revisions_for(&mut conn, dir.id).await.unwrap().len(),
            dir_revisions
        );
        assert_eq!(count_revisions(&mut conn).await.unwrap(), total_before + 1);
    }

    #[tokio::test]
    async fn reindexing_unchanged_stream_is_idempotent() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();

        index(&mut conn, &StaticSource::new(&["b"], photos())).await.unwrap();
        let revisions = count_revisions(&mut conn).await.unwrap();
        let before = file(&mut conn, "dir/sub/c.jpg").await;

        let summary = index(&mut conn, &StaticSource::new(&["b"], photos()))
            .await
            .unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unchanged, photos().len() as u64);
        assert_eq!(count_revisions(&mut conn).await.unwrap(), revisions);

        let after = file(&mut conn, "dir/sub/c.jpg").await;
        assert_eq!(after.modified_time, before.modified_time);
        assert_eq!(after.size, before.size);
        assert_eq!(after.kind, before.kind);
        assert_eq!(after.last_changed_run, before.last_changed_run);
        assert_ne!(after.last_seen_run, before.last_seen_run);
    }

    #[tokio::test]
    async fn one_changed_file_yields_one_revision_and_all_marked_seen() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();

        index(&mut conn, &StaticSource::new(&["b"], photos())).await.unwrap();
        let revisions = count_revisions(&mut conn).await.unwrap();

        let mut changed = photos();
        changed[3] = ReportedObject::file("b", "dir/b.jpg", 999, 20);
        let summary = index(&mut conn, &StaticSource::new(&["b"], changed))
            .await
            .unwrap();
        assert_eq!(count_revisions(&mut conn).await.unwrap(), revisions + 1);

        let b = file(&mut conn, "dir/b.jpg").await;
        assert_eq!(b.last_changed_run, summary.run_id);
        let latest = revisions_for(&mut conn, b.id).await.unwrap();
        assert_eq!(latest.last().unwrap().reindex_id, summary.run_id);

        let bucket = get_bucket(&mut conn, "b").await.unwrap().unwrap();
        assert_eq!(bucket.last_seen_run, summary.run_id);
        for d in list_descendants(&mut conn, &bucket, None).await.unwrap() {
            assert_eq!(d.object.last_seen_run, summary.run_id, "{}", d.key);
        }
    }

    #[tokio::test]
    async fn every_object_has_unique_name_and_a_bucket_ancestor() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();
        index(&mut conn, &StaticSource::new(&["b"], photos())).await.unwrap();

        let bucket = get_bucket(&mut conn, "b").await.unwrap().unwrap();
        let descendants = list_descendants(&mut conn, &bucket, None).await.unwrap();
        assert_eq!(descendants.len(), photos().len() - 1);

        let mut pairs = HashSet::new();
        for d in &descendants {
            assert!(pairs.insert((d.object.parent_id, d.object.name.clone())));
            assert!(d.object.source_id.is_none());

            let mut current = d.object.clone();
            while let Some(parent_id) = current.parent_id {
                current = get_object(&mut conn, parent_id).await.unwrap().unwrap();
            }
            assert_eq!(current.id, bucket.id);
        }
    }

    #[tokio::test]
    async fn missing_ancestor_fails_run_but_keeps_prior_objects() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();

        let adapter = StaticSource::new(
            &["b"],
            vec![
                ReportedObject::file("b", "ok.txt", 1, 1),
                ReportedObject::file("b", "dir/a.txt", 100, 10),
                ReportedObject::file("b", "never.txt", 1, 1),
            ],
        );
        let err = index(&mut conn, &adapter).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);

        let bucket = get_bucket(&mut conn, "b").await.unwrap().unwrap();
        assert!(find_child(&mut conn, bucket.id, "ok.txt").await.unwrap().is_some());
        assert!(find_child(&mut conn, bucket.id, "dir").await.unwrap().is_none());
        assert!(find_child(&mut conn, bucket.id, "never.txt").await.unwrap().is_none());

        let run = get_reindex(&mut conn, bucket.last_seen_run).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.ended_at.is_some());
    }

    #[tokio::test]
    async fn stream_into_another_sources_bucket_fails_run() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();
        index(&mut conn, &StaticSource::new(&["b"], Vec::new()))
            .await
            .unwrap();

        let intruder = StaticSource::new(&["z"], vec![ReportedObject::file("b", "evil.txt", 1, 1)]);
        let err = index_source(
            &mut conn,
            &source_config("z", "static", &[]),
            &intruder,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let bucket = get_bucket(&mut conn, "b").await.unwrap().unwrap();
        assert!(find_child(&mut conn, bucket.id, "evil.txt").await.unwrap().is_none());
        let status: String =
            sqlx::query_scalar("SELECT status FROM reindex_runs ORDER BY id DESC LIMIT 1")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(status, "failed");
    }

    #[tokio::test]
    async fn source_stream_error_fails_run() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();

        let mut adapter = StaticSource::new(&["b"], photos());
        adapter.fail_at = Some(2);
        let err = index(&mut conn, &adapter).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Source);

        let status: String =
            sqlx::query_scalar("SELECT status FROM reindex_runs ORDER BY id DESC LIMIT 1")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(status, "failed");
    }

    #[tokio::test]
    async fn progress_ticks_once_per_object() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let reporter = RecordingProgress::default();

        index_source(
            &mut conn,
            &source_config("s", "static", &[]),
            &StaticSource::new(&["b"], photos()),
            &reporter,
        )
        .await
        .unwrap();

        let events = reporter.events.lock().unwrap();
        let ticks = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Indexed { .. }))
            .count();
        assert_eq!(ticks, photos().len());
        assert!(matches!(events[0], ProgressEvent::IndexStarted { buckets: 1, .. }));
    }

    #[tokio::test]
    async fn unknown_source_fails_before_any_write() {
        let pool = memory_db().await;
        let config = config_with(vec![source_config("s", "nope", &[])]);
        let registry = Registry::with_builtins();

        let err = run_index(&pool, &config, &registry, "missing", &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, UmetaError::UnknownSource(_)));

        let err = run_index(&pool, &config, &registry, "s", &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, UmetaError::UnknownSourceType { .. }));

        let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(sources, 0);
    }
}
