//! Read-only views: configured sources, buckets, and bucket trees.
//!
//! Used by `umeta sources`, `umeta buckets`, and `umeta ls`. Each command has
//! a query function returning rows and a `run_*` wrapper that prints them.

use anyhow::{bail, Result};
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::hierarchy::{get_bucket, list_buckets, list_descendants};
use crate::models::{Descendant, Object};
use crate::traits::Registry;

/// One row of `umeta sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub name: String,
    pub source_type: String,
    pub generators: Vec<String>,
    /// `None` when healthy, otherwise why the source cannot run.
    pub problem: Option<String>,
}

/// Check every configured source against the registry without touching the
/// database.
pub fn source_statuses(config: &Config, registry: &Registry) -> Vec<SourceStatus> {
    config
        .sources
        .iter()
        .map(|source| {
            let problem = match registry.sources.for_source(source) {
                Err(e) => Some(e.to_string()),
                Ok(adapter) => match registry.generators.for_source(source) {
                    Err(e) => Some(e.to_string()),
                    Ok(_) => adapter.check(source).err().map(|e| format!("{:#}", e)),
                },
            };
            SourceStatus {
                name: source.name.clone(),
                source_type: source.source_type.clone(),
                generators: source.generators.clone(),
                problem,
            }
        })
        .collect()
}

pub fn list_sources(config: &Config, registry: &Registry) -> Result<()> {
    let statuses = source_statuses(config, registry);
    if statuses.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:<24} HEALTHY",
        "SOURCE", "TYPE", "GENERATORS"
    );
    for status in &statuses {
        let generators = if status.generators.is_empty() {
            "-".to_string()
        } else {
            status.generators.join(",")
        };
        println!(
            "{:<16} {:<10} {:<24} {}",
            status.name,
            status.source_type,
            generators,
            status.problem.is_none()
        );
    }
    for status in statuses.iter().filter(|s| s.problem.is_some()) {
        if let Some(problem) = &status.problem {
            eprintln!("  {}: {}", status.name, problem);
        }
    }
    Ok(())
}

/// Every descendant of the named bucket, breadth first.
pub async fn bucket_tree(conn: &mut SqliteConnection, bucket: &str) -> Result<(Object, Vec<Descendant>)> {
    let Some(root) = get_bucket(conn, bucket).await? else {
        bail!("bucket not found: {}", bucket);
    };
    let descendants = list_descendants(conn, &root, None).await?;
    Ok((root, descendants))
}

/// Render a bucket tree, one object per line, indented by depth.
pub fn render_tree(root: &Object, descendants: &[Descendant]) -> Vec<String> {
    let mut ordered: Vec<&Descendant> = descendants.iter().collect();
    // Keys sort parents directly before their contents.
    ordered.sort_by(|a, b| a.key.split('/').cmp(b.key.split('/')));

    let mut lines = vec![format!("{}/", root.name)];
    for d in ordered {
        let indent = "  ".repeat(d.depth as usize + 1);
        if d.object.is_directory() {
            lines.push(format!("{}{}/", indent, d.object.name));
        } else {
            lines.push(format!("{}{}  ({} bytes)", indent, d.object.name, d.object.size));
        }
    }
    lines
}

pub async fn run_ls(config: &Config, bucket: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let (root, descendants) = bucket_tree(&mut conn, bucket).await?;
    drop(conn);
    pool.close().await;

    for line in render_tree(&root, &descendants) {
        println!("{}", line);
    }
    Ok(())
}

pub async fn buckets_by_source(
    conn: &mut SqliteConnection,
    source: Option<&str>,
) -> Result<BTreeMap<String, Vec<Object>>> {
    Ok(list_buckets(conn, source).await?)
}

pub async fn run_buckets(config: &Config, source: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let grouped = buckets_by_source(&mut conn, source).await?;
    drop(conn);
    pool.close().await;

    if grouped.is_empty() {
        match source {
            Some(name) => println!("No buckets indexed for source '{}'.", name),
            None => println!("No buckets indexed."),
        }
        return Ok(());
    }

    for (source, buckets) in &grouped {
        println!("{}", source);
        for bucket in buckets {
            println!("  {}", bucket.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::index_source;
    use crate::models::ReportedObject;
    use crate::progress::NoProgress;
    use crate::testutil::{config_with, memory_db, source_config, StaticSource};

    #[tokio::test]
    async fn tree_is_rendered_depth_first() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let adapter = StaticSource::new(
            &["b"],
            vec![
                ReportedObject::directory("b", "a", 1),
                ReportedObject::file("b", "a/x.jpg", 1, 12),
                ReportedObject::file("b", "z.txt", 1, 3),
            ],
        );
        index_source(&mut conn, &source_config("s", "static", &[]), &adapter, &NoProgress)
            .await
            .unwrap();

        let (root, descendants) = bucket_tree(&mut conn, "b").await.unwrap();
        assert_eq!(
            render_tree(&root, &descendants),
            vec!["b/", "  a/", "    x.jpg  (12 bytes)", "  z.txt  (3 bytes)"]
        );

        assert!(bucket_tree(&mut conn, "missing").await.is_err());
    }

    #[tokio::test]
    async fn buckets_grouped_by_source() {
        let pool = memory_db().await;
        let mut conn = pool.acquire().await.unwrap();
        for (name, buckets) in [("one", &["a", "b"][..]), ("two", &["c"][..])] {
            let adapter = StaticSource::new(buckets, Vec::new());
            index_source(&mut conn, &source_config(name, "static", &[]), &adapter, &NoProgress)
                .await
                .unwrap();
        }

        let all = buckets_by_source(&mut conn, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["one"].len(), 2);

        let two = buckets_by_source(&mut conn, Some("two")).await.unwrap();
        assert_eq!(two.keys().collect::<Vec<_>>(), vec!["two"]);
        assert_eq!(two["two"][0].name, "c");
    }

    #[test]
    fn statuses_flag_unknown_types_and_generators() {
        let config = config_with(vec![
            source_config("a", "ftp", &[]),
            source_config("b", "disk", &["thumbnails"]),
            source_config("c", "disk", &["checksum"]),
        ]);
        let statuses = source_statuses(&config, &Registry::with_builtins());
        assert!(statuses[0].problem.as_deref().unwrap().contains("Unknown source type"));
        assert!(statuses[1].problem.as_deref().unwrap().contains("thumbnails"));
        // No root configured
        assert!(statuses[2].problem.is_some());
    }
}
