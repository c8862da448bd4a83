//! Shared fixtures for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::config::{Config, DbConfig, GenerateConfig, SourceConfig};
use crate::db;
use crate::migrate::migrate;
use crate::models::ReportedObject;
use crate::traits::{ReportedStream, SourceAdapter};

pub(crate) async fn memory_db() -> SqlitePool {
    let pool = db::connect_in_memory().await.unwrap();
    migrate(&pool).await.unwrap();
    pool
}

pub(crate) fn source_config(name: &str, source_type: &str, generators: &[&str]) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        source_type: source_type.to_string(),
        root: None,
        exclude_globs: Vec::new(),
        follow_symlinks: false,
        generators: generators.iter().map(|g| g.to_string()).collect(),
    }
}

pub(crate) fn config_with(sources: Vec<SourceConfig>) -> Config {
    Config {
        db: DbConfig {
            path: ":memory:".into(),
        },
        generate: GenerateConfig::default(),
        sources,
    }
}

/// Source adapter that replays a fixed list of objects.
pub(crate) struct StaticSource {
    pub(crate) buckets: Vec<String>,
    pub(crate) objects: Vec<ReportedObject>,
    /// Yield an error instead of the object at this position.
    pub(crate) fail_at: Option<usize>,
    pub(crate) contents: HashMap<String, Vec<u8>>,
}

impl StaticSource {
    pub(crate) fn new(buckets: &[&str], objects: Vec<ReportedObject>) -> Self {
        Self {
            buckets: buckets.iter().map(|b| b.to_string()).collect(),
            objects,
            fail_at: None,
            contents: HashMap::new(),
        }
    }

    pub(crate) fn with_content(mut self, bucket: &str, key: &str, bytes: &[u8]) -> Self {
        self.contents
            .insert(format!("{}/{}", bucket, key), bytes.to_vec());
        self
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn source_type(&self) -> &str {
        "static"
    }

    fn description(&self) -> &str {
        "Replays a fixed object list"
    }

    fn scan_buckets(&self, _source: &SourceConfig) -> Result<Vec<ReportedObject>> {
        Ok(self
            .buckets
            .iter()
            .map(|b| ReportedObject::bucket(b, 0))
            .collect())
    }

    fn index<'a>(&'a self, _source: &'a SourceConfig) -> Result<ReportedStream<'a>> {
        let fail_at = self.fail_at;
        Ok(Box::new(self.objects.iter().enumerate().map(
            move |(i, object)| {
                if Some(i) == fail_at {
                    Err(anyhow!("listing failed at entry {}", i))
                } else {
                    Ok(object.clone())
                }
            },
        )))
    }

    async fn get_bytes(&self, _source: &SourceConfig, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.contents
            .get(&format!("{}/{}", bucket, key))
            .cloned()
            .ok_or_else(|| anyhow!("no such object: {}/{}", bucket, key))
    }
}
