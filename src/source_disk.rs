//! Local filesystem source adapter.
//!
//! Every directory directly under `root` is a bucket; files directly under
//! `root` belong to no bucket and are skipped. Each bucket is walked depth
//! first with siblings sorted by file name, so a directory is always reported
//! before its contents.
//!
//! Paths matching `exclude_globs` (tested against `bucket/relative/path`) are
//! pruned along with everything below them. `.umetaignore` and `.umetaderiv`
//! directories are always excluded.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::models::ReportedObject;
use crate::traits::{ReportedStream, SourceAdapter};

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.umetaignore",
    "**/.umetaignore/**",
    "**/.umetaderiv",
    "**/.umetaderiv/**",
];

pub struct DiskSource;

#[async_trait]
impl SourceAdapter for DiskSource {
    fn source_type(&self) -> &str {
        "disk"
    }

    fn description(&self) -> &str {
        "Local directory tree; each top-level directory is a bucket"
    }

    fn check(&self, source: &SourceConfig) -> Result<()> {
        root_of(source).map(|_| ())
    }

    fn scan_buckets(&self, source: &SourceConfig) -> Result<Vec<ReportedObject>> {
        let root = root_of(source)?;
        let excludes = exclude_set(source)?;

        let mut buckets = Vec::new();
        for entry in std::fs::read_dir(root)
            .with_context(|| format!("Failed to list {}", root.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = if source.follow_symlinks {
                std::fs::metadata(entry.path())?
            } else {
                entry.path().symlink_metadata()?
            };

            if !metadata.is_dir() {
                tracing::debug!(source = %source.name, entry = %name, "skipping non-directory at root");
                continue;
            }
            if excludes.is_match(&name) {
                continue;
            }
            buckets.push(ReportedObject::bucket(&name, modified_secs(&metadata)));
        }

        buckets.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(buckets)
    }

    fn index<'a>(&'a self, source: &'a SourceConfig) -> Result<ReportedStream<'a>> {
        let root = root_of(source)?.to_path_buf();
        let excludes = exclude_set(source)?;
        let follow = source.follow_symlinks;
        let buckets = self.scan_buckets(source)?;

        let stream = buckets.into_iter().flat_map(move |bucket| {
            walk_bucket(root.join(&bucket.bucket), bucket.bucket, follow, excludes.clone())
        });
        Ok(Box::new(stream))
    }

    async fn get_bytes(&self, source: &SourceConfig, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let root = root_of(source)?;
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid object key: {}", key);
        }

        let path = root.join(bucket).join(relative);
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if metadata.is_dir() {
            bail!("{}/{} is a directory", bucket, key);
        }

        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn root_of(source: &SourceConfig) -> Result<&Path> {
    let Some(root) = source.root.as_deref() else {
        bail!("Source '{}' has no root configured", source.name);
    };
    if !root.is_dir() {
        bail!(
            "Root of source '{}' is not a directory: {}",
            source.name,
            root.display()
        );
    }
    Ok(root)
}

fn exclude_set(source: &SourceConfig) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_EXCLUDES
        .iter()
        .copied()
        .chain(source.exclude_globs.iter().map(String::as_str))
    {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn walk_bucket(
    base: PathBuf,
    bucket: String,
    follow: bool,
    excludes: GlobSet,
) -> impl Iterator<Item = Result<ReportedObject>> + Send {
    let prune_base = base.clone();
    let prune_bucket = bucket.clone();

    WalkDir::new(&base)
        .min_depth(1)
        .follow_links(follow)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            let key = object_key(&prune_base, entry.path());
            !excludes.is_match(format!("{}/{}", prune_bucket, key))
        })
        .filter_map(move |entry| to_reported(&bucket, &base, entry).transpose())
}

fn to_reported(
    bucket: &str,
    base: &Path,
    entry: walkdir::Result<walkdir::DirEntry>,
) -> Result<Option<ReportedObject>> {
    let entry = entry?;
    let key = object_key(base, entry.path());
    let metadata = entry.metadata()?;
    let mtime = modified_secs(&metadata);

    if metadata.is_dir() {
        Ok(Some(ReportedObject::directory(bucket, &key, mtime)))
    } else if metadata.is_file() {
        Ok(Some(ReportedObject::file(
            bucket,
            &key,
            mtime,
            metadata.len() as i64,
        )))
    } else {
        // Symlinks that are not followed, sockets, fifos
        Ok(None)
    }
}

/// Bucket-relative key with `/` separators.
fn object_key(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn modified_secs(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
