//! Core data models used throughout umeta.
//!
//! These types represent the objects reported by sources, the persisted
//! hierarchy, the revision log, and the generator bookkeeping rows.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Directory,
    File,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Directory => "directory",
            ObjectKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "directory" => Some(ObjectKind::Directory),
            "file" => Some(ObjectKind::File),
            _ => None,
        }
    }
}

/// Lifecycle of reindex and generator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivativeType {
    Metadata,
    File,
}

impl DerivativeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeType::Metadata => "metadata",
            DerivativeType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metadata" => Some(DerivativeType::Metadata),
            "file" => Some(DerivativeType::File),
            _ => None,
        }
    }
}

fn decode_err(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {} value: '{}'", column, value).into())
}

/// Raw entry produced by a source adapter.
///
/// `path` is relative to the bucket with `/` separators; `None` denotes the
/// bucket root itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedObject {
    pub bucket: String,
    pub path: Option<String>,
    pub kind: ObjectKind,
    pub modified_time: i64,
    pub size: i64,
}

impl ReportedObject {
    pub fn bucket(bucket: &str, modified_time: i64) -> Self {
        Self {
            bucket: bucket.to_string(),
            path: None,
            kind: ObjectKind::Directory,
            modified_time,
            size: 0,
        }
    }

    pub fn directory(bucket: &str, path: &str, modified_time: i64) -> Self {
        Self {
            bucket: bucket.to_string(),
            path: Some(path.to_string()),
            kind: ObjectKind::Directory,
            modified_time,
            size: 0,
        }
    }

    pub fn file(bucket: &str, path: &str, modified_time: i64, size: i64) -> Self {
        Self {
            bucket: bucket.to_string(),
            path: Some(path.to_string()),
            kind: ObjectKind::File,
            modified_time,
            size,
        }
    }
}

/// A persisted node of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub id: i64,
    pub name: String,
    pub kind: ObjectKind,
    pub modified_time: i64,
    pub size: i64,
    /// `None` only for bucket roots.
    pub parent_id: Option<i64>,
    /// Set only on bucket roots.
    pub source_id: Option<i64>,
    /// Reindex run that last changed this object.
    pub last_changed_run: i64,
    /// Reindex run that last observed this object.
    pub last_seen_run: i64,
}

impl Object {
    pub(crate) const COLUMNS: &'static str =
        "id, name, kind, modified_time, size, parent_id, source_id, last_changed_run, last_seen_run";

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: ObjectKind::parse(&kind).ok_or_else(|| decode_err("kind", &kind))?,
            modified_time: row.try_get("modified_time")?,
            size: row.try_get("size")?,
            parent_id: row.try_get("parent_id")?,
            source_id: row.try_get("source_id")?,
            last_changed_run: row.try_get("last_changed_run")?,
            last_seen_run: row.try_get("last_seen_run")?,
        })
    }

    pub fn is_bucket(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_directory(&self) -> bool {
        self.kind == ObjectKind::Directory
    }

    /// True when the reported state differs in kind, size, or modified time.
    pub fn differs_from(&self, reported: &ReportedObject) -> bool {
        self.kind != reported.kind
            || self.modified_time != reported.modified_time
            || self.size != reported.size
    }
}

/// Persisted row for a configured source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub source_type: String,
}

/// One pass of the indexer over a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexRun {
    pub id: i64,
    pub source_id: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub status: RunStatus,
}

impl ReindexRun {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            status: RunStatus::parse(&status).ok_or_else(|| decode_err("status", &status))?,
        })
    }
}

/// Immutable record that an object changed during a reindex run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub id: i64,
    pub object_id: i64,
    pub reindex_id: i64,
    pub created_at: i64,
}

impl Revision {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            object_id: row.try_get("object_id")?,
            reindex_id: row.try_get("reindex_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// One execution of a named generator against a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorRun {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub source_id: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub status: RunStatus,
}

impl GeneratorRun {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            source_id: row.try_get("source_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            status: RunStatus::parse(&status).ok_or_else(|| decode_err("status", &status))?,
        })
    }
}

/// A declared generator output for one primary object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub id: i64,
    pub generator_name: String,
    pub generator_version: String,
    pub name: String,
    pub derivative_type: DerivativeType,
    pub object_id: i64,
    pub generator_run_id: i64,
}

impl Derivative {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let derivative_type: String = row.try_get("type")?;
        Ok(Self {
            id: row.try_get("id")?,
            generator_name: row.try_get("generator_name")?,
            generator_version: row.try_get("generator_version")?,
            name: row.try_get("name")?,
            derivative_type: DerivativeType::parse(&derivative_type)
                .ok_or_else(|| decode_err("type", &derivative_type))?,
            object_id: row.try_get("object_id")?,
            generator_run_id: row.try_get("generator_run_id")?,
        })
    }
}

/// Edge pinning a derivative to the revision of one input object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub id: i64,
    pub derivative_id: i64,
    pub object_id: i64,
    pub revision_id: i64,
}

impl Dependency {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            derivative_id: row.try_get("derivative_id")?,
            object_id: row.try_get("object_id")?,
            revision_id: row.try_get("revision_id")?,
        })
    }
}

/// A derivative a generator proposes for a candidate object.
#[derive(Debug, Clone)]
pub struct ProposedDerivative {
    pub name: String,
    pub derivative_type: DerivativeType,
    /// Objects the derivative is computed from.
    pub dependencies: Vec<Object>,
}

/// A transitive descendant returned by hierarchy traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descendant {
    pub object: Object,
    /// Depth relative to the traversal root; direct children are 0.
    pub depth: u32,
    /// Bucket-relative key, `/` separated.
    pub key: String,
}
