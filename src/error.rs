//! Error taxonomy for indexing and generation.
//!
//! Library operations return [`UmetaError`]. Callers that only need to
//! report failures can convert into `anyhow::Error` with `?`.

use thiserror::Error;

/// Broad classification of an [`UmetaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad source or generator name; raised before any run starts.
    Configuration,
    /// Missing ancestor, non-directory ancestor, or a hierarchy cycle.
    Structural,
    /// Storage unavailable, constraint violation, missing schema.
    Persistence,
    /// The source adapter failed to enumerate or read objects.
    Source,
    /// A generator's `check` or `compute` failed.
    Generator,
}

#[derive(Debug, Error)]
pub enum UmetaError {
    #[error("Source '{0}' not found in config")]
    UnknownSource(String),

    #[error("Unknown source type '{source_type}' for source '{source_name}'")]
    UnknownSourceType {
        source_name: String,
        source_type: String,
    },

    #[error("Unknown generator '{generator}' configured for source '{source_name}'")]
    UnknownGenerator {
        source_name: String,
        generator: String,
    },

    #[error("Bucket '{bucket}' already belongs to another source (id {owner})")]
    BucketOwnedElsewhere { bucket: String, owner: i64 },

    #[error("Cannot resolve '{path}' in bucket '{bucket}': ancestor '{missing}' has not been indexed")]
    MissingAncestor {
        bucket: String,
        path: String,
        missing: String,
    },

    #[error("Cannot resolve '{path}' in bucket '{bucket}': '{segment}' is not a directory")]
    NotADirectory {
        bucket: String,
        path: String,
        segment: String,
    },

    #[error("Hierarchy cycle detected at object {object_id}")]
    HierarchyCycle { object_id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Source '{source_name}' failed: {error:#}")]
    Source {
        source_name: String,
        error: anyhow::Error,
    },

    #[error("Generator '{generator}' failed: {error:#}")]
    Generator {
        generator: String,
        error: anyhow::Error,
    },
}

pub type Result<T, E = UmetaError> = std::result::Result<T, E>;

impl UmetaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UmetaError::UnknownSource(_)
            | UmetaError::UnknownSourceType { .. }
            | UmetaError::UnknownGenerator { .. }
            | UmetaError::BucketOwnedElsewhere { .. } => ErrorKind::Configuration,
            UmetaError::MissingAncestor { .. }
            | UmetaError::NotADirectory { .. }
            | UmetaError::HierarchyCycle { .. } => ErrorKind::Structural,
            UmetaError::Database(_) => ErrorKind::Persistence,
            UmetaError::Source { .. } => ErrorKind::Source,
            UmetaError::Generator { .. } => ErrorKind::Generator,
        }
    }

    /// True when the database looks uninitialized (a table is missing).
    pub fn needs_migration(&self) -> bool {
        match self {
            UmetaError::Database(sqlx::Error::Database(db)) => {
                db.message().contains("no such table")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            UmetaError::UnknownSource("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            UmetaError::HierarchyCycle { object_id: 1 }.kind(),
            ErrorKind::Structural
        );
        assert_eq!(
            UmetaError::Generator {
                generator: "g".into(),
                error: anyhow::anyhow!("boom"),
            }
            .kind(),
            ErrorKind::Generator
        );
    }

    #[test]
    fn missing_ancestor_message_names_segment() {
        let err = UmetaError::MissingAncestor {
            bucket: "b".into(),
            path: "dir/a.txt".into(),
            missing: "dir".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resolve 'dir/a.txt' in bucket 'b': ancestor 'dir' has not been indexed"
        );
    }
}
