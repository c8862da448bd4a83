//! Capability traits for source backends and derivative generators.
//!
//! Backends and generators are looked up by string key in registries built
//! once at startup and passed to the indexer and the generator coordinator.
//! Unknown keys are configuration errors.
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │        SourceRegistry        │   │      GeneratorRegistry       │
//! │  ┌──────────┐ ┌───────────┐  │   │  ┌──────────┐ ┌───────────┐  │
//! │  │ Built-in │ │  Custom   │  │   │  │ Built-in │ │  Custom   │  │
//! │  │   disk   │ │  (Rust)   │  │   │  │ checksum │ │  (Rust)   │  │
//! │  └──────────┘ └───────────┘  │   │  └──────────┘ └───────────┘  │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                ▼                                  ▼
//!          run_index()                        run_generate()
//! ```
//!
//! # Usage
//!
//! ```rust
//! use umeta::traits::Registry;
//!
//! let registry = Registry::with_builtins();
//! assert!(registry.sources.find("disk").is_some());
//! assert!(registry.generators.find("checksum").is_some());
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::SourceConfig;
use crate::error::UmetaError;
use crate::models::{Descendant, Object, ProposedDerivative, ReportedObject};

/// Lazily produced stream of reported objects.
pub type ReportedStream<'a> = Box<dyn Iterator<Item = Result<ReportedObject>> + Send + 'a>;

// ═══════════════════════════════════════════════════════════════════════
// Source Adapter Trait
// ═══════════════════════════════════════════════════════════════════════

/// A storage backend that enumerates raw entries for the indexer.
///
/// One adapter instance serves every configured source of its type; the
/// per-source settings arrive as a [`SourceConfig`] on each call.
///
/// # Ordering
///
/// [`index`](SourceAdapter::index) must report a directory before any of
/// its children. A child whose parent has not been reported fails the run.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Backend type key matched against `sources[].type` (e.g. `"disk"`).
    fn source_type(&self) -> &str;

    /// One-line description, shown by `umeta sources`.
    fn description(&self) -> &str;

    /// Verify that a source is usable (e.g. its root exists).
    fn check(&self, _source: &SourceConfig) -> Result<()> {
        Ok(())
    }

    /// List the bucket roots of a source. Every item has `path == None`.
    fn scan_buckets(&self, source: &SourceConfig) -> Result<Vec<ReportedObject>>;

    /// Enumerate every object of a source, parents before children.
    fn index<'a>(&'a self, source: &'a SourceConfig) -> Result<ReportedStream<'a>>;

    /// Read the contents of a file object.
    async fn get_bytes(&self, source: &SourceConfig, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Generator Trait
// ═══════════════════════════════════════════════════════════════════════

/// A derivative generator (e.g. a metadata extractor).
///
/// The coordinator calls [`check`](Generator::check) for every candidate
/// object and hands only new or stale derivatives to
/// [`compute`](Generator::compute). Derivative payloads are returned to the
/// coordinator but not stored.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Registry key matched against `sources[].generators`.
    fn name(&self) -> &str;

    /// Opaque version string. Changing it forces a full rescan.
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Propose derivatives for `object`.
    ///
    /// `children` is reserved for directory candidates; the coordinator
    /// currently always passes `None`.
    fn check(
        &self,
        object: &Object,
        children: Option<&[Object]>,
    ) -> Result<Vec<ProposedDerivative>>;

    /// Compute one derivative of `target`.
    async fn compute(
        &self,
        target: &Descendant,
        derivative: &ProposedDerivative,
        bytes: &ByteSource<'_>,
    ) -> Result<Value>;
}

/// Read access to the objects of one bucket, handed to generators.
pub struct ByteSource<'a> {
    adapter: &'a dyn SourceAdapter,
    source: &'a SourceConfig,
    bucket: &'a str,
}

impl<'a> ByteSource<'a> {
    pub fn new(adapter: &'a dyn SourceAdapter, source: &'a SourceConfig, bucket: &'a str) -> Self {
        Self {
            adapter,
            source,
            bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        self.bucket
    }

    /// Fetch the bytes of the object at `key` within this bucket.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        self.adapter.get_bytes(self.source, self.bucket, key).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registries
// ═══════════════════════════════════════════════════════════════════════

/// Registry for source adapters, keyed by [`SourceAdapter::source_type`].
pub struct SourceRegistry {
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Create an empty source registry.
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Register an adapter, replacing any adapter with the same type.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters
            .retain(|a| a.source_type() != adapter.source_type());
        self.adapters.push(adapter);
    }

    pub fn adapters(&self) -> &[Box<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn find(&self, source_type: &str) -> Option<&dyn SourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.source_type() == source_type)
            .map(|a| a.as_ref())
    }

    /// Resolve the adapter for a configured source.
    pub fn for_source(&self, source: &SourceConfig) -> Result<&dyn SourceAdapter, UmetaError> {
        self.find(&source.source_type)
            .ok_or_else(|| UmetaError::UnknownSourceType {
                source_name: source.name.clone(),
                source_type: source.source_type.clone(),
            })
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry for generators, keyed by [`Generator::name`].
pub struct GeneratorRegistry {
    generators: Vec<Box<dyn Generator>>,
}

impl GeneratorRegistry {
    /// Create an empty generator registry.
    pub fn new() -> Self {
        Self {
            generators: Vec::new(),
        }
    }

    /// Register a generator, replacing any generator with the same name.
    pub fn register(&mut self, generator: Box<dyn Generator>) {
        self.generators.retain(|g| g.name() != generator.name());
        self.generators.push(generator);
    }

    pub fn generators(&self) -> &[Box<dyn Generator>] {
        &self.generators
    }

    pub fn find(&self, name: &str) -> Option<&dyn Generator> {
        self.generators
            .iter()
            .find(|g| g.name() == name)
            .map(|g| g.as_ref())
    }

    /// Resolve every generator configured on a source, failing on the first unknown name.
    pub fn for_source(&self, source: &SourceConfig) -> Result<Vec<&dyn Generator>, UmetaError> {
        source
            .generators
            .iter()
            .map(|name| {
                self.find(name).ok_or_else(|| UmetaError::UnknownGenerator {
                    source_name: source.name.clone(),
                    generator: name.clone(),
                })
            })
            .collect()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Both registries, constructed at startup and passed by reference.
#[derive(Default)]
pub struct Registry {
    pub sources: SourceRegistry,
    pub generators: GeneratorRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `disk` adapter and `checksum` generator.
    pub fn with_builtins() -> Self {
        use crate::generator_checksum::ChecksumGenerator;
        use crate::source_disk::DiskSource;

        let mut registry = Self::new();
        registry.sources.register(Box::new(DiskSource));
        registry.generators.register(Box::new(ChecksumGenerator));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn source(source_type: &str, generators: &[&str]) -> SourceConfig {
        SourceConfig {
            name: "s".to_string(),
            source_type: source_type.to_string(),
            root: None,
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            generators: generators.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn unknown_source_type_is_configuration_error() {
        let registry = Registry::with_builtins();
        assert!(registry.sources.for_source(&source("disk", &[])).is_ok());

        let err = registry
            .sources
            .for_source(&source("ftp", &[]))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn unknown_generator_is_configuration_error() {
        let registry = Registry::with_builtins();
        let found = registry
            .generators
            .for_source(&source("disk", &["checksum"]))
            .unwrap();
        assert_eq!(found.len(), 1);

        let err = registry
            .generators
            .for_source(&source("disk", &["checksum", "thumbnails"]))
            .err()
            .unwrap();
        assert!(matches!(err, UmetaError::UnknownGenerator { ref generator, .. } if generator == "thumbnails"));
    }

    #[test]
    fn register_replaces_same_key() {
        let mut registry = Registry::with_builtins();
        registry
            .generators
            .register(Box::new(crate::generator_checksum::ChecksumGenerator));
        assert_eq!(registry.generators.generators().len(), 1);
        assert_eq!(registry.sources.adapters().len(), 1);
    }
}
