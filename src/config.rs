//! TOML configuration parsing.
//!
//! A configuration names the SQLite database and the list of sources to
//! index. Each source carries its backend type, backend properties, and the
//! generators to run against it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `[db].path`.
pub const DATABASE_ENV: &str = "UMETA_DATABASE";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GenerateConfig {
    /// Upper bound for a single generator `compute` call. Unbounded when unset.
    #[serde(default)]
    pub compute_timeout_secs: Option<u64>,
}

impl GenerateConfig {
    pub fn compute_timeout(&self) -> Option<Duration> {
        self.compute_timeout_secs.map(Duration::from_secs)
    }
}

/// One configured origin of objects.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Stable name; one `sources` row persists per name.
    pub name: String,
    /// Backend kind, resolved through the [`Registry`](crate::traits::Registry).
    #[serde(rename = "type")]
    pub source_type: String,
    /// Root directory for the `disk` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Generator names to run against this source, in order.
    #[serde(default)]
    pub generators: Vec<String>,
}

impl Config {
    /// Look up a configured source by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(db_path) = std::env::var(DATABASE_ENV) {
        if !db_path.is_empty() {
            config.db.path = PathBuf::from(db_path);
        }
    }

    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.generate.compute_timeout_secs == Some(0) {
        anyhow::bail!("generate.compute_timeout_secs must be > 0");
    }

    let mut names = HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            anyhow::bail!("sources[].name must not be empty");
        }
        if !names.insert(source.name.as_str()) {
            anyhow::bail!("Duplicate source name: '{}'", source.name);
        }

        let mut generators = HashSet::new();
        for generator in &source.generators {
            if !generators.insert(generator.as_str()) {
                anyhow::bail!(
                    "Generator '{}' listed more than once for source '{}'",
                    generator,
                    source.name
                );
            }
        }
    }
    Ok(())
}
