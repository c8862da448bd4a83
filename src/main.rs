//! # umeta CLI
//!
//! ## Usage
//!
//! ```bash
//! umeta --config ./config/umeta.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `umeta init` | Create the SQLite database and run schema migrations |
//! | `umeta sources` | List configured sources and their health |
//! | `umeta index [NAME]` | Index one source, or every configured source |
//! | `umeta generate --name NAME` | Run the generators configured for a source |
//! | `umeta ls --bucket NAME` | Print a bucket's hierarchy |
//! | `umeta buckets [--source NAME]` | List indexed buckets by source |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use umeta::config::{self, Config};
use umeta::error::UmetaError;
use umeta::generate::{run_generate, GenerateSummary};
use umeta::indexer::{run_index, IndexSummary};
use umeta::progress::{ProgressMode, ProgressReporter};
use umeta::traits::Registry;
use umeta::{db, listing, migrate};

/// umeta: mirror object stores into SQLite and keep derivatives fresh.
#[derive(Parser)]
#[command(name = "umeta", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/umeta.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// List configured sources and whether they can run.
    Sources,

    /// Index a source into the hierarchy.
    Index {
        /// Source name. Indexes every configured source when omitted.
        name: Option<String>,
    },

    /// Run every generator configured for a source.
    Generate {
        /// Source name.
        #[arg(long)]
        name: String,
    },

    /// Print the hierarchy of a bucket.
    Ls {
        /// Bucket name.
        #[arg(long)]
        bucket: String,
    },

    /// List indexed buckets grouped by source.
    Buckets {
        /// Only show buckets of this source.
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let reporter = progress.reporter();
    let registry = Registry::with_builtins();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            listing::list_sources(&cfg, &registry)?;
        }
        Commands::Index { name } => {
            index_command(&cfg, &registry, name.as_deref(), reporter.as_ref()).await?;
        }
        Commands::Generate { name } => {
            generate_command(&cfg, &registry, &name, reporter.as_ref()).await?;
        }
        Commands::Ls { bucket } => {
            listing::run_ls(&cfg, &bucket).await?;
        }
        Commands::Buckets { source } => {
            listing::run_buckets(&cfg, source.as_deref()).await?;
        }
    }

    Ok(())
}

async fn index_command(
    cfg: &Config,
    registry: &Registry,
    name: Option<&str>,
    reporter: &dyn ProgressReporter,
) -> anyhow::Result<()> {
    let names: Vec<String> = match name {
        Some(name) => vec![name.to_string()],
        None => cfg.sources.iter().map(|s| s.name.clone()).collect(),
    };
    if names.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    let pool = db::connect(cfg).await?;
    for name in &names {
        let summary = run_index(&pool, cfg, registry, name, reporter)
            .await
            .map_err(with_hint)
            .with_context(|| format!("index {} failed", name))?;
        print_index(&summary);
    }
    pool.close().await;
    Ok(())
}

async fn generate_command(
    cfg: &Config,
    registry: &Registry,
    name: &str,
    reporter: &dyn ProgressReporter,
) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let summaries = run_generate(&pool, cfg, registry, name, reporter)
        .await
        .map_err(with_hint)
        .with_context(|| format!("generate {} failed", name))?;
    pool.close().await;

    if summaries.is_empty() {
        println!("No generators configured for source '{}'.", name);
    }
    for summary in &summaries {
        print_generate(summary);
    }
    Ok(())
}

fn with_hint(err: UmetaError) -> anyhow::Error {
    if err.needs_migration() {
        anyhow::Error::new(err).context("database is not initialized; run `umeta init` first")
    } else {
        anyhow::Error::new(err)
    }
}

fn print_index(summary: &IndexSummary) {
    println!("index {}", summary.source);
    println!("  run: {} ({})", summary.run_id, summary.status);
    println!("  buckets: {}", summary.buckets);
    println!("  seen: {}", summary.seen);
    println!("  created: {}", summary.created);
    println!("  updated: {}", summary.updated);
    println!("  unchanged: {}", summary.unchanged);
}

fn print_generate(summary: &GenerateSummary) {
    println!(
        "generate {} {}@{}",
        summary.source, summary.generator, summary.version
    );
    println!("  run: {} ({})", summary.run_id, summary.status);
    match summary.modified_since {
        Some(since) => println!("  modified since: {}", since),
        None => println!("  modified since: (full scan)"),
    }
    println!("  candidates: {}", summary.candidates);
    println!("  new: {}", summary.new);
    println!("  stale: {}", summary.stale);
    println!("  current: {}", summary.current);
}
