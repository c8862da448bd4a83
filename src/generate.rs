//! Generator run coordination.
//!
//! For each generator configured on a source:
//!
//! 1. Record a `running` generator run.
//! 2. Take the start time of the last succeeded run of the same generator
//!    name and version as `modified_since` (unbounded if there is none, so a
//!    version bump rescans everything).
//! 3. Walk every bucket of the source for objects modified since then.
//! 4. Ask the generator which derivatives each candidate has, resolve their
//!    staleness, and compute only new or stale ones.
//! 5. Mark the run `succeeded`, or `failed` on the first error, which is
//!    returned to the caller.

use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;

use crate::config::{Config, SourceConfig};
use crate::error::{Result, UmetaError};
use crate::hierarchy::{buckets_for_source, list_descendants};
use crate::models::{Descendant, GeneratorRun, ProposedDerivative, RunStatus, SourceRecord};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::runs::{
    finish_generator_run, get_or_create_source, last_successful_generator_run,
    start_generator_run,
};
use crate::staleness::{commit, resolve, Verdict};
use crate::traits::{ByteSource, Generator, Registry, SourceAdapter};

/// Counts for one generator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSummary {
    pub source: String,
    pub generator: String,
    pub version: String,
    pub run_id: i64,
    pub status: RunStatus,
    /// Lower bound on candidate `modified_time`; `None` for a full rescan.
    pub modified_since: Option<i64>,
    pub candidates: u64,
    pub new: u64,
    pub stale: u64,
    pub current: u64,
}

impl GenerateSummary {
    pub fn computed(&self) -> u64 {
        self.new + self.stale
    }
}

/// Run every generator configured on `source_name`, in order.
///
/// All generator names are resolved before the first run is recorded, so a
/// misconfigured source writes nothing.
pub async fn run_generate(
    pool: &SqlitePool,
    config: &Config,
    registry: &Registry,
    source_name: &str,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<GenerateSummary>> {
    let source_config = config
        .source(source_name)
        .ok_or_else(|| UmetaError::UnknownSource(source_name.to_string()))?;
    let adapter = registry.sources.for_source(source_config)?;
    let generators = registry.generators.for_source(source_config)?;
    let compute_timeout = config.generate.compute_timeout();

    let mut conn = pool.acquire().await?;
    let source =
        get_or_create_source(&mut conn, &source_config.name, &source_config.source_type).await?;

    let mut summaries = Vec::with_capacity(generators.len());
    for generator in generators {
        let summary = generate_source(
            &mut conn,
            source_config,
            &source,
            adapter,
            generator,
            compute_timeout,
            reporter,
        )
        .await?;
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Run one generator against one source.
pub async fn generate_source(
    conn: &mut SqliteConnection,
    source_config: &SourceConfig,
    source: &SourceRecord,
    adapter: &dyn SourceAdapter,
    generator: &dyn Generator,
    compute_timeout: Option<Duration>,
    reporter: &dyn ProgressReporter,
) -> Result<GenerateSummary> {
    let mut run = start_generator_run(conn, generator.name(), generator.version(), source.id).await?;
    let previous =
        last_successful_generator_run(conn, source.id, generator.name(), generator.version())
            .await?;
    let modified_since = previous.map(|p| p.started_at);
    tracing::info!(
        source = %source.name,
        generator = generator.name(),
        version = generator.version(),
        run = run.id,
        ?modified_since,
        "generator run started"
    );

    let mut summary = GenerateSummary {
        source: source.name.clone(),
        generator: generator.name().to_string(),
        version: generator.version().to_string(),
        run_id: run.id,
        status: run.status,
        modified_since,
        candidates: 0,
        new: 0,
        stale: 0,
        current: 0,
    };

    let sweep = Sweep {
        source_config,
        adapter,
        generator,
        compute_timeout,
        reporter,
    };
    match sweep.run(conn, &run, &mut summary).await {
        Ok(()) => {
            finish_generator_run(conn, &mut run, RunStatus::Succeeded).await?;
            summary.status = run.status;
            tracing::info!(
                source = %source.name,
                generator = generator.name(),
                run = run.id,
                candidates = summary.candidates,
                computed = summary.computed(),
                "generator run succeeded"
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(finish_err) =
                finish_generator_run(conn, &mut run, RunStatus::Failed).await
            {
                tracing::error!(run = run.id, error = %finish_err, "could not mark generator run failed");
            }
            tracing::warn!(
                source = %source.name,
                generator = generator.name(),
                run = run.id,
                error = %err,
                "generator run failed"
            );
            Err(err)
        }
    }
}

struct Sweep<'a> {
    source_config: &'a SourceConfig,
    adapter: &'a dyn SourceAdapter,
    generator: &'a dyn Generator,
    compute_timeout: Option<Duration>,
    reporter: &'a dyn ProgressReporter,
}

impl Sweep<'_> {
    fn generator_err(&self, error: anyhow::Error) -> UmetaError {
        UmetaError::Generator {
            generator: self.generator.name().to_string(),
            error,
        }
    }

    async fn run(
        &self,
        conn: &mut SqliteConnection,
        run: &GeneratorRun,
        summary: &mut GenerateSummary,
    ) -> Result<()> {
        let mut candidates: Vec<(String, Descendant)> = Vec::new();
        for bucket in buckets_for_source(conn, run.source_id).await? {
            for descendant in list_descendants(conn, &bucket, summary.modified_since).await? {
                candidates.push((bucket.name.clone(), descendant));
            }
        }
        summary.candidates = candidates.len() as u64;
        self.reporter.report(ProgressEvent::GenerateStarted {
            source: summary.source.clone(),
            generator: summary.generator.clone(),
            candidates: summary.candidates,
        });

        for (n, (bucket, candidate)) in candidates.iter().enumerate() {
            // Directory candidates get no children context yet.
            let proposals = self
                .generator
                .check(&candidate.object, None)
                .map_err(|e| self.generator_err(e))?;

            for proposal in &proposals {
                let resolution = resolve(conn, run, &candidate.object, proposal).await?;
                match resolution.verdict {
                    Verdict::New => summary.new += 1,
                    Verdict::Stale => summary.stale += 1,
                    Verdict::Current => {
                        summary.current += 1;
                        continue;
                    }
                }

                let bytes = ByteSource::new(self.adapter, self.source_config, bucket);
                let payload = self.compute(candidate, proposal, &bytes).await?;
                tracing::debug!(
                    key = %candidate.key,
                    derivative = %proposal.name,
                    verdict = ?resolution.verdict,
                    changed = resolution.changed.len(),
                    payload = %payload,
                    "derivative computed"
                );
                commit(conn, &resolution, run).await?;
            }

            self.reporter.report(ProgressEvent::Generated {
                source: summary.source.clone(),
                generator: summary.generator.clone(),
                n: n as u64 + 1,
                candidates: summary.candidates,
            });
        }

        Ok(())
    }

    async fn compute(
        &self,
        candidate: &Descendant,
        proposal: &ProposedDerivative,
        bytes: &ByteSource<'_>,
    ) -> Result<serde_json::Value> {
        let work = self.generator.compute(candidate, proposal, bytes);
        let outcome = match self.compute_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!(
                    "compute of '{}' for '{}' timed out after {:?}",
                    proposal.name,
                    candidate.key,
                    limit
                )),
            },
            None => work.await,
        };
        outcome.map_err(|e| self.generator_err(e))
    }
}
