//! Index and generate progress reporting.
//!
//! The indexer and the generator coordinator emit [`ProgressEvent`]s through
//! a [`ProgressReporter`] callback instead of printing. Reporters write to
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A reindex run started. `estimate` is the number of objects already
    /// known for the source (the previous run's size), not a true total.
    IndexStarted {
        source: String,
        buckets: u64,
        estimate: u64,
    },
    /// `n` reported objects consumed so far.
    Indexed { source: String, n: u64, estimate: u64 },
    /// A generator run started with `candidates` objects to check.
    GenerateStarted {
        source: String,
        generator: String,
        candidates: u64,
    },
    /// `n` candidates checked so far.
    Generated {
        source: String,
        generator: String,
        n: u64,
        candidates: u64,
    },
}

/// Receives progress events. Implementations must not fail the run.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index photos  1,234 / ~5,000 objects".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::IndexStarted {
                source,
                buckets,
                estimate,
            } => format!(
                "index {}  {} bucket(s), ~{} known objects\n",
                source,
                format_number(*buckets),
                format_number(*estimate)
            ),
            ProgressEvent::Indexed {
                source,
                n,
                estimate,
            } => format!(
                "index {}  {} / ~{} objects\n",
                source,
                format_number(*n),
                format_number(*estimate)
            ),
            ProgressEvent::GenerateStarted {
                source,
                generator,
                candidates,
            } => format!(
                "generate {}:{}  {} candidates\n",
                source,
                generator,
                format_number(*candidates)
            ),
            ProgressEvent::Generated {
                source,
                generator,
                n,
                candidates,
            } => format!(
                "generate {}:{}  {} / {} candidates\n",
                source,
                generator,
                format_number(*n),
                format_number(*candidates)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::IndexStarted {
                source,
                buckets,
                estimate,
            } => serde_json::json!({
                "event": "progress",
                "phase": "index_started",
                "source": source,
                "buckets": buckets,
                "estimate": estimate
            }),
            ProgressEvent::Indexed {
                source,
                n,
                estimate,
            } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "source": source,
                "n": n,
                "estimate": estimate
            }),
            ProgressEvent::GenerateStarted {
                source,
                generator,
                candidates,
            } => serde_json::json!({
                "event": "progress",
                "phase": "generate_started",
                "source": source,
                "generator": generator,
                "candidates": candidates
            }),
            ProgressEvent::Generated {
                source,
                generator,
                n,
                candidates,
            } => serde_json::json!({
                "event": "progress",
                "phase": "generating",
                "source": source,
                "generator": generator,
                "n": n,
                "candidates": candidates
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collects events for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub(crate) events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn off_mode_is_silent() {
        let reporter = ProgressMode::Off.reporter();
        reporter.report(ProgressEvent::Indexed {
            source: "s".into(),
            n: 1,
            estimate: 1,
        });
    }
}
