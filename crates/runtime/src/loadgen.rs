//! Load generation seam and a reference server-scenario driver.
//!
//! A load generator drives a session with queries from a dataset and leaves a
//! text summary in a report directory. The summary uses the MLPerf LoadGen
//! layout so the same parser reads reports from either source.

use crate::engine::InferenceSession;
use crate::tensor::InputFeed;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// File the summary is written to inside the report directory.
pub const REPORT_FILE_NAME: &str = "mlperf_log_summary.txt";

/// Query samples served by a load generator.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<InputFeed>,
}

impl Dataset {
    pub fn new(samples: Vec<InputFeed>) -> Self {
        Self { samples }
    }

    pub fn from_feed(feed: InputFeed) -> Self {
        Self::new(vec![feed])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample for query `index`, cycling through the dataset.
    pub fn sample(&self, index: usize) -> Option<&InputFeed> {
        if self.samples.is_empty() {
            None
        } else {
            self.samples.get(index % self.samples.len())
        }
    }
}

/// External load-generation capability.
pub trait LoadGenerator: Send {
    fn warmup(
        &mut self,
        session: &mut dyn InferenceSession,
        dataset: &Dataset,
        output_names: &[String],
        iterations: usize,
    ) -> Result<()>;

    /// Run the measured load and write the summary into `report_dir`.
    fn run(
        &mut self,
        session: &mut dyn InferenceSession,
        dataset: &Dataset,
        output_names: &[String],
        report_dir: &Path,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSettings {
    /// Number of queries issued per run.
    pub query_count: usize,
    /// The run is reported VALID when p99 latency stays within this bound.
    pub target_latency_ms: f64,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            query_count: 1024,
            target_latency_ms: 50.0,
        }
    }
}

/// Issues queries back to back from one thread and reports server-scenario
/// statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerLoadGenerator {
    settings: LoadSettings,
}

impl ServerLoadGenerator {
    pub fn new(settings: LoadSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }
}

impl LoadGenerator for ServerLoadGenerator {
    fn warmup(
        &mut self,
        session: &mut dyn InferenceSession,
        dataset: &Dataset,
        output_names: &[String],
        iterations: usize,
    ) -> Result<()> {
        for i in 0..iterations {
            let sample = dataset.sample(i).context("dataset is empty")?;
            let _ = session.run(output_names, sample)?;
        }
        Ok(())
    }

    fn run(
        &mut self,
        session: &mut dyn InferenceSession,
        dataset: &Dataset,
        output_names: &[String],
        report_dir: &Path,
    ) -> Result<PathBuf> {
        ensure!(self.settings.query_count > 0, "query_count must be > 0");
        ensure!(!dataset.is_empty(), "dataset is empty");

        let mut latencies_ns = Vec::with_capacity(self.settings.query_count);
        let start = Instant::now();
        for i in 0..self.settings.query_count {
            let sample = dataset.sample(i).context("dataset is empty")?;
            let query_start = Instant::now();
            let _ = session.run(output_names, sample)?;
            latencies_ns.push(query_start.elapsed().as_nanos() as u64);
        }
        let elapsed_s = start.elapsed().as_secs_f64();

        let summary = ServerSummary::from_latencies(
            &mut latencies_ns,
            elapsed_s,
            self.settings.target_latency_ms,
        );

        fs::create_dir_all(report_dir)
            .with_context(|| format!("failed to create {}", report_dir.display()))?;
        let path = report_dir.join(REPORT_FILE_NAME);
        fs::write(&path, summary.render())
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(
            qps = summary.samples_per_second,
            p99_ns = summary.p99_ns,
            valid = summary.valid,
            "load generation finished"
        );
        Ok(path)
    }
}

#[derive(Debug, Clone)]
struct ServerSummary {
    samples_per_second: f64,
    valid: bool,
    min_ns: u64,
    max_ns: u64,
    mean_ns: u64,
    p50_ns: u64,
    p90_ns: u64,
    p95_ns: u64,
    p97_ns: u64,
    p99_ns: u64,
    p999_ns: u64,
}

impl ServerSummary {
    fn from_latencies(latencies_ns: &mut [u64], elapsed_s: f64, target_latency_ms: f64) -> Self {
        latencies_ns.sort_unstable();
        let count = latencies_ns.len();
        let mean_ns = latencies_ns.iter().sum::<u64>() / count.max(1) as u64;
        let p99_ns = nearest_rank(latencies_ns, 99.0);
        let samples_per_second = if elapsed_s > 0.0 {
            count as f64 / elapsed_s
        } else {
            0.0
        };
        Self {
            samples_per_second,
            valid: (p99_ns as f64) <= target_latency_ms * 1.0e6,
            min_ns: latencies_ns.first().copied().unwrap_or(0),
            max_ns: latencies_ns.last().copied().unwrap_or(0),
            mean_ns,
            p50_ns: nearest_rank(latencies_ns, 50.0),
            p90_ns: nearest_rank(latencies_ns, 90.0),
            p95_ns: nearest_rank(latencies_ns, 95.0),
            p97_ns: nearest_rank(latencies_ns, 97.0),
            p99_ns,
            p999_ns: nearest_rank(latencies_ns, 99.9),
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let rule = "================================================";
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "MLPerf Results Summary");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "SUT name : threadtune");
        let _ = writeln!(out, "Scenario : Server");
        let _ = writeln!(out, "Mode     : PerformanceOnly");
        let _ = writeln!(out, "Scheduled samples per second : {:.2}", self.samples_per_second);
        let _ = writeln!(
            out,
            "Result is : {}",
            if self.valid { "VALID" } else { "INVALID" }
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Additional Stats");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Completed samples per second    : {:.2}", self.samples_per_second);
        let _ = writeln!(out);
        let _ = writeln!(out, "Min latency (ns)                : {}", self.min_ns);
        let _ = writeln!(out, "Max latency (ns)                : {}", self.max_ns);
        let _ = writeln!(out, "Mean latency (ns)               : {}", self.mean_ns);
        let _ = writeln!(out, "50.00 percentile latency (ns)   : {}", self.p50_ns);
        let _ = writeln!(out, "90.00 percentile latency (ns)   : {}", self.p90_ns);
        let _ = writeln!(out, "95.00 percentile latency (ns)   : {}", self.p95_ns);
        let _ = writeln!(out, "97.00 percentile latency (ns)   : {}", self.p97_ns);
        let _ = writeln!(out, "99.00 percentile latency (ns)   : {}", self.p99_ns);
        let _ = writeln!(out, "99.90 percentile latency (ns)   : {}", self.p999_ns);
        out
    }
}

/// Nearest-rank percentile over sorted samples.
fn nearest_rank(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 * p / 100.0).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[idx]
}
