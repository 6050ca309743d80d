//! Benchmark results and the session that accumulates them.

use crate::config::Objective;
use crate::env::ThreadingEnv;
use crate::stats::LatencyStats;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use threadtune_runtime::{ExecutionProvider, SessionOptions};

/// Test name of the unconfigured baseline measurement.
pub const PRETUNING_TEST_NAME: &str = "pretuning";

/// One accepted measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub test_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_provider: Option<ExecutionProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<ThreadingEnv>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_options: Option<SessionOptions>,
    pub latency_ms: LatencyStats,
    /// `null` when the mean latency was zero.
    pub throughput: Option<f64>,
}

impl BenchmarkResult {
    pub fn is_pretuning(&self) -> bool {
        self.test_name == PRETUNING_TEST_NAME
    }

    /// Score where larger is better for the given objective.
    pub fn score(&self, objective: Objective) -> Option<f64> {
        match objective {
            Objective::Latency => Some(-self.latency_ms.avg),
            Objective::Throughput => self.throughput,
        }
    }
}

/// Every accepted result of a sweep, in measurement order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningSession {
    results: Vec<BenchmarkResult>,
}

impl TuningSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[BenchmarkResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<BenchmarkResult> {
        self.results
    }

    /// Best tuned result; the pretuning baseline never wins.
    pub fn best(&self, objective: Objective) -> Option<&BenchmarkResult> {
        self.results
            .iter()
            .filter(|r| !r.is_pretuning())
            .filter_map(|r| r.score(objective).map(|s| (s, r)))
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, r)| r)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read tuning session {}", path.display()))?;
        let session = serde_json::from_slice(&data)?;
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)
            .with_context(|| format!("failed to write tuning session {}", path.display()))?;
        Ok(())
    }
}

impl Extend<BenchmarkResult> for TuningSession {
    fn extend<I: IntoIterator<Item = BenchmarkResult>>(&mut self, iter: I) {
        self.results.extend(iter);
    }
}
