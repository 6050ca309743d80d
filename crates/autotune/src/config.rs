//! Tuning configuration: the search space and the sweep policy.

use crate::error::TuneError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use threadtune_runtime::{ExecutionMode, ExecutionProvider, GraphOptimizationLevel, LoadSettings};

/// What the sweep optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Minimize mean latency of directly timed calls.
    #[default]
    Latency,
    /// Maximize throughput reported by the load generator.
    Throughput,
}

/// How the thread-count search tracks the metric it compares probes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestMetricPolicy {
    /// Update the reference metric whenever a probe becomes the new best.
    #[default]
    Running,
    /// Compare every probe against the lower-bound measurement only. This
    /// reproduces the historical search path.
    Seeded,
}

/// Which parameter-space shape to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisStrategy {
    /// Full product including the OpenMP axes.
    Full,
    /// OpenMP axes collapsed to a single unset placeholder.
    CollapseOpenMp,
}

fn default_cpu_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_providers() -> Vec<ExecutionProvider> {
    vec![ExecutionProvider::Cpu]
}

fn default_execution_modes() -> Vec<ExecutionMode> {
    vec![ExecutionMode::Sequential]
}

fn default_opt_levels() -> Vec<GraphOptimizationLevel> {
    vec![GraphOptimizationLevel::All]
}

fn default_thread_candidates() -> Vec<Option<usize>> {
    vec![None]
}

fn default_warmup_num() -> usize {
    10
}

fn default_test_num() -> usize {
    20
}

fn default_result_path() -> PathBuf {
    PathBuf::from("result")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfiguration {
    pub model_path: PathBuf,

    /// Outputs requested from every run; empty means all session outputs.
    #[serde(default)]
    pub output_names: Vec<String>,

    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: usize,

    #[serde(default = "default_providers")]
    pub providers: Vec<ExecutionProvider>,
    #[serde(default = "default_execution_modes")]
    pub execution_modes: Vec<ExecutionMode>,
    #[serde(default = "default_opt_levels")]
    pub opt_levels: Vec<GraphOptimizationLevel>,

    // OpenMP knobs; an empty list means a single unset value.
    #[serde(default)]
    pub omp_wait_policies: Vec<String>,
    #[serde(default)]
    pub kmp_affinities: Vec<String>,
    #[serde(default)]
    pub omp_max_active_levels: Vec<String>,

    /// `None` entries request a search over `[1, cpu_cores]`.
    #[serde(default = "default_thread_candidates")]
    pub inter_thread_candidates: Vec<Option<usize>>,
    #[serde(default = "default_thread_candidates")]
    pub intra_thread_candidates: Vec<Option<usize>>,

    #[serde(default)]
    pub objective: Objective,
    #[serde(default)]
    pub best_metric: BestMetricPolicy,

    #[serde(default = "default_warmup_num")]
    pub warmup_num: usize,
    #[serde(default = "default_test_num")]
    pub test_num: usize,

    /// Baseline for the latency sanity check; measured when absent.
    #[serde(default)]
    pub pretuning_latency_ms: Option<f64>,

    #[serde(default)]
    pub openmp_enabled: bool,
    /// The runtime threads through OpenMP, so its knobs always matter.
    #[serde(default)]
    pub openmp_threading_runtime: bool,
    #[serde(default)]
    pub trt_fp16_enabled: bool,

    /// Directory the load generator writes its report into.
    #[serde(default = "default_result_path")]
    pub result_path: PathBuf,
    #[serde(default)]
    pub load: LoadSettings,

    /// Worker count for the concurrent-load mode.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl TuningConfiguration {
    /// Configuration with every field defaulted apart from the model.
    pub fn for_model(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            output_names: Vec::new(),
            cpu_cores: default_cpu_cores(),
            providers: default_providers(),
            execution_modes: default_execution_modes(),
            opt_levels: default_opt_levels(),
            omp_wait_policies: Vec::new(),
            kmp_affinities: Vec::new(),
            omp_max_active_levels: Vec::new(),
            inter_thread_candidates: default_thread_candidates(),
            intra_thread_candidates: default_thread_candidates(),
            objective: Objective::default(),
            best_metric: BestMetricPolicy::default(),
            warmup_num: default_warmup_num(),
            test_num: default_test_num(),
            pretuning_latency_ms: None,
            openmp_enabled: false,
            openmp_threading_runtime: false,
            trt_fp16_enabled: false,
            result_path: default_result_path(),
            load: LoadSettings::default(),
            concurrency: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let blob = fs::read(path)
            .with_context(|| format!("failed to read tuning configuration {}", path.display()))?;
        let config: TuningConfiguration = serde_json::from_slice(&blob)
            .with_context(|| format!("invalid tuning configuration {}", path.display()))?;
        Ok(config)
    }

    pub fn axis_strategy(&self) -> AxisStrategy {
        if self.openmp_enabled || self.openmp_threading_runtime {
            AxisStrategy::Full
        } else {
            AxisStrategy::CollapseOpenMp
        }
    }

    /// Check that the configuration describes a searchable space.
    pub fn validate(&self) -> Result<(), TuneError> {
        let invalid = |msg: String| Err(TuneError::InvalidConfig(msg));

        if self.cpu_cores == 0 {
            return invalid("cpu_cores must be > 0".into());
        }
        if self.test_num == 0 {
            return invalid("test_num must be > 0".into());
        }
        if self.providers.is_empty() {
            return invalid("at least one execution provider is required".into());
        }
        if self.execution_modes.is_empty() {
            return invalid("at least one execution mode is required".into());
        }
        if self.opt_levels.is_empty() {
            return invalid("at least one graph optimization level is required".into());
        }
        if self.inter_thread_candidates.is_empty() || self.intra_thread_candidates.is_empty() {
            return invalid("thread candidate lists must not be empty (use null to search)".into());
        }
        for threads in self
            .inter_thread_candidates
            .iter()
            .chain(self.intra_thread_candidates.iter())
            .flatten()
        {
            if *threads == 0 || *threads > self.cpu_cores {
                return invalid(format!(
                    "fixed thread count {} is outside [1, {}]",
                    threads, self.cpu_cores
                ));
            }
        }
        if let Some(baseline) = self.pretuning_latency_ms {
            if baseline.is_nan() || baseline <= 0.0 {
                return invalid(format!("pretuning latency {baseline} must be positive"));
            }
        }
        if let Some(workers) = self.concurrency {
            if workers == 0 {
                return invalid("concurrency must be > 0".into());
            }
        }
        Ok(())
    }
}
