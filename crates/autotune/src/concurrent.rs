//! Concurrent-load mode: N workers hammer one candidate at the same time.
//!
//! Every worker opens its own session and warms it up, then all of them wait
//! on a shared barrier so the timed phase starts together. Workers share no
//! mutable state and report only their outcome.

use crate::candidate::CandidatePoint;
use crate::config::TuningConfiguration;
use crate::env::{EnvScope, ThreadingEnv};
use crate::stats::LatencyStats;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Barrier;
use std::thread;
use std::time::Instant;
use threadtune_runtime::{
    DynSession, ExecutionProvider, InferenceEngine, InputFeed, SessionOptions,
};
use tracing::{debug, info};

/// Outcome of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time of the timed phase.
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<LatencyStats>,
}

impl WorkerReport {
    fn failed(worker: usize, error: String, elapsed_ms: f64) -> Self {
        Self {
            worker,
            succeeded: false,
            error: Some(error),
            elapsed_ms,
            latency_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConcurrentLoad {
    workers: usize,
}

impl ConcurrentLoad {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run the load for `candidate`. The candidate's environment is applied
    /// once, before any worker starts, and restored when all have finished.
    pub fn run(
        &self,
        engine: &dyn InferenceEngine,
        config: &TuningConfiguration,
        candidate: &CandidatePoint,
        feed: &InputFeed,
    ) -> Result<Vec<WorkerReport>> {
        ensure!(self.workers > 0, "concurrent load needs at least one worker");

        let env = ThreadingEnv::for_candidate(candidate, config.trt_fp16_enabled);
        let _scope = EnvScope::apply(&env);
        let options = candidate.session_options();
        let provider = candidate.combo.provider;
        let barrier = Barrier::new(self.workers);

        info!(
            workers = self.workers,
            test = %candidate.test_name(),
            "starting concurrent load"
        );
        let reports = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker| {
                    let barrier = &barrier;
                    let options = &options;
                    scope.spawn(move || {
                        let job = Worker {
                            index: worker,
                            engine,
                            config,
                            provider,
                            options,
                            feed,
                        };
                        job.run(barrier)
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        WorkerReport::failed(worker, "worker panicked".into(), 0.0)
                    })
                })
                .collect::<Vec<_>>()
        });
        Ok(reports)
    }
}

struct Worker<'a> {
    index: usize,
    engine: &'a dyn InferenceEngine,
    config: &'a TuningConfiguration,
    provider: ExecutionProvider,
    options: &'a SessionOptions,
    feed: &'a InputFeed,
}

impl Worker<'_> {
    fn run(&self, barrier: &Barrier) -> WorkerReport {
        // Setup failures still reach the barrier so the other workers are released.
        let prepared = self.prepare();
        barrier.wait();

        let start = Instant::now();
        let outcome = prepared.and_then(|(session, names)| self.timed(session, &names));
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(latency_ms) => {
                debug!(worker = self.index, avg_ms = latency_ms.avg, "worker finished");
                WorkerReport {
                    worker: self.index,
                    succeeded: true,
                    error: None,
                    elapsed_ms,
                    latency_ms: Some(latency_ms),
                }
            }
            Err(err) => {
                debug!(worker = self.index, error = %format!("{err:#}"), "worker failed");
                WorkerReport::failed(self.index, format!("{err:#}"), elapsed_ms)
            }
        }
    }

    fn prepare(&self) -> Result<(DynSession, Vec<String>)> {
        let mut session = self
            .engine
            .create_session(&self.config.model_path, self.options, Some(self.provider))
            .with_context(|| format!("worker {} failed to create its session", self.index))?;
        let names = if self.config.output_names.is_empty() {
            session.output_names()
        } else {
            self.config.output_names.clone()
        };
        for _ in 0..self.config.warmup_num {
            let _ = session.run(&names, self.feed)?;
        }
        Ok((session, names))
    }

    fn timed(&self, mut session: DynSession, names: &[String]) -> Result<LatencyStats> {
        let mut latencies = Vec::with_capacity(self.config.test_num);
        for _ in 0..self.config.test_num {
            let start = Instant::now();
            let _ = session.run(names, self.feed)?;
            latencies.push(start.elapsed());
        }
        Ok(LatencyStats::from_durations(&latencies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::TuningCombo;
    use crate::test_support::tiny_model;
    use threadtune_runtime::{CpuEngine, ExecutionMode, GraphOptimizationLevel};

    fn candidate(provider: ExecutionProvider) -> CandidatePoint {
        CandidatePoint::new(
            TuningCombo {
                omp_wait_policy: None,
                kmp_affinity: None,
                omp_max_active_levels: None,
                provider,
                execution_mode: ExecutionMode::Sequential,
                opt_level: GraphOptimizationLevel::Basic,
            },
            None,
            Some(1),
        )
    }

    #[test]
    fn test_all_workers_complete() {
        let (_dir, config, feed) = tiny_model();
        let reports = ConcurrentLoad::new(3)
            .run(&CpuEngine::new(), &config, &candidate(ExecutionProvider::Cpu), &feed)
            .unwrap();
        assert_eq!(reports.len(), 3);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.worker, i);
            assert!(report.succeeded, "{:?}", report.error);
            assert!(report.latency_ms.is_some());
        }
    }

    #[test]
    fn test_setup_failure_does_not_block_barrier() {
        let (_dir, config, feed) = tiny_model();
        let reports = ConcurrentLoad::new(2)
            .run(&CpuEngine::new(), &config, &candidate(ExecutionProvider::Cuda), &feed)
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.succeeded && r.error.is_some()));
    }

    #[test]
    fn test_zero_workers_is_an_error() {
        let (_dir, config, feed) = tiny_model();
        assert!(ConcurrentLoad::new(0)
            .run(&CpuEngine::new(), &config, &candidate(ExecutionProvider::Cpu), &feed)
            .is_err());
    }
}
