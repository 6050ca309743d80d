//! Thread and session option tuning for inference runtimes.
//!
//! A sweep enumerates the non-thread axes of the tuning space (OpenMP knobs,
//! execution provider, execution mode, graph optimization level), and for
//! each combination binary-searches the inter-op and intra-op thread counts.
//! Candidates are measured either by directly timed calls gated against a
//! pretuning baseline, or through a load generator whose report is parsed
//! for throughput.

pub mod bench;
#[cfg(feature = "cli")]
pub mod cli;
pub mod candidate;
pub mod concurrent;
pub mod config;
pub mod env;
pub mod error;
pub mod inputs;
pub mod observer;
pub mod orchestrator;
pub mod report;
pub mod result;
pub mod search;
pub mod space;
pub mod stats;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use bench::{Benchmark, BenchmarkAdapter};
pub use candidate::{CandidatePoint, ThreadAxis};
pub use concurrent::{ConcurrentLoad, WorkerReport};
pub use config::{AxisStrategy, BestMetricPolicy, Objective, TuningConfiguration};
pub use env::{EnvScope, ThreadingEnv};
pub use error::TuneError;
pub use inputs::{element_type_for, normalize_feed, normalize_inputs, random_feed};
pub use observer::{NullObserver, SearchStep, TracingObserver, TuningObserver};
pub use orchestrator::{run_combos, Tuner};
pub use report::{parse_report, parse_report_dir, LoadReport};
pub use result::{BenchmarkResult, TuningSession, PRETUNING_TEST_NAME};
pub use search::ThreadCountOptimizer;
pub use space::{ParameterSpace, TuningCombo};
pub use stats::LatencyStats;
pub use validator::{LatencyValidator, Verdict};
