//! Progress reporting for sweeps.

use crate::candidate::ThreadAxis;
use crate::result::BenchmarkResult;
use crate::space::TuningCombo;
use tracing::{debug, error, info};

/// State of one thread-axis search after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchStep {
    pub axis: ThreadAxis,
    pub probe: usize,
    pub lower: usize,
    pub upper: usize,
    pub best: usize,
    /// Measurements taken on this axis so far, the seed included.
    pub measurements: usize,
}

/// Receives sweep events. Every method defaults to doing nothing.
pub trait TuningObserver {
    fn on_result(&self, _result: &BenchmarkResult) {}

    /// The quick latency check turned the candidate down.
    fn on_skip(&self, _test_name: &str, _mean_ms: f64, _bound_ms: f64) {}

    /// The load-generation report was invalid or could not be parsed.
    fn on_invalid_report(&self, _test_name: &str, _reason: &str) {}

    fn on_combo_failed(&self, _combo: &TuningCombo, _error: &anyhow::Error) {}

    fn on_search_step(&self, _step: &SearchStep) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TuningObserver for NullObserver {}

/// Observer that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TuningObserver for TracingObserver {
    fn on_result(&self, result: &BenchmarkResult) {
        info!(
            test = %result.test_name,
            avg_ms = result.latency_ms.avg,
            throughput = result.throughput,
            "benchmark accepted"
        );
    }

    fn on_skip(&self, test_name: &str, mean_ms: f64, bound_ms: f64) {
        info!(test = %test_name, mean_ms, bound_ms, "skip test for latency reason");
    }

    fn on_invalid_report(&self, test_name: &str, reason: &str) {
        error!(
            test = %test_name,
            reason,
            "benchmark is not valid, increase the expected latency"
        );
    }

    fn on_combo_failed(&self, combo: &TuningCombo, error: &anyhow::Error) {
        error!(combo = %combo, error = %format!("{error:#}"), "optimization failed for tuning combo");
    }

    fn on_search_step(&self, step: &SearchStep) {
        debug!(
            axis = %step.axis,
            probe = step.probe,
            lower = step.lower,
            upper = step.upper,
            best = step.best,
            "thread search step"
        );
    }
}
