//! Quick latency sanity check run before a full measurement.

use crate::stats::mean;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use threadtune_runtime::{InferenceSession, InputFeed};

/// Outcome of the quick check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Verdict {
    Accepted { mean_ms: f64 },
    Rejected { mean_ms: f64, bound_ms: f64 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

/// Rejects candidates whose quick-check mean is at least `factor` times the
/// pretuning baseline.
#[derive(Debug, Clone)]
pub struct LatencyValidator {
    probe_runs: usize,
    factor: f64,
}

impl Default for LatencyValidator {
    fn default() -> Self {
        Self {
            probe_runs: 20,
            factor: 10.0,
        }
    }
}

impl LatencyValidator {
    pub fn new(probe_runs: usize, factor: f64) -> Self {
        Self {
            probe_runs: probe_runs.max(1),
            factor,
        }
    }

    pub fn probe_runs(&self) -> usize {
        self.probe_runs
    }

    pub fn bound_ms(&self, baseline_ms: f64) -> f64 {
        baseline_ms * self.factor
    }

    pub fn judge(&self, mean_ms: f64, baseline_ms: f64) -> Verdict {
        let bound_ms = self.bound_ms(baseline_ms);
        if mean_ms < bound_ms {
            Verdict::Accepted { mean_ms }
        } else {
            Verdict::Rejected { mean_ms, bound_ms }
        }
    }

    /// Time `probe_runs` calls on a warmed-up session and judge their mean.
    pub fn check(
        &self,
        session: &mut dyn InferenceSession,
        output_names: &[String],
        feed: &InputFeed,
        baseline_ms: f64,
    ) -> Result<Verdict> {
        let mut latencies_ms = Vec::with_capacity(self.probe_runs);
        for _ in 0..self.probe_runs {
            let start = Instant::now();
            let _ = session.run(output_names, feed)?;
            latencies_ms.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(self.judge(mean(&latencies_ms), baseline_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_against_ten_times_baseline() {
        let validator = LatencyValidator::default();
        assert!(!validator.judge(101.0, 10.0).is_accepted());
        assert!(validator.judge(99.0, 10.0).is_accepted());
        assert_eq!(
            validator.judge(100.0, 10.0),
            Verdict::Rejected {
                mean_ms: 100.0,
                bound_ms: 100.0
            }
        );
    }

    #[test]
    fn test_custom_factor() {
        let validator = LatencyValidator::new(5, 2.0);
        assert_eq!(validator.probe_runs(), 5);
        assert!(validator.judge(19.0, 10.0).is_accepted());
        assert!(!validator.judge(21.0, 10.0).is_accepted());
    }

    #[test]
    fn test_verdict_serialization() {
        let json = serde_json::to_string(&Verdict::Accepted { mean_ms: 1.0 }).unwrap();
        assert!(json.contains("Accepted"));
    }
}
