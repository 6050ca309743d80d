//! Latency statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency summary in milliseconds.
///
/// `p75` is only known for directly timed runs; load-generator reports do
/// not carry it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub p50: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p75: Option<f64>,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
}

impl LatencyStats {
    /// Summarize per-call wall-clock durations. Values are rounded to five
    /// decimals of a millisecond.
    pub fn from_durations(samples: &[Duration]) -> Self {
        let ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        Self::from_millis(&ms)
    }

    pub fn from_millis(samples_ms: &[f64]) -> Self {
        let mut sorted = samples_ms.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            avg: round5(mean(&sorted)),
            p50: round5(percentile(&sorted, 50.0)),
            p75: Some(round5(percentile(&sorted, 75.0))),
            p90: round5(percentile(&sorted, 90.0)),
            p95: round5(percentile(&sorted, 95.0)),
            p99: round5(percentile(&sorted, 99.0)),
            p999: round5(percentile(&sorted, 99.9)),
        }
    }

    /// Calls per second implied by the mean, `None` when the mean is zero.
    pub fn throughput(&self) -> Option<f64> {
        if self.avg != 0.0 {
            Some(1000.0 / self.avg)
        } else {
            None
        }
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Percentile of sorted samples with linear interpolation between the two
/// closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

fn round5(value: f64) -> f64 {
    (value * 1.0e5).round() / 1.0e5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_percentiles_of_one_to_hundred() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        let stats = LatencyStats::from_millis(&samples);
        assert_abs_diff_eq!(stats.avg, 50.5, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.p50, 50.5, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.p75.unwrap(), 75.25, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.p90, 90.1, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.p95, 95.05, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.p99, 99.01, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.p999, 99.901, epsilon = 1e-9);
    }

    #[test]
    fn test_order_of_samples_does_not_matter() {
        let forward: Vec<f64> = (1..=10).map(f64::from).collect();
        let backward: Vec<f64> = forward.iter().rev().copied().collect();
        assert_eq!(
            LatencyStats::from_millis(&forward),
            LatencyStats::from_millis(&backward)
        );
    }

    #[test]
    fn test_durations_are_converted_to_millis() {
        let samples = vec![Duration::from_micros(1500); 4];
        let stats = LatencyStats::from_durations(&samples);
        assert_abs_diff_eq!(stats.avg, 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.throughput().unwrap(), 1000.0 / 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_mean_has_no_throughput() {
        let stats = LatencyStats::from_millis(&[0.0, 0.0]);
        assert_eq!(stats.throughput(), None);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
