//! Binary search over thread counts.
//!
//! Each thread axis is searched independently in `[1, cpu_cores]` (or pinned
//! to a fixed value). The lower bound is measured first and seeds the best
//! metric; the upper bound is probed next. After every probe the interval is
//! halved: a worse probe pulls `upper` down to the midpoint, a probe at least
//! as good pushes `lower` past it and becomes the provisional best.

use crate::bench::Benchmark;
use crate::candidate::{CandidatePoint, ThreadAxis};
use crate::config::{BestMetricPolicy, TuningConfiguration};
use crate::observer::{SearchStep, TuningObserver};
use crate::result::TuningSession;
use anyhow::Result;

pub struct ThreadCountOptimizer<'a> {
    config: &'a TuningConfiguration,
    observer: &'a dyn TuningObserver,
}

impl<'a> ThreadCountOptimizer<'a> {
    pub fn new(config: &'a TuningConfiguration, observer: &'a dyn TuningObserver) -> Self {
        Self { config, observer }
    }

    /// Search every axis relevant to the candidate's execution mode and leave
    /// the candidate pinned to the best counts found. Accepted results are
    /// pushed into `session` as they arrive, so they survive a later error.
    pub fn optimize(
        &self,
        candidate: &mut CandidatePoint,
        bench: &mut dyn Benchmark,
        session: &mut TuningSession,
    ) -> Result<()> {
        for &axis in ThreadAxis::for_mode(candidate.combo.execution_mode) {
            let best = self.search_axis(axis, candidate, bench, session)?;
            candidate.set_threads(axis, best);
        }
        Ok(())
    }

    fn search_axis(
        &self,
        axis: ThreadAxis,
        candidate: &mut CandidatePoint,
        bench: &mut dyn Benchmark,
        session: &mut TuningSession,
    ) -> Result<usize> {
        let (mut lower, mut upper) = match candidate.threads(axis) {
            Some(fixed) => (fixed, fixed),
            None => (1, self.config.cpu_cores.max(1)),
        };

        candidate.set_threads(axis, lower);
        let mut best_metric = self
            .measure(candidate, bench, session)?
            .unwrap_or(f64::NEG_INFINITY);
        let mut best = lower;
        let mut measurements = 1;
        self.report(axis, lower, lower, upper, best, measurements);

        let mut probe = upper;
        while lower < upper {
            candidate.set_threads(axis, probe);
            let score = self.measure(candidate, bench, session)?;
            measurements += 1;

            let mid = lower + (upper - lower) / 2;
            match score {
                Some(score) if score >= best_metric => {
                    lower = mid + 1;
                    best = probe;
                    if self.config.best_metric == BestMetricPolicy::Running {
                        best_metric = score;
                    }
                    self.report(axis, probe, lower, upper, best, measurements);
                    probe = lower;
                }
                _ => {
                    upper = mid;
                    self.report(axis, probe, lower, upper, best, measurements);
                    probe = upper;
                }
            }
        }

        Ok(best)
    }

    /// Measure the candidate, record an accepted result and return its score.
    fn measure(
        &self,
        candidate: &CandidatePoint,
        bench: &mut dyn Benchmark,
        session: &mut TuningSession,
    ) -> Result<Option<f64>> {
        let Some(result) = bench.measure(candidate)? else {
            return Ok(None);
        };
        let score = result.score(self.config.objective);
        session.push(result);
        Ok(score)
    }

    fn report(
        &self,
        axis: ThreadAxis,
        probe: usize,
        lower: usize,
        upper: usize,
        best: usize,
        measurements: usize,
    ) {
        self.observer.on_search_step(&SearchStep {
            axis,
            probe,
            lower,
            upper,
            best,
            measurements,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::BenchmarkResult;
    use crate::space::TuningCombo;
    use crate::stats::LatencyStats;
    use crate::test_support::RecordingObserver;
    use threadtune_runtime::{ExecutionMode, ExecutionProvider, GraphOptimizationLevel};

    /// Benchmark backed by a latency function of the candidate's threads.
    struct CostModel<F> {
        latency: F,
        calls: Vec<(Option<usize>, Option<usize>)>,
    }

    impl<F> CostModel<F>
    where
        F: FnMut(&CandidatePoint) -> Option<f64>,
    {
        fn new(latency: F) -> Self {
            Self {
                latency,
                calls: Vec::new(),
            }
        }
    }

    impl<F> Benchmark for CostModel<F>
    where
        F: FnMut(&CandidatePoint) -> Option<f64>,
    {
        fn measure(&mut self, candidate: &CandidatePoint) -> Result<Option<BenchmarkResult>> {
            self.calls
                .push((candidate.inter_op_threads, candidate.intra_op_threads));
            Ok((self.latency)(candidate).map(|ms| {
                let latency_ms = LatencyStats::from_millis(&[ms]);
                BenchmarkResult {
                    test_name: candidate.test_name(),
                    execution_provider: Some(candidate.combo.provider),
                    env_vars: None,
                    session_options: Some(candidate.session_options()),
                    throughput: latency_ms.throughput(),
                    latency_ms,
                }
            }))
        }
    }

    fn combo(mode: ExecutionMode) -> TuningCombo {
        TuningCombo {
            omp_wait_policy: None,
            kmp_affinity: None,
            omp_max_active_levels: None,
            provider: ExecutionProvider::Cpu,
            execution_mode: mode,
            opt_level: GraphOptimizationLevel::All,
        }
    }

    fn config(cpu_cores: usize, policy: BestMetricPolicy) -> TuningConfiguration {
        let mut config = TuningConfiguration::for_model("model.json");
        config.cpu_cores = cpu_cores;
        config.best_metric = policy;
        config
    }

    fn intra(c: &CandidatePoint) -> f64 {
        c.intra_op_threads.unwrap_or(1) as f64
    }

    fn ceil_log2(n: usize) -> usize {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }

    fn search(
        cpu_cores: usize,
        policy: BestMetricPolicy,
        latency: impl FnMut(&CandidatePoint) -> Option<f64>,
    ) -> (usize, usize, TuningSession, RecordingObserver) {
        let config = config(cpu_cores, policy);
        let observer = RecordingObserver::default();
        let optimizer = ThreadCountOptimizer::new(&config, &observer);
        let mut bench = CostModel::new(latency);
        let mut candidate = CandidatePoint::new(combo(ExecutionMode::Sequential), None, None);
        let mut session = TuningSession::new();
        optimizer
            .optimize(&mut candidate, &mut bench, &mut session)
            .unwrap();
        let best = candidate.intra_op_threads.unwrap();
        (best, bench.calls.len(), session, observer)
    }

    #[test]
    fn test_fixed_thread_count_measures_once() {
        let config = config(8, BestMetricPolicy::Running);
        let observer = RecordingObserver::default();
        let optimizer = ThreadCountOptimizer::new(&config, &observer);
        let mut bench = CostModel::new(|c: &CandidatePoint| Some(intra(c)));
        let mut candidate = CandidatePoint::new(combo(ExecutionMode::Sequential), None, Some(3));
        let mut session = TuningSession::new();

        optimizer
            .optimize(&mut candidate, &mut bench, &mut session)
            .unwrap();
        assert_eq!(bench.calls, vec![(None, Some(3))]);
        assert_eq!(candidate.intra_op_threads, Some(3));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_finds_optimum_when_more_threads_help() {
        for n in [1, 2, 8, 17, 64] {
            let (best, calls, _, _) =
                search(n, BestMetricPolicy::Running, |c| Some(1000.0 - intra(c)));
            assert_eq!(best, n, "cpu_cores = {n}");
            assert!(calls <= ceil_log2(n) + 2, "cpu_cores = {n}: {calls} calls");
        }
    }

    #[test]
    fn test_finds_optimum_when_more_threads_hurt() {
        for n in [1, 2, 8, 17, 64] {
            let (best, calls, _, _) = search(n, BestMetricPolicy::Running, |c| Some(1.0 + intra(c)));
            assert_eq!(best, 1, "cpu_cores = {n}");
            assert!(calls <= ceil_log2(n) + 2, "cpu_cores = {n}: {calls} calls");
        }
    }

    #[test]
    fn test_bounds_stay_in_range() {
        let n = 17;
        let (_, _, _, observer) = search(n, BestMetricPolicy::Running, |c| Some(1000.0 - intra(c)));
        let steps = observer.steps();
        assert!(!steps.is_empty());
        for step in steps {
            assert!(1 <= step.lower && step.lower <= step.upper && step.upper <= n);
            assert!(1 <= step.best && step.best <= n);
            assert!(1 <= step.probe && step.probe <= n);
        }
    }

    #[test]
    fn test_every_accepted_probe_is_recorded() {
        let (_, calls, session, _) = search(8, BestMetricPolicy::Running, |c| Some(1.0 + intra(c)));
        assert_eq!(session.len(), calls);
    }

    #[test]
    fn test_seeded_policy_keeps_lower_bound_metric() {
        // Every probe only has to beat the seed, so the search keeps moving up
        // and settles one short of the true optimum.
        let (best, calls, _, _) = search(8, BestMetricPolicy::Seeded, |c| Some(1000.0 - intra(c)));
        assert_eq!(best, 7);
        assert_eq!(calls, 4);

        let (best, _, _, _) = search(8, BestMetricPolicy::Running, |c| Some(1000.0 - intra(c)));
        assert_eq!(best, 8);
    }

    #[test]
    fn test_rejected_probe_counts_as_worse() {
        let (best, calls, session, _) = search(8, BestMetricPolicy::Running, |c| {
            let t = intra(c);
            (t <= 4.0).then(|| 100.0 - t)
        });
        assert_eq!(best, 4);
        assert_eq!(calls, 4);
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn test_rejected_seed_counts_as_worst() {
        let (best, _, session, _) = search(4, BestMetricPolicy::Running, |c| {
            let t = intra(c);
            (t > 1.0).then_some(t)
        });
        assert_eq!(best, 3);
        assert!(session
            .results()
            .iter()
            .all(|r| r.session_options.as_ref().unwrap().intra_op_num_threads != Some(1)));
    }

    #[test]
    fn test_parallel_mode_searches_inter_then_intra() {
        let config = config(4, BestMetricPolicy::Running);
        let observer = RecordingObserver::default();
        let optimizer = ThreadCountOptimizer::new(&config, &observer);
        let mut bench = CostModel::new(|c: &CandidatePoint| {
            let inter = c.inter_op_threads.unwrap_or(1) as f64;
            Some(100.0 - inter - 2.0 * intra(c))
        });
        let mut candidate = CandidatePoint::new(combo(ExecutionMode::Parallel), None, None);
        let mut session = TuningSession::new();

        optimizer
            .optimize(&mut candidate, &mut bench, &mut session)
            .unwrap();
        assert_eq!(candidate.inter_op_threads, Some(4));
        assert_eq!(candidate.intra_op_threads, Some(4));
        assert_eq!(bench.calls[0], (Some(1), None));
        assert!(bench.calls.iter().any(|&(inter, intra)| inter == Some(4) && intra.is_some()));
        let axes: Vec<_> = observer.steps().iter().map(|s| s.axis).collect();
        assert_eq!(axes.first(), Some(&ThreadAxis::InterOp));
        assert_eq!(axes.last(), Some(&ThreadAxis::IntraOp));
    }

    #[test]
    fn test_benchmark_error_keeps_earlier_results() {
        struct FailAt(usize);
        impl Benchmark for FailAt {
            fn measure(&mut self, candidate: &CandidatePoint) -> Result<Option<BenchmarkResult>> {
                let threads = candidate.intra_op_threads.unwrap_or(1);
                anyhow::ensure!(threads != self.0, "session creation failed");
                let latency_ms = LatencyStats::from_millis(&[threads as f64]);
                Ok(Some(BenchmarkResult {
                    test_name: candidate.test_name(),
                    execution_provider: None,
                    env_vars: None,
                    session_options: None,
                    throughput: latency_ms.throughput(),
                    latency_ms,
                }))
            }
        }

        let config = config(8, BestMetricPolicy::Running);
        let optimizer = ThreadCountOptimizer::new(&config, &crate::observer::NullObserver);
        let mut candidate = CandidatePoint::new(combo(ExecutionMode::Sequential), None, None);
        let mut session = TuningSession::new();
        let err = optimizer
            .optimize(&mut candidate, &mut FailAt(8), &mut session)
            .unwrap_err();
        assert!(err.to_string().contains("session creation failed"));
        assert_eq!(session.len(), 1);
    }
}
