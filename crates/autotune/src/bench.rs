//! Single measurements of candidate points.
//!
//! [`BenchmarkAdapter`] builds a session for a candidate under the candidate's
//! environment, warms it up and produces at most one [`BenchmarkResult`]:
//! directly timed calls in latency mode, a load-generator run plus report
//! parse in throughput mode.

use crate::candidate::CandidatePoint;
use crate::config::{Objective, TuningConfiguration};
use crate::env::{EnvScope, ThreadingEnv};
use crate::observer::TuningObserver;
use crate::report::parse_report_dir;
use crate::result::{BenchmarkResult, PRETUNING_TEST_NAME};
use crate::stats::LatencyStats;
use crate::validator::{LatencyValidator, Verdict};
use anyhow::{Context, Result};
use std::fs;
use std::time::Instant;
use threadtune_runtime::{
    Dataset, DynSession, ExecutionProvider, InferenceEngine, InputFeed, LoadGenerator,
    SessionOptions, REPORT_FILE_NAME,
};

/// Oracle the thread-count search measures candidates with.
///
/// `Ok(None)` means the candidate was measured but its result was rejected
/// (latency gate, invalid report); `Err` means it could not be measured.
pub trait Benchmark {
    fn measure(&mut self, candidate: &CandidatePoint) -> Result<Option<BenchmarkResult>>;
}

/// What a result records about the configuration it was measured with.
struct Provenance {
    provider: ExecutionProvider,
    env: ThreadingEnv,
    options: SessionOptions,
}

pub struct BenchmarkAdapter<'a> {
    engine: &'a dyn InferenceEngine,
    config: &'a TuningConfiguration,
    feed: &'a InputFeed,
    observer: &'a dyn TuningObserver,
    load_generator: Option<Box<dyn LoadGenerator + 'a>>,
    validator: LatencyValidator,
    baseline_ms: Option<f64>,
}

impl<'a> BenchmarkAdapter<'a> {
    pub fn new(
        engine: &'a dyn InferenceEngine,
        config: &'a TuningConfiguration,
        feed: &'a InputFeed,
        observer: &'a dyn TuningObserver,
    ) -> Self {
        Self {
            engine,
            config,
            feed,
            observer,
            load_generator: None,
            validator: LatencyValidator::default(),
            baseline_ms: config.pretuning_latency_ms,
        }
    }

    pub fn with_load_generator(mut self, load_generator: Box<dyn LoadGenerator + 'a>) -> Self {
        self.load_generator = Some(load_generator);
        self
    }

    pub fn with_validator(mut self, validator: LatencyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn baseline_ms(&self) -> Option<f64> {
        self.baseline_ms
    }

    pub fn set_baseline_ms(&mut self, baseline_ms: f64) {
        self.baseline_ms = Some(baseline_ms);
    }

    /// Measure the unconfigured session. Never gated.
    pub fn measure_pretuning(&mut self) -> Result<Option<BenchmarkResult>> {
        let _scope = EnvScope::apply(&ThreadingEnv::default());
        let provider = self.engine.default_provider();
        let session = self
            .engine
            .create_session(&self.config.model_path, &SessionOptions::default(), Some(provider))
            .context("failed to create pretuning session")?;
        self.measure_session(PRETUNING_TEST_NAME.to_string(), session, None)
    }

    fn measure_session(
        &mut self,
        test_name: String,
        mut session: DynSession,
        provenance: Option<Provenance>,
    ) -> Result<Option<BenchmarkResult>> {
        let output_names = if self.config.output_names.is_empty() {
            session.output_names()
        } else {
            self.config.output_names.clone()
        };

        let measured = match self.config.objective {
            Objective::Latency => {
                let gated = provenance.is_some();
                self.measure_latency(&test_name, &mut session, &output_names, gated)?
            }
            Objective::Throughput => {
                self.measure_throughput(&test_name, &mut session, &output_names)?
            }
        };

        let Some((latency_ms, throughput)) = measured else {
            return Ok(None);
        };

        let (execution_provider, env_vars, session_options) = match provenance {
            Some(p) => (Some(p.provider), Some(p.env), Some(p.options)),
            None => (None, None, None),
        };
        let result = BenchmarkResult {
            test_name,
            execution_provider,
            env_vars,
            session_options,
            latency_ms,
            throughput,
        };
        self.observer.on_result(&result);
        Ok(Some(result))
    }

    fn measure_latency(
        &mut self,
        test_name: &str,
        session: &mut DynSession,
        output_names: &[String],
        gated: bool,
    ) -> Result<Option<(LatencyStats, Option<f64>)>> {
        for _ in 0..self.config.warmup_num {
            let _ = session.run(output_names, self.feed)?;
        }

        if gated {
            let baseline_ms = self
                .baseline_ms
                .context("latency gating needs a pretuning baseline")?;
            let verdict =
                self.validator
                    .check(session.as_mut(), output_names, self.feed, baseline_ms)?;
            if let Verdict::Rejected { mean_ms, bound_ms } = verdict {
                self.observer.on_skip(test_name, mean_ms, bound_ms);
                return Ok(None);
            }
        }

        let mut latencies = Vec::with_capacity(self.config.test_num);
        for _ in 0..self.config.test_num {
            let start = Instant::now();
            let _ = session.run(output_names, self.feed)?;
            latencies.push(start.elapsed());
        }

        let stats = LatencyStats::from_durations(&latencies);
        Ok(Some((stats, stats.throughput())))
    }

    fn measure_throughput(
        &mut self,
        test_name: &str,
        session: &mut DynSession,
        output_names: &[String],
    ) -> Result<Option<(LatencyStats, Option<f64>)>> {
        let report_dir = &self.config.result_path;
        let warmup_num = self.config.warmup_num;
        let load_generator = self
            .load_generator
            .as_mut()
            .context("throughput tuning needs a load generator")?;
        let dataset = Dataset::from_feed(self.feed.clone());

        load_generator.warmup(session.as_mut(), &dataset, output_names, warmup_num)?;

        // A report left by an earlier candidate must never be read as this one's.
        let stale = report_dir.join(REPORT_FILE_NAME);
        if stale.exists() {
            fs::remove_file(&stale)
                .with_context(|| format!("failed to remove {}", stale.display()))?;
        }
        load_generator.run(session.as_mut(), &dataset, output_names, report_dir)?;

        match parse_report_dir(report_dir) {
            Ok(report) if report.valid => Ok(Some((report.latency_ms, Some(report.throughput)))),
            Ok(_) => {
                self.observer
                    .on_invalid_report(test_name, "report is not marked VALID");
                Ok(None)
            }
            Err(e) => {
                self.observer.on_invalid_report(test_name, &format!("{e:#}"));
                Ok(None)
            }
        }
    }
}

impl Benchmark for BenchmarkAdapter<'_> {
    fn measure(&mut self, candidate: &CandidatePoint) -> Result<Option<BenchmarkResult>> {
        let env = ThreadingEnv::for_candidate(candidate, self.config.trt_fp16_enabled);
        let _scope = EnvScope::apply(&env);

        let provider = candidate.combo.provider;
        let options = candidate.session_options();
        let test_name = candidate.test_name();
        let session = self
            .engine
            .create_session(&self.config.model_path, &options, Some(provider))
            .with_context(|| format!("failed to create session for {test_name}"))?;

        self.measure_session(
            test_name,
            session,
            Some(Provenance {
                provider,
                env,
                options,
            }),
        )
    }
}
