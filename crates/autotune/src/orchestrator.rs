//! End-to-end sweep over the tuning space.

use crate::bench::{Benchmark, BenchmarkAdapter};
use crate::candidate::CandidatePoint;
use crate::config::TuningConfiguration;
use crate::inputs::normalize_inputs;
use crate::observer::TuningObserver;
use crate::result::TuningSession;
use crate::search::ThreadCountOptimizer;
use crate::space::ParameterSpace;
use crate::validator::LatencyValidator;
use anyhow::Result;
use threadtune_runtime::{InferenceEngine, InputFeed, LoadGenerator};
use tracing::{info, warn};

/// Drives a full sweep: validation, input normalization, the pretuning
/// baseline and one thread search per combination and thread pairing.
pub struct Tuner<'a> {
    engine: &'a dyn InferenceEngine,
    config: &'a TuningConfiguration,
    observer: &'a dyn TuningObserver,
    load_generator: Option<Box<dyn LoadGenerator + 'a>>,
    validator: LatencyValidator,
}

impl<'a> Tuner<'a> {
    pub fn new(
        engine: &'a dyn InferenceEngine,
        config: &'a TuningConfiguration,
        observer: &'a dyn TuningObserver,
    ) -> Self {
        Self {
            engine,
            config,
            observer,
            load_generator: None,
            validator: LatencyValidator::default(),
        }
    }

    /// Load generator used in throughput mode.
    pub fn with_load_generator(mut self, load_generator: Box<dyn LoadGenerator + 'a>) -> Self {
        self.load_generator = Some(load_generator);
        self
    }

    pub fn with_validator(mut self, validator: LatencyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Run the sweep. Configuration and input errors abort it; a failing
    /// combination is reported to the observer and skipped.
    pub fn run(self, feed: &InputFeed) -> Result<TuningSession> {
        let Tuner {
            engine,
            config,
            observer,
            load_generator,
            validator,
        } = self;

        config.validate()?;
        let feed = normalize_inputs(engine, config, feed)?;

        let mut adapter =
            BenchmarkAdapter::new(engine, config, &feed, observer).with_validator(validator);
        if let Some(load_generator) = load_generator {
            adapter = adapter.with_load_generator(load_generator);
        }

        let mut session = TuningSession::new();
        if adapter.baseline_ms().is_none() {
            match adapter.measure_pretuning()? {
                Some(pretuning) => {
                    info!(
                        avg_ms = pretuning.latency_ms.avg,
                        "pretuning baseline measured"
                    );
                    adapter.set_baseline_ms(pretuning.latency_ms.avg);
                    session.push(pretuning);
                }
                None => warn!("pretuning measurement produced no result"),
            }
        }

        run_combos(config, &mut adapter, observer, &mut session);
        Ok(session)
    }
}

/// Search every combination and thread-candidate pairing, appending accepted
/// results to `session`. An error abandons the rest of its combination only.
pub fn run_combos(
    config: &TuningConfiguration,
    bench: &mut dyn Benchmark,
    observer: &dyn TuningObserver,
    session: &mut TuningSession,
) {
    let optimizer = ThreadCountOptimizer::new(config, observer);
    let space = ParameterSpace::new(config);
    info!(combos = space.len(), "starting sweep");

    'combos: for combo in space.iter() {
        for &inter in &config.inter_thread_candidates {
            for &intra in &config.intra_thread_candidates {
                let mut candidate = CandidatePoint::new(combo.clone(), inter, intra);
                if let Err(err) = optimizer.optimize(&mut candidate, bench, session) {
                    observer.on_combo_failed(&combo, &err);
                    continue 'combos;
                }
                info!(
                    combo = %combo,
                    inter = ?candidate.inter_op_threads,
                    intra = ?candidate.intra_op_threads,
                    "thread search finished"
                );
            }
        }
    }
}
