//! Shared fixtures for unit tests.

use crate::config::TuningConfiguration;
use crate::observer::{SearchStep, TuningObserver};
use crate::result::BenchmarkResult;
use crate::space::TuningCombo;
use ndarray::{ArrayD, IxDyn};
use std::sync::Mutex;
use tempfile::TempDir;
use threadtune_runtime::{ElementType, InputFeed, ModelSpec, Tensor};

/// Observer that remembers event kinds and search steps.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<&'static str>>,
    steps: Mutex<Vec<SearchStep>>,
}

impl RecordingObserver {
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == kind)
            .count()
    }

    pub fn steps(&self) -> Vec<SearchStep> {
        self.steps.lock().unwrap().clone()
    }

    fn record(&self, kind: &'static str) {
        self.events.lock().unwrap().push(kind);
    }
}

impl TuningObserver for RecordingObserver {
    fn on_result(&self, _result: &BenchmarkResult) {
        self.record("result");
    }

    fn on_skip(&self, _test_name: &str, _mean_ms: f64, _bound_ms: f64) {
        self.record("skip");
    }

    fn on_invalid_report(&self, _test_name: &str, _reason: &str) {
        self.record("invalid_report");
    }

    fn on_combo_failed(&self, _combo: &TuningCombo, _error: &anyhow::Error) {
        self.record("combo_failed");
    }

    fn on_search_step(&self, step: &SearchStep) {
        self.steps.lock().unwrap().push(*step);
    }
}

/// A small dense model on disk, a quick configuration for it and a feed of
/// ones matching its single input.
pub fn tiny_model() -> (TempDir, TuningConfiguration, InputFeed) {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = ModelSpec::dense("tiny", 2, 8);
    spec.hidden = vec![8];
    let model_path = dir.path().join("tiny.json");
    spec.save(&model_path).unwrap();

    let mut config = TuningConfiguration::for_model(&model_path);
    config.cpu_cores = 2;
    config.warmup_num = 1;
    config.test_num = 3;
    config.result_path = dir.path().join("result");

    let mut feed = InputFeed::new();
    feed.insert(
        "input".to_string(),
        Tensor::new(ElementType::F32, ArrayD::ones(IxDyn(&[2, 8]))),
    );
    (dir, config, feed)
}
