//! Engine and session seams.
//!
//! The tuner only ever talks to an inference runtime through these traits:
//! it builds sessions, reads their input/output metadata and times `run`.

use crate::options::{ExecutionProvider, SessionOptions};
use crate::tensor::{InputFeed, Tensor, TensorMetadata};
use anyhow::Result;
use std::path::Path;

/// A loaded model bound to one provider and one set of options.
pub trait InferenceSession: Send {
    fn inputs(&self) -> &[TensorMetadata];

    fn outputs(&self) -> &[TensorMetadata];

    /// Run the model. Only timing matters to the tuner; outputs may be dropped.
    fn run(&mut self, output_names: &[String], feed: &InputFeed) -> Result<Vec<Tensor>>;

    fn output_names(&self) -> Vec<String> {
        self.outputs().iter().map(|o| o.name.clone()).collect()
    }
}

pub type DynSession = Box<dyn InferenceSession>;

/// Factory for sessions.
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available_providers(&self) -> Vec<ExecutionProvider>;

    /// Build a session. `provider == None` lets the engine pick its default.
    fn create_session(
        &self,
        model_path: &Path,
        options: &SessionOptions,
        provider: Option<ExecutionProvider>,
    ) -> Result<DynSession>;

    /// Provider used for unconfigured sessions: CUDA when offered, CPU otherwise.
    fn default_provider(&self) -> ExecutionProvider {
        if self.available_providers().contains(&ExecutionProvider::Cuda) {
            ExecutionProvider::Cuda
        } else {
            ExecutionProvider::Cpu
        }
    }
}
