//! Runtime seams for ThreadTune.
//!
//! The tuner treats the inference engine and the load generator as opaque
//! collaborators. This crate defines those seams ([`InferenceEngine`],
//! [`InferenceSession`], [`LoadGenerator`]) together with the option and
//! tensor types that cross them, plus reference CPU implementations used by
//! the CLI and the tests.

pub mod cpu;
pub mod engine;
pub mod loadgen;
pub mod options;
pub mod tensor;

pub use cpu::{CpuEngine, ModelSpec};
pub use engine::{DynSession, InferenceEngine, InferenceSession};
pub use loadgen::{Dataset, LoadGenerator, LoadSettings, ServerLoadGenerator, REPORT_FILE_NAME};
pub use options::{ExecutionMode, ExecutionProvider, GraphOptimizationLevel, SessionOptions};
pub use tensor::{ElementType, InputFeed, Tensor, TensorMetadata};
