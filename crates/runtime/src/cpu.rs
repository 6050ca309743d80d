//! Reference CPU engine.
//!
//! Models are small JSON descriptions of dense branches: every input is pushed
//! through its own stack of fully connected layers (ReLU between layers) and
//! the branch outputs are summed into the single model output. Row-parallel
//! products run on a rayon pool sized by the intra-op thread count; in
//! parallel execution mode the branches themselves run on an inter-op pool.

use crate::engine::{DynSession, InferenceEngine, InferenceSession};
use crate::options::{ExecutionMode, ExecutionProvider, GraphOptimizationLevel, SessionOptions};
use crate::tensor::{ElementType, InputFeed, Tensor, TensorMetadata};
use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Declared type of the reference engine's output.
pub const FLOAT_TENSOR: &str = "tensor(float)";

fn default_hidden() -> Vec<usize> {
    vec![64, 16]
}

/// On-disk model description understood by [`CpuEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// Inputs; the first shape dimension is the batch.
    pub inputs: Vec<TensorMetadata>,
    pub output: String,
    #[serde(default = "default_hidden")]
    pub hidden: Vec<usize>,
    #[serde(default)]
    pub seed: u64,
}

impl ModelSpec {
    /// Single float input `[batch, features]` feeding a two-layer branch.
    pub fn dense(name: &str, batch: usize, features: usize) -> Self {
        Self {
            name: name.into(),
            inputs: vec![TensorMetadata {
                name: "input".into(),
                declared_type: FLOAT_TENSOR.into(),
                shape: vec![batch, features],
            }],
            output: "output".into(),
            hidden: default_hidden(),
            seed: 7,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let blob = fs::read(path)
            .with_context(|| format!("failed to read model description {}", path.display()))?;
        let spec: ModelSpec = serde_json::from_slice(&blob)
            .with_context(|| format!("invalid model description {}", path.display()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.inputs.is_empty(), "model `{}` declares no inputs", self.name);
        ensure!(!self.hidden.is_empty(), "model `{}` declares no layers", self.name);
        ensure!(
            self.hidden.iter().all(|&width| width > 0),
            "model `{}` has a zero-width layer",
            self.name
        );
        for input in &self.inputs {
            ensure!(
                !input.shape.is_empty() && input.shape.iter().all(|&d| d > 0),
                "input `{}` needs a non-empty shape with positive dimensions",
                input.name
            );
        }
        Ok(())
    }

    fn features(shape: &[usize]) -> usize {
        shape.iter().skip(1).product::<usize>().max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProductKernel {
    Reference,
    RowParallel,
}

struct Branch {
    input: String,
    weights: Vec<Array2<f32>>,
}

/// Engine that only offers the CPU provider.
#[derive(Debug, Default, Clone)]
pub struct CpuEngine;

impl CpuEngine {
    pub fn new() -> Self {
        Self
    }
}

impl InferenceEngine for CpuEngine {
    fn name(&self) -> &str {
        "cpu-reference"
    }

    fn available_providers(&self) -> Vec<ExecutionProvider> {
        vec![ExecutionProvider::Cpu]
    }

    fn create_session(
        &self,
        model_path: &Path,
        options: &SessionOptions,
        provider: Option<ExecutionProvider>,
    ) -> Result<DynSession> {
        if let Some(provider) = provider {
            if provider != ExecutionProvider::Cpu {
                bail!("{} is not available in the {} engine", provider, self.name());
            }
        }
        let spec = ModelSpec::load(model_path)?;
        Ok(Box::new(CpuSession::build(spec, options)?))
    }
}

pub struct CpuSession {
    inputs: Vec<TensorMetadata>,
    outputs: Vec<TensorMetadata>,
    branches: Vec<Branch>,
    kernel: ProductKernel,
    intra_pool: ThreadPool,
    inter_pool: Option<ThreadPool>,
}

impl CpuSession {
    fn build(spec: ModelSpec, options: &SessionOptions) -> Result<Self> {
        let scale = (2.0 / spec.hidden[0] as f32).sqrt();
        let branches = spec
            .inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                let mut rng = fastrand::Rng::with_seed(spec.seed.wrapping_add(idx as u64));
                let mut fan_in = ModelSpec::features(&input.shape);
                let weights = spec
                    .hidden
                    .iter()
                    .map(|&width| {
                        let w = Array2::from_shape_fn((fan_in, width), |_| {
                            (rng.f32() * 2.0 - 1.0) * scale
                        });
                        fan_in = width;
                        w
                    })
                    .collect();
                Branch {
                    input: input.name.clone(),
                    weights,
                }
            })
            .collect();

        let kernel = match options.graph_optimization_level {
            Some(GraphOptimizationLevel::DisableAll) => ProductKernel::Reference,
            _ => ProductKernel::RowParallel,
        };

        let intra_pool = ThreadPoolBuilder::new()
            .num_threads(options.intra_op_num_threads.unwrap_or(0))
            .thread_name(|i| format!("intra-op-{i}"))
            .build()
            .context("failed to build intra-op thread pool")?;

        let inter_pool = match options.execution_mode {
            Some(ExecutionMode::Parallel) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(options.inter_op_num_threads.unwrap_or(0))
                    .thread_name(|i| format!("inter-op-{i}"))
                    .build()
                    .context("failed to build inter-op thread pool")?,
            ),
            _ => None,
        };

        debug!(
            model = %spec.name,
            branches = spec.inputs.len(),
            intra_threads = intra_pool.current_num_threads(),
            inter_threads = inter_pool.as_ref().map(|p| p.current_num_threads()),
            "built cpu session"
        );

        Ok(Self {
            outputs: vec![TensorMetadata {
                name: spec.output.clone(),
                declared_type: FLOAT_TENSOR.into(),
                shape: Vec::new(),
            }],
            inputs: spec.inputs,
            branches,
            kernel,
            intra_pool,
            inter_pool,
        })
    }

    fn run_branch(&self, branch: &Branch, feed: &InputFeed) -> Result<Array2<f32>> {
        let tensor = feed
            .get(&branch.input)
            .with_context(|| format!("missing input `{}`", branch.input))?;
        let shape = tensor.shape();
        ensure!(!shape.is_empty(), "input `{}` is a scalar", branch.input);
        let batch = shape[0];
        let features = ModelSpec::features(shape);
        let mut activations =
            Array2::from_shape_vec((batch, features), tensor.data.iter().copied().collect())
                .with_context(|| format!("input `{}` has an unexpected layout", branch.input))?;

        let last = branch.weights.len() - 1;
        for (layer, weight) in branch.weights.iter().enumerate() {
            activations = self.product(activations.view(), weight.view())?;
            if layer != last {
                activations.mapv_inplace(|x| x.max(0.0));
            }
        }
        Ok(activations)
    }

    fn product(&self, lhs: ArrayView2<'_, f32>, rhs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if lhs.ncols() != rhs.nrows() {
            bail!(
                "dimension mismatch: lhs {}x{} vs rhs {}x{}",
                lhs.nrows(),
                lhs.ncols(),
                rhs.nrows(),
                rhs.ncols()
            );
        }
        match self.kernel {
            ProductKernel::Reference => Ok(lhs.dot(&rhs)),
            ProductKernel::RowParallel => {
                let mut output = Array2::<f32>::zeros((lhs.nrows(), rhs.ncols()));
                self.intra_pool.install(|| {
                    output
                        .axis_iter_mut(Axis(0))
                        .into_par_iter()
                        .enumerate()
                        .for_each(|(row_idx, mut row)| {
                            let lhs_row = lhs.row(row_idx);
                            for (col_idx, value) in row.iter_mut().enumerate() {
                                *value = lhs_row.dot(&rhs.column(col_idx));
                            }
                        });
                });
                Ok(output)
            }
        }
    }
}

impl InferenceSession for CpuSession {
    fn inputs(&self) -> &[TensorMetadata] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorMetadata] {
        &self.outputs
    }

    fn run(&mut self, output_names: &[String], feed: &InputFeed) -> Result<Vec<Tensor>> {
        for name in output_names {
            ensure!(
                self.outputs.iter().any(|o| &o.name == name),
                "unknown output `{}`",
                name
            );
        }

        let this = &*self;
        let partials: Vec<Array2<f32>> = match &this.inter_pool {
            Some(pool) => pool.install(|| {
                this.branches
                    .par_iter()
                    .map(|branch| this.run_branch(branch, feed))
                    .collect::<Result<Vec<_>>>()
            })?,
            None => this
                .branches
                .iter()
                .map(|branch| this.run_branch(branch, feed))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut partials = partials.into_iter();
        let mut sum = partials.next().context("model has no branches")?;
        for partial in partials {
            ensure!(
                partial.dim() == sum.dim(),
                "branch outputs disagree: {:?} vs {:?}",
                partial.dim(),
                sum.dim()
            );
            sum += &partial;
        }

        if output_names.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Tensor::new(ElementType::F32, sum.into_dyn())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::ArrayD;
    use ndarray::IxDyn;

    fn write_model(dir: &Path, spec: &ModelSpec) -> std::path::PathBuf {
        let path = dir.join("model.json");
        spec.save(&path).unwrap();
        path
    }

    fn ones_feed(spec: &ModelSpec) -> InputFeed {
        spec.inputs
            .iter()
            .map(|input| {
                (
                    input.name.clone(),
                    Tensor::new(ElementType::F32, ArrayD::from_elem(IxDyn(&input.shape), 1.0)),
                )
            })
            .collect()
    }

    #[test]
    fn test_rejects_unavailable_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_model(dir.path(), &ModelSpec::dense("tiny", 2, 8));
        let err = CpuEngine::new()
            .create_session(&path, &SessionOptions::default(), Some(ExecutionProvider::Cuda))
            .err()
            .expect("cuda must be rejected");
        assert!(err.to_string().contains("CUDAExecutionProvider"));
    }

    #[test]
    fn test_parallel_and_reference_kernels_agree() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModelSpec::dense("tiny", 4, 32);
        let path = write_model(dir.path(), &spec);
        let feed = ones_feed(&spec);
        let engine = CpuEngine::new();
        let outputs = vec!["output".to_string()];

        let reference_opts = SessionOptions {
            graph_optimization_level: Some(GraphOptimizationLevel::DisableAll),
            ..SessionOptions::default()
        };
        let parallel_opts = SessionOptions {
            intra_op_num_threads: Some(2),
            inter_op_num_threads: Some(2),
            execution_mode: Some(ExecutionMode::Parallel),
            graph_optimization_level: Some(GraphOptimizationLevel::All),
            ..SessionOptions::default()
        };

        let mut reference = engine.create_session(&path, &reference_opts, None).unwrap();
        let mut parallel = engine
            .create_session(&path, &parallel_opts, Some(ExecutionProvider::Cpu))
            .unwrap();

        let a = reference.run(&outputs, &feed).unwrap();
        let b = parallel.run(&outputs, &feed).unwrap();
        assert_eq!(a[0].shape(), &[4, 16]);
        for (x, y) in a[0].data.iter().zip(b[0].data.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModelSpec::dense("tiny", 1, 4);
        let path = write_model(dir.path(), &spec);
        let mut session = CpuEngine::new()
            .create_session(&path, &SessionOptions::default(), None)
            .unwrap();
        let outputs = session.output_names();
        assert_eq!(outputs, vec!["output".to_string()]);
        assert!(session.run(&outputs, &InputFeed::new()).is_err());
    }

    #[test]
    fn test_invalid_model_description() {
        let mut spec = ModelSpec::dense("broken", 1, 4);
        spec.hidden.clear();
        assert!(spec.validate().is_err());
    }
}
