//! Workload inputs: declared-type mapping, normalization and synthetic feeds.

use crate::config::TuningConfiguration;
use crate::error::TuneError;
use anyhow::{Context, Result};
use ndarray::{ArrayD, IxDyn};
use threadtune_runtime::{
    ElementType, InferenceEngine, InputFeed, SessionOptions, Tensor, TensorMetadata,
};

/// Element type for an engine's declared type string.
pub fn element_type_for(declared_type: &str) -> Option<ElementType> {
    let element = match declared_type {
        "tensor(float)" => ElementType::F32,
        "tensor(float16)" => ElementType::F16,
        "tensor(double)" => ElementType::F64,
        "tensor(int8)" => ElementType::I8,
        "tensor(int16)" => ElementType::I16,
        "tensor(int32)" => ElementType::I32,
        "tensor(int64)" => ElementType::I64,
        "tensor(uint8)" => ElementType::U8,
        "tensor(bool)" => ElementType::Bool,
        _ => return None,
    };
    Some(element)
}

fn resolve(input: &TensorMetadata) -> Result<ElementType, TuneError> {
    element_type_for(&input.declared_type).ok_or_else(|| TuneError::UnmappedElementType {
        input: input.name.clone(),
        declared_type: input.declared_type.clone(),
    })
}

/// Cast every declared input to its declared element type. Feed entries the
/// model does not declare are dropped.
pub fn normalize_feed(inputs: &[TensorMetadata], feed: &InputFeed) -> Result<InputFeed, TuneError> {
    let mut normalized = InputFeed::new();
    for input in inputs {
        let element = resolve(input)?;
        let tensor = feed.get(&input.name).ok_or_else(|| TuneError::MissingInput {
            input: input.name.clone(),
        })?;
        normalized.insert(input.name.clone(), tensor.cast(element));
    }
    Ok(normalized)
}

/// Normalize `feed` against the inputs the engine reports for the model.
pub fn normalize_inputs(
    engine: &dyn InferenceEngine,
    config: &TuningConfiguration,
    feed: &InputFeed,
) -> Result<InputFeed> {
    let session = engine
        .create_session(
            &config.model_path,
            &SessionOptions::default(),
            Some(engine.default_provider()),
        )
        .context("failed to open model for input inspection")?;
    Ok(normalize_feed(session.inputs(), feed)?)
}

/// Seeded random feed matching the declared inputs. Inputs without a shape
/// get a single element.
pub fn random_feed(inputs: &[TensorMetadata], seed: u64) -> Result<InputFeed, TuneError> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut feed = InputFeed::new();
    for input in inputs {
        let element = resolve(input)?;
        let shape = if input.shape.is_empty() {
            vec![1]
        } else {
            input.shape.clone()
        };
        let data = ArrayD::from_shape_simple_fn(IxDyn(&shape), || match element {
            ElementType::Bool => rng.u8(0..2) as f32,
            e if e.is_integer() => rng.u8(0..16) as f32,
            _ => rng.f32(),
        });
        feed.insert(input.name.clone(), Tensor::new(element, data));
    }
    Ok(feed)
}
