//! Tensors fed to and returned from sessions.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric representation of a tensor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    Bool,
}

impl ElementType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ElementType::I8 | ElementType::I16 | ElementType::I32 | ElementType::I64 | ElementType::U8
        )
    }

    /// Inclusive value range representable by the type, if bounded below f32.
    fn bounds(&self) -> Option<(f32, f32)> {
        match self {
            ElementType::I8 => Some((i8::MIN as f32, i8::MAX as f32)),
            ElementType::I16 => Some((i16::MIN as f32, i16::MAX as f32)),
            ElementType::U8 => Some((0.0, u8::MAX as f32)),
            ElementType::Bool => Some((0.0, 1.0)),
            _ => None,
        }
    }
}

/// Name and declared element type of a session input or output.
///
/// `declared_type` is the engine's own spelling, e.g. `tensor(float)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMetadata {
    pub name: String,
    pub declared_type: String,
    #[serde(default)]
    pub shape: Vec<usize>,
}

/// Dense tensor; values are held as `f32` and tagged with their element type.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub element_type: ElementType,
    pub data: ArrayD<f32>,
}

impl Tensor {
    pub fn new(element_type: ElementType, data: ArrayD<f32>) -> Self {
        Self { element_type, data }
    }

    pub fn zeros(element_type: ElementType, shape: &[usize]) -> Self {
        Self::new(element_type, ArrayD::zeros(IxDyn(shape)))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Convert to another element type, truncating and saturating like a
    /// numeric cast would.
    pub fn cast(&self, target: ElementType) -> Tensor {
        if target == self.element_type {
            return self.clone();
        }
        let bounds = target.bounds();
        let data = self.data.mapv(|value| {
            let value = match target {
                ElementType::Bool => {
                    if value != 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                t if t.is_integer() => value.trunc(),
                _ => value,
            };
            match bounds {
                Some((lo, hi)) => value.clamp(lo, hi),
                None => value,
            }
        });
        Tensor::new(target, data)
    }
}

/// Named inputs for one inference call.
pub type InputFeed = BTreeMap<String, Tensor>;
