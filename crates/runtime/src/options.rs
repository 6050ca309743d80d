//! Session option types shared by engines and the tuner.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Backend that executes a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutionProvider {
    #[serde(rename = "CPUExecutionProvider")]
    Cpu,
    #[serde(rename = "CUDAExecutionProvider")]
    Cuda,
    #[serde(rename = "TensorrtExecutionProvider")]
    TensorRt,
    #[serde(rename = "OpenVINOExecutionProvider")]
    OpenVino,
    #[serde(rename = "DnnlExecutionProvider")]
    Dnnl,
}

impl ExecutionProvider {
    pub const ALL: [ExecutionProvider; 5] = [
        ExecutionProvider::Cpu,
        ExecutionProvider::Cuda,
        ExecutionProvider::TensorRt,
        ExecutionProvider::OpenVino,
        ExecutionProvider::Dnnl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProvider::Cpu => "CPUExecutionProvider",
            ExecutionProvider::Cuda => "CUDAExecutionProvider",
            ExecutionProvider::TensorRt => "TensorrtExecutionProvider",
            ExecutionProvider::OpenVino => "OpenVINOExecutionProvider",
            ExecutionProvider::Dnnl => "DnnlExecutionProvider",
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let provider = match lower.as_str() {
            "cpu" | "cpuexecutionprovider" => ExecutionProvider::Cpu,
            "cuda" | "cudaexecutionprovider" => ExecutionProvider::Cuda,
            "tensorrt" | "trt" | "tensorrtexecutionprovider" => ExecutionProvider::TensorRt,
            "openvino" | "openvinoexecutionprovider" => ExecutionProvider::OpenVino,
            "dnnl" | "dnnlexecutionprovider" => ExecutionProvider::Dnnl,
            _ => bail!("unknown execution provider `{}`", s),
        };
        Ok(provider)
    }
}

/// Operator scheduling within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Degree of static graph rewriting applied before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOptimizationLevel {
    DisableAll,
    Basic,
    Extended,
    All,
}

impl GraphOptimizationLevel {
    /// Numeric level as understood by ONNX-style runtimes.
    pub fn level(&self) -> u32 {
        match self {
            GraphOptimizationLevel::DisableAll => 0,
            GraphOptimizationLevel::Basic => 1,
            GraphOptimizationLevel::Extended => 2,
            GraphOptimizationLevel::All => 99,
        }
    }
}

impl fmt::Display for GraphOptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Options a session is built with.
///
/// `None` thread counts leave the choice to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_op_num_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intra_op_num_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_optimization_level: Option<GraphOptimizationLevel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_entries: BTreeMap<String, String>,
}

impl SessionOptions {
    pub fn with_config_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_entries.insert(key.into(), value.into());
        self
    }
}
