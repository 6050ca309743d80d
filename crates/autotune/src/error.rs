//! Typed failures the tuner distinguishes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TuneError {
    /// A model input declares an element type with no internal mapping.
    #[error("failed in mapping input `{input}` which has type {declared_type}")]
    UnmappedElementType {
        input: String,
        declared_type: String,
    },

    /// The workload does not provide a tensor for a model input.
    #[error("no workload tensor for model input `{input}`")]
    MissingInput { input: String },

    /// A required field is absent from a load-generation report.
    #[error("report field `{field}` is missing")]
    MissingReportField { field: String },

    /// A report field is present but not numeric.
    #[error("report field `{field}` has non-numeric value `{value}`")]
    InvalidReportValue { field: String, value: String },

    #[error("invalid tuning configuration: {0}")]
    InvalidConfig(String),
}
