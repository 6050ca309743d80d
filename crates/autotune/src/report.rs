//! Parser for load-generation summary reports.
//!
//! Reports are line oriented. One line decides validity
//! (`Result is : VALID`); the rest are `label : value` pairs from which the
//! throughput and the latency percentiles (in nanoseconds) are taken.

use crate::error::TuneError;
use crate::stats::LatencyStats;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use threadtune_runtime::REPORT_FILE_NAME;

pub const THROUGHPUT_FIELD: &str = "Scheduled samples per second";
pub const MEAN_LATENCY_FIELD: &str = "Mean latency (ns)";
pub const P50_FIELD: &str = "50.00 percentile latency (ns)";
pub const P90_FIELD: &str = "90.00 percentile latency (ns)";
pub const P95_FIELD: &str = "95.00 percentile latency (ns)";
pub const P99_FIELD: &str = "99.00 percentile latency (ns)";
pub const P999_FIELD: &str = "99.90 percentile latency (ns)";

const NS_PER_MS: f64 = 1.0e6;

/// Parsed content of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub valid: bool,
    pub latency_ms: LatencyStats,
    pub throughput: f64,
}

fn validity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Result\s+is\s*:\s+VALID").expect("valid regex"))
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([\w\s.()/]+?)\s*:\s*([\w+.]+)").expect("valid regex")
    })
}

/// Read and parse the summary report inside `result_dir`.
pub fn parse_report_dir(result_dir: &Path) -> Result<LoadReport> {
    let path = result_dir.join(REPORT_FILE_NAME);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    Ok(parse_report(&text)?)
}

/// Parse report text. A missing or non-numeric required field is an error,
/// never a silent zero.
pub fn parse_report(text: &str) -> Result<LoadReport, TuneError> {
    let mut valid = false;
    let mut fields: HashMap<String, String> = HashMap::new();

    for line in text.lines() {
        if validity_pattern().is_match(line) {
            valid = true;
        }
        if let Some(caps) = field_pattern().captures(line) {
            fields.insert(caps[1].trim().to_string(), caps[2].trim().to_string());
        }
    }

    let number = |field: &str| -> Result<f64, TuneError> {
        let raw = fields.get(field).ok_or_else(|| TuneError::MissingReportField {
            field: field.to_string(),
        })?;
        raw.parse::<f64>().map_err(|_| TuneError::InvalidReportValue {
            field: field.to_string(),
            value: raw.clone(),
        })
    };
    let latency = |field: &str| number(field).map(|ns| ns / NS_PER_MS);

    let throughput = number(THROUGHPUT_FIELD)?;
    let latency_ms = LatencyStats {
        avg: latency(MEAN_LATENCY_FIELD)?,
        p50: latency(P50_FIELD)?,
        p75: None,
        p90: latency(P90_FIELD)?,
        p95: latency(P95_FIELD)?,
        p99: latency(P99_FIELD)?,
        p999: latency(P999_FIELD)?,
    };

    Ok(LoadReport {
        valid,
        latency_ms,
        throughput,
    })
}
