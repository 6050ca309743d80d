//! Candidate points: one concrete assignment of every tunable axis.

use crate::space::TuningCombo;
use serde::{Deserialize, Serialize};
use std::fmt;
use threadtune_runtime::{ExecutionMode, SessionOptions};

/// Session config entry applied to every tuned session.
pub const DYNAMIC_BLOCK_BASE_KEY: &str = "session.dynamic_block_base";
const DYNAMIC_BLOCK_BASE: &str = "4";

/// Thread pool the optimizer is searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadAxis {
    InterOp,
    IntraOp,
}

impl ThreadAxis {
    /// Axes worth searching for an execution mode, in search order.
    pub fn for_mode(mode: ExecutionMode) -> &'static [ThreadAxis] {
        match mode {
            ExecutionMode::Sequential => &[ThreadAxis::IntraOp],
            ExecutionMode::Parallel => &[ThreadAxis::InterOp, ThreadAxis::IntraOp],
        }
    }
}

impl fmt::Display for ThreadAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadAxis::InterOp => f.write_str("inter_op_num_threads"),
            ThreadAxis::IntraOp => f.write_str("intra_op_num_threads"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePoint {
    pub combo: TuningCombo,
    pub inter_op_threads: Option<usize>,
    pub intra_op_threads: Option<usize>,
}

impl CandidatePoint {
    pub fn new(combo: TuningCombo, inter: Option<usize>, intra: Option<usize>) -> Self {
        Self {
            combo,
            inter_op_threads: inter,
            intra_op_threads: intra,
        }
    }

    pub fn threads(&self, axis: ThreadAxis) -> Option<usize> {
        match axis {
            ThreadAxis::InterOp => self.inter_op_threads,
            ThreadAxis::IntraOp => self.intra_op_threads,
        }
    }

    pub fn set_threads(&mut self, axis: ThreadAxis, threads: usize) {
        match axis {
            ThreadAxis::InterOp => self.inter_op_threads = Some(threads),
            ThreadAxis::IntraOp => self.intra_op_threads = Some(threads),
        }
    }

    /// Session options for this point. Pure: no environment is touched.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            inter_op_num_threads: self.inter_op_threads,
            intra_op_num_threads: self.intra_op_threads,
            execution_mode: Some(self.combo.execution_mode),
            graph_optimization_level: Some(self.combo.opt_level),
            ..SessionOptions::default()
        }
        .with_config_entry(DYNAMIC_BLOCK_BASE_KEY, DYNAMIC_BLOCK_BASE)
    }

    /// Stable identifier naming every axis value.
    pub fn test_name(&self) -> String {
        let threads = |t: Option<usize>| t.map_or_else(|| "None".to_string(), |t| t.to_string());
        let mut name = format!(
            "execution_provider_{}_execution_mode_{}_graph_optimization_level_{}_inter_op_num_threads_{}_intra_op_num_threads_{}",
            self.combo.provider,
            self.combo.execution_mode,
            self.combo.opt_level,
            threads(self.inter_op_threads),
            threads(self.intra_op_threads),
        );
        let knobs = [
            ("OMP_WAIT_POLICY", &self.combo.omp_wait_policy),
            ("KMP_AFFINITY", &self.combo.kmp_affinity),
            ("OMP_MAX_ACTIVE_LEVELS", &self.combo.omp_max_active_levels),
        ];
        for (var, value) in knobs {
            if let Some(value) = value {
                name.push_str(&format!("_{var}_{value}"));
            }
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadtune_runtime::{ExecutionProvider, GraphOptimizationLevel};

    fn combo() -> TuningCombo {
        TuningCombo {
            omp_wait_policy: Some("PASSIVE".into()),
            kmp_affinity: None,
            omp_max_active_levels: None,
            provider: ExecutionProvider::Cpu,
            execution_mode: ExecutionMode::Parallel,
            opt_level: GraphOptimizationLevel::Extended,
        }
    }

    #[test]
    fn test_session_options_mirror_candidate() {
        let candidate = CandidatePoint::new(combo(), Some(2), Some(6));
        let options = candidate.session_options();
        assert_eq!(options.inter_op_num_threads, Some(2));
        assert_eq!(options.intra_op_num_threads, Some(6));
        assert_eq!(options.execution_mode, Some(ExecutionMode::Parallel));
        assert_eq!(
            options.graph_optimization_level,
            Some(GraphOptimizationLevel::Extended)
        );
        assert_eq!(
            options.config_entries.get(DYNAMIC_BLOCK_BASE_KEY).map(String::as_str),
            Some("4")
        );
    }

    #[test]
    fn test_name_lists_axes_and_set_knobs() {
        let mut candidate = CandidatePoint::new(combo(), None, None);
        candidate.set_threads(ThreadAxis::IntraOp, 3);
        let name = candidate.test_name();
        assert!(name.starts_with("execution_provider_CPUExecutionProvider"));
        assert!(name.contains("inter_op_num_threads_None"));
        assert!(name.contains("intra_op_num_threads_3"));
        assert!(name.ends_with("_OMP_WAIT_POLICY_PASSIVE"));
        assert!(!name.contains("KMP_AFFINITY"));
    }

    #[test]
    fn test_axes_for_mode() {
        assert_eq!(ThreadAxis::for_mode(ExecutionMode::Sequential), &[ThreadAxis::IntraOp]);
        assert_eq!(
            ThreadAxis::for_mode(ExecutionMode::Parallel),
            &[ThreadAxis::InterOp, ThreadAxis::IntraOp]
        );
    }
}
