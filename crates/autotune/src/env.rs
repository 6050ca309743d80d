//! Threading knobs expressed through process environment variables.
//!
//! Runtimes read OpenMP and provider flags from the environment when a
//! session is built. [`ThreadingEnv`] is the explicit value computed for a
//! candidate; [`EnvScope`] applies it for the lifetime of one measurement and
//! puts the previous environment back on drop. Scopes serialize on a
//! process-wide lock, so two candidates never observe each other's knobs.

use crate::candidate::CandidatePoint;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::{Mutex, MutexGuard};
use threadtune_runtime::ExecutionProvider;

pub const OMP_WAIT_POLICY: &str = "OMP_WAIT_POLICY";
pub const KMP_AFFINITY: &str = "KMP_AFFINITY";
pub const OMP_MAX_ACTIVE_LEVELS: &str = "OMP_MAX_ACTIVE_LEVELS";
pub const OMP_NUM_THREADS: &str = "OMP_NUM_THREADS";
pub const ORT_TENSORRT_FP16_ENABLE: &str = "ORT_TENSORRT_FP16_ENABLE";

/// Every variable a scope owns.
pub const MANAGED_VARS: [&str; 5] = [
    OMP_WAIT_POLICY,
    KMP_AFFINITY,
    OMP_MAX_ACTIVE_LEVELS,
    OMP_NUM_THREADS,
    ORT_TENSORRT_FP16_ENABLE,
];

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Environment snapshot recorded with every result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingEnv {
    #[serde(rename = "OMP_WAIT_POLICY")]
    pub omp_wait_policy: Option<String>,
    #[serde(rename = "KMP_AFFINITY")]
    pub kmp_affinity: Option<String>,
    #[serde(rename = "OMP_MAX_ACTIVE_LEVELS")]
    pub omp_max_active_levels: Option<String>,
    #[serde(rename = "OMP_NUM_THREADS")]
    pub omp_num_threads: Option<usize>,
    #[serde(rename = "ORT_TENSORRT_FP16_ENABLE")]
    pub tensorrt_fp16: bool,
}

impl ThreadingEnv {
    pub fn for_candidate(candidate: &CandidatePoint, trt_fp16_enabled: bool) -> Self {
        let combo = &candidate.combo;
        Self {
            omp_wait_policy: combo.omp_wait_policy.clone(),
            kmp_affinity: combo.kmp_affinity.clone(),
            omp_max_active_levels: combo.omp_max_active_levels.clone(),
            omp_num_threads: candidate.intra_op_threads,
            tensorrt_fp16: trt_fp16_enabled && combo.provider == ExecutionProvider::TensorRt,
        }
    }

    /// Value each managed variable takes; `None` means unset.
    pub fn vars(&self) -> [(&'static str, Option<String>); 5] {
        [
            (OMP_WAIT_POLICY, self.omp_wait_policy.clone()),
            (KMP_AFFINITY, self.kmp_affinity.clone()),
            (OMP_MAX_ACTIVE_LEVELS, self.omp_max_active_levels.clone()),
            (OMP_NUM_THREADS, self.omp_num_threads.map(|n| n.to_string())),
            (
                ORT_TENSORRT_FP16_ENABLE,
                Some(if self.tensorrt_fp16 { "1" } else { "0" }.to_string()),
            ),
        ]
    }
}

/// Applied environment; restores what it replaced when dropped.
pub struct EnvScope {
    previous: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvScope {
    /// Overwrite every managed variable with `env`. Variables `env` leaves
    /// unset are removed, never inherited from an earlier candidate.
    pub fn apply(env: &ThreadingEnv) -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = MANAGED_VARS
            .iter()
            .map(|&name| (name, env::var(name).ok()))
            .collect();
        for (name, value) in env.vars() {
            set_or_remove(name, value.as_deref());
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        for (name, value) in &self.previous {
            set_or_remove(name, value.as_deref());
        }
    }
}

fn set_or_remove(name: &str, value: Option<&str>) {
    match value {
        Some(value) => env::set_var(name, value),
        None => env::remove_var(name),
    }
}
