//! Parameter-space enumeration.
//!
//! The space is the Cartesian product of the OpenMP knobs, providers,
//! execution modes and graph optimization levels, in that order. When the
//! runtime does not thread through OpenMP and OpenMP tuning is off, the three
//! OpenMP axes collapse to one unset placeholder.

use crate::config::{AxisStrategy, TuningConfiguration};
use serde::{Deserialize, Serialize};
use std::fmt;
use threadtune_runtime::{ExecutionMode, ExecutionProvider, GraphOptimizationLevel};

/// One point of the non-thread axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TuningCombo {
    pub omp_wait_policy: Option<String>,
    pub kmp_affinity: Option<String>,
    pub omp_max_active_levels: Option<String>,
    pub provider: ExecutionProvider,
    pub execution_mode: ExecutionMode,
    pub opt_level: GraphOptimizationLevel,
}

impl fmt::Display for TuningCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "unset".into());
        write!(
            f,
            "({}, {}, {}, {}, {}, {})",
            show(&self.omp_wait_policy),
            show(&self.kmp_affinity),
            show(&self.omp_max_active_levels),
            self.provider,
            self.execution_mode,
            self.opt_level
        )
    }
}

/// Lazily enumerable tuning space borrowed from a configuration.
#[derive(Debug, Clone)]
pub struct ParameterSpace<'a> {
    wait_policies: Vec<Option<&'a str>>,
    affinities: Vec<Option<&'a str>>,
    max_levels: Vec<Option<&'a str>>,
    providers: &'a [ExecutionProvider],
    modes: &'a [ExecutionMode],
    opt_levels: &'a [GraphOptimizationLevel],
}

fn axis(values: &[String], strategy: AxisStrategy) -> Vec<Option<&str>> {
    match strategy {
        AxisStrategy::CollapseOpenMp => vec![None],
        AxisStrategy::Full if values.is_empty() => vec![None],
        AxisStrategy::Full => values.iter().map(|v| Some(v.as_str())).collect(),
    }
}

impl<'a> ParameterSpace<'a> {
    pub fn new(config: &'a TuningConfiguration) -> Self {
        Self::with_strategy(config, config.axis_strategy())
    }

    pub fn with_strategy(config: &'a TuningConfiguration, strategy: AxisStrategy) -> Self {
        Self {
            wait_policies: axis(&config.omp_wait_policies, strategy),
            affinities: axis(&config.kmp_affinities, strategy),
            max_levels: axis(&config.omp_max_active_levels, strategy),
            providers: &config.providers,
            modes: &config.execution_modes,
            opt_levels: &config.opt_levels,
        }
    }

    /// Number of combinations, without enumerating them.
    pub fn len(&self) -> usize {
        self.wait_policies.len()
            * self.affinities.len()
            * self.max_levels.len()
            * self.providers.len()
            * self.modes.len()
            * self.opt_levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate combinations; may be called any number of times.
    pub fn iter(&self) -> impl Iterator<Item = TuningCombo> + '_ {
        self.wait_policies.iter().flat_map(move |&wait| {
            self.affinities.iter().flat_map(move |&affinity| {
                self.max_levels.iter().flat_map(move |&levels| {
                    self.providers.iter().flat_map(move |&provider| {
                        self.modes.iter().flat_map(move |&mode| {
                            self.opt_levels.iter().map(move |&opt_level| TuningCombo {
                                omp_wait_policy: wait.map(str::to_owned),
                                kmp_affinity: affinity.map(str::to_owned),
                                omp_max_active_levels: levels.map(str::to_owned),
                                provider,
                                execution_mode: mode,
                                opt_level,
                            })
                        })
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TuningConfiguration {
        let mut config = TuningConfiguration::for_model("m.json");
        config.omp_wait_policies = vec!["ACTIVE".into(), "PASSIVE".into()];
        config.kmp_affinities = vec![
            "granularity=fine,compact,1,0".into(),
            "granularity=fine,scatter".into(),
            "disabled".into(),
        ];
        config.omp_max_active_levels = vec!["1".into(), "2".into()];
        config.providers = vec![ExecutionProvider::Cpu, ExecutionProvider::Dnnl];
        config.execution_modes = vec![ExecutionMode::Sequential, ExecutionMode::Parallel];
        config.opt_levels = vec![GraphOptimizationLevel::Basic, GraphOptimizationLevel::All];
        config
    }

    #[test]
    fn test_full_product_count() {
        let mut config = config();
        config.openmp_enabled = true;
        let space = ParameterSpace::new(&config);
        assert_eq!(space.len(), 2 * 3 * 2 * 2 * 2 * 2);
        assert_eq!(space.iter().count(), space.len());
        assert!(space.iter().all(|c| c.omp_wait_policy.is_some()));
    }

    #[test]
    fn test_collapsed_product_count() {
        let config = config();
        let space = ParameterSpace::new(&config);
        assert_eq!(space.len(), 2 * 2 * 2);
        let combos: Vec<_> = space.iter().collect();
        assert_eq!(combos.len(), 8);
        assert!(combos.iter().all(|c| c.omp_wait_policy.is_none()
            && c.kmp_affinity.is_none()
            && c.omp_max_active_levels.is_none()));
    }

    #[test]
    fn test_product_order_and_restart() {
        let mut config = config();
        config.openmp_enabled = true;
        let space = ParameterSpace::new(&config);
        let first = space.iter().next().unwrap();
        assert_eq!(first.omp_wait_policy.as_deref(), Some("ACTIVE"));
        assert_eq!(first.provider, ExecutionProvider::Cpu);
        assert_eq!(first.opt_level, GraphOptimizationLevel::Basic);
        let second = space.iter().nth(1).unwrap();
        assert_eq!(second.opt_level, GraphOptimizationLevel::All);
        assert_eq!(space.iter().next().unwrap(), first);
    }

    #[test]
    fn test_empty_openmp_lists_count_once() {
        let mut config = TuningConfiguration::for_model("m.json");
        config.openmp_enabled = true;
        let space = ParameterSpace::new(&config);
        assert_eq!(space.len(), 1);
        assert_eq!(space.iter().count(), 1);
    }
}
