//! Run configuration.
//!
//! A `Config` is plain data, usually read from JSON. Unknown options are
//! rejected while parsing, and options which conflict with each other are
//! rejected by `Config::validate`, which every constructor here calls.

use crate::memory::{Endian, LayoutPolicy};
use crate::searcher::WeightType;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which core decision procedure answers queries.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBackendKind {
    /// The in-process bit-blaster and SAT solver.
    Bitblast,
    /// An external solver process speaking SMT-LIB2.
    Smtlib2,
}

/// What to do when something goes wrong which need not end the run.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Stop,
    Continue,
}

/// How states are scheduled.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Dfs,
    Bfs,
    RandomState,
    WeightedRandom(WeightType),
    /// Take turns between several strategies.
    Interleaved(Vec<SearchStrategy>),
    /// Pick a strategy at random for every selection, with the given
    /// relative probabilities.
    Mixed(Vec<(SearchStrategy, f64)>),
    /// Run a strategy with a per-state instruction limit which doubles every
    /// time the strategy runs out of states.
    IterativeDeepening(Box<SearchStrategy>),
}

impl SearchStrategy {
    fn validate(&self) -> Result<(), Error> {
        match *self {
            SearchStrategy::Interleaved(ref strategies) => {
                if strategies.is_empty() {
                    return Err(Error::Config("interleaved search needs a strategy".to_string()));
                }
                strategies.iter().try_for_each(|strategy| strategy.validate())
            }
            SearchStrategy::Mixed(ref strategies) => {
                if strategies.is_empty() {
                    return Err(Error::Config("mixed search needs a strategy".to_string()));
                }
                let mut total = 0.0;
                for (strategy, probability) in strategies {
                    if !probability.is_finite() || *probability < 0.0 {
                        return Err(Error::Config(format!(
                            "mixed search probability {} is not a non-negative number",
                            probability
                        )));
                    }
                    total += probability;
                    strategy.validate()?;
                }
                if total <= 0.0 {
                    return Err(Error::Config(
                        "mixed search probabilities sum to zero".to_string(),
                    ));
                }
                Ok(())
            }
            SearchStrategy::IterativeDeepening(ref strategy) => strategy.validate(),
            _ => Ok(()),
        }
    }
}

/// Keep running the selected state until one of these budgets is spent.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Batching {
    #[serde(default)]
    pub instructions: Option<u64>,
    #[serde(default)]
    pub time_ms: Option<u64>,
}

/// Options for a run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub search_strategy: SearchStrategy,
    pub batching: Option<Batching>,
    pub seed: u64,

    pub solver_backend: SolverBackendKind,
    /// Run every query on this backend as well, and stop on disagreement.
    pub crosscheck_backend: Option<SolverBackendKind>,
    /// The command line of the SMT-LIB2 solver process.
    pub smtlib2_command: String,
    pub solver_timeout_ms: Option<u64>,
    pub use_validity_cache: bool,
    pub use_cex_cache: bool,
    pub use_independence: bool,
    /// Raise `SolverFault::RepeatedTimeout` after this many unknown verdicts
    /// in a row. Zero never does.
    pub max_consecutive_timeouts: u32,
    pub solver_fault_policy: Policy,

    pub max_states: Option<usize>,
    pub use_copy_on_write: bool,
    pub merge_enabled: bool,

    pub max_instructions: Option<u64>,
    pub max_instructions_per_state: Option<u64>,
    pub max_time_ms: Option<u64>,
    pub max_memory_bytes: Option<u64>,
    /// Scheduling steps between memory measurements.
    pub memory_check_interval: u64,
    pub exhaustion_policy: Policy,
    /// Emit live states as partial test cases when the run halts early.
    pub dump_states_on_halt: bool,

    pub emit_test_cases: bool,
    pub emit_on_error_only: bool,

    pub layout: LayoutPolicy,
    pub alignment: u64,
    /// Objects a symbolic pointer may resolve to before resolution gives up.
    pub max_resolutions: usize,
    pub endian: Endian,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            search_strategy: SearchStrategy::Interleaved(vec![
                SearchStrategy::WeightedRandom(WeightType::Depth),
                SearchStrategy::WeightedRandom(WeightType::CoveringNew),
            ]),
            batching: None,
            seed: 0,
            solver_backend: SolverBackendKind::Bitblast,
            crosscheck_backend: None,
            smtlib2_command: "z3 -in".to_string(),
            solver_timeout_ms: None,
            use_validity_cache: true,
            use_cex_cache: true,
            use_independence: true,
            max_consecutive_timeouts: 0,
            solver_fault_policy: Policy::Stop,
            max_states: None,
            use_copy_on_write: true,
            merge_enabled: false,
            max_instructions: None,
            max_instructions_per_state: None,
            max_time_ms: None,
            max_memory_bytes: None,
            memory_check_interval: 64,
            exhaustion_policy: Policy::Stop,
            dump_states_on_halt: true,
            emit_test_cases: true,
            emit_on_error_only: false,
            layout: LayoutPolicy::Deterministic,
            alignment: 16,
            max_resolutions: 64,
            endian: Endian::Little,
        }
    }
}

impl Config {
    /// Parse and validate a JSON configuration. Options left out take their
    /// default values.
    pub fn from_json_str(json: &str) -> Result<Config, Error> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::from(e).chain(format!("reading {}", path.as_ref().display()).into()))?;
        Config::from_json_str(&json)
    }

    /// The per-query solver timeout.
    pub fn solver_timeout(&self) -> Option<Duration> {
        self.solver_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_time(&self) -> Option<Duration> {
        self.max_time_ms.map(Duration::from_millis)
    }

    /// Reject values which are out of range, and combinations of options
    /// which cannot both be honoured.
    pub fn validate(&self) -> Result<(), Error> {
        self.search_strategy.validate()?;

        if let Some(batching) = self.batching {
            if batching.instructions.is_none() && batching.time_ms.is_none() {
                return Err(Error::Config(
                    "batching needs an instruction or time budget".to_string(),
                ));
            }
            if batching.instructions == Some(0) || batching.time_ms == Some(0) {
                return Err(Error::Config("batching budgets must be positive".to_string()));
            }
        }
        if self.solver_timeout_ms == Some(0) {
            return Err(Error::Config("solver_timeout_ms must be positive".to_string()));
        }
        if self.max_states == Some(0) {
            return Err(Error::Config("max_states must be positive".to_string()));
        }
        if self.max_resolutions == 0 {
            return Err(Error::Config("max_resolutions must be positive".to_string()));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        if self.max_memory_bytes.is_some() && self.memory_check_interval == 0 {
            return Err(Error::Config(
                "max_memory_bytes needs a positive memory_check_interval".to_string(),
            ));
        }

        let uses_smtlib2 = self.solver_backend == SolverBackendKind::Smtlib2
            || self.crosscheck_backend == Some(SolverBackendKind::Smtlib2);
        if uses_smtlib2 && self.smtlib2_command.split_whitespace().next().is_none() {
            return Err(Error::Config(
                "the smtlib2 backend needs a smtlib2_command".to_string(),
            ));
        }

        if self.emit_on_error_only && !self.emit_test_cases {
            return Err(Error::Config(
                "emit_on_error_only conflicts with emit_test_cases = false".to_string(),
            ));
        }
        if self.dump_states_on_halt && !self.emit_test_cases {
            return Err(Error::Config(
                "dump_states_on_halt conflicts with emit_test_cases = false".to_string(),
            ));
        }
        if self.max_instructions_per_state.is_some() && self.has_iterative_deepening() {
            return Err(Error::Config(
                "max_instructions_per_state conflicts with iterative deepening, which sets its own per-state limit"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn has_iterative_deepening(&self) -> bool {
        fn walk(strategy: &SearchStrategy) -> bool {
            match *strategy {
                SearchStrategy::IterativeDeepening(_) => true,
                SearchStrategy::Interleaved(ref strategies) => strategies.iter().any(walk),
                SearchStrategy::Mixed(ref strategies) => {
                    strategies.iter().any(|(strategy, _)| walk(strategy))
                }
                _ => false,
            }
        }
        walk(&self.search_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(Config::from_json_str("{}").unwrap(), config);
    }

    #[test]
    fn parse_options() {
        let config = Config::from_json_str(
            r#"{
                "search_strategy": {"mixed": [["dfs", 1.0], [{"weighted_random": "query_cost"}, 3.0]]},
                "solver_timeout_ms": 250,
                "max_states": 100,
                "merge_enabled": true,
                "crosscheck_backend": "bitblast",
                "batching": {"instructions": 1000},
                "layout": "randomized",
                "endian": "big"
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.search_strategy,
            SearchStrategy::Mixed(vec![
                (SearchStrategy::Dfs, 1.0),
                (SearchStrategy::WeightedRandom(WeightType::QueryCost), 3.0),
            ])
        );
        assert_eq!(config.solver_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_states, Some(100));
        assert!(config.merge_enabled);
        assert_eq!(config.crosscheck_backend, Some(SolverBackendKind::Bitblast));
        assert_eq!(config.batching.unwrap().instructions, Some(1000));
        assert_eq!(config.layout, LayoutPolicy::Randomized);
        assert_eq!(config.endian, Endian::Big);
        assert!(config.use_copy_on_write);
    }

    #[test]
    fn unknown_options_are_rejected() {
        assert!(matches!(
            Config::from_json_str(r#"{"max_state": 10}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{"batching": {"instructions": 5, "states": 2}}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn conflicts_are_rejected() {
        let conflicting = [
            r#"{"emit_test_cases": false}"#,
            r#"{"emit_test_cases": false, "dump_states_on_halt": false, "emit_on_error_only": true}"#,
            r#"{"max_states": 0}"#,
            r#"{"solver_timeout_ms": 0}"#,
            r#"{"alignment": 12}"#,
            r#"{"batching": {}}"#,
            r#"{"search_strategy": {"interleaved": []}}"#,
            r#"{"search_strategy": {"mixed": [["bfs", 0.0]]}}"#,
            r#"{"solver_backend": "smtlib2", "smtlib2_command": " "}"#,
            r#"{"search_strategy": {"iterative_deepening": "dfs"}, "max_instructions_per_state": 10}"#,
        ];
        for json in conflicting.iter() {
            match Config::from_json_str(json) {
                Err(Error::Config(_)) => {}
                other => panic!("{} should be rejected, got {:?}", json, other),
            }
        }
    }
}
