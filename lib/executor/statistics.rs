use crate::solver::SolverStatistics;
use crate::state::TerminationReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide counters.
///
/// Counters are atomics so a handle can be read from another thread while
/// the executor runs.
#[derive(Debug, Default)]
pub struct Statistics {
    states_live: AtomicU64,
    forks: AtomicU64,
    suppressed_forks: AtomicU64,
    instructions: AtomicU64,
    paths_completed: AtomicU64,
    path_errors: AtomicU64,
    states_pruned: AtomicU64,
    merges: AtomicU64,
    malformed_merges: AtomicU64,
    test_cases: AtomicU64,
    queries: AtomicU64,
    query_time_us: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    unknowns: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Statistics {
    pub fn new() -> Statistics {
        Statistics::default()
    }

    /// Instructions executed so far, across every state.
    pub fn instructions(&self) -> u64 {
        load(&self.instructions)
    }

    pub(crate) fn record_instruction(&self) {
        bump(&self.instructions);
    }

    pub(crate) fn record_fork(&self) {
        bump(&self.forks);
    }

    pub(crate) fn record_suppressed_fork(&self) {
        bump(&self.suppressed_forks);
    }

    pub(crate) fn record_termination(&self, reason: &TerminationReason) {
        bump(&self.paths_completed);
        match *reason {
            TerminationReason::Error(_) => bump(&self.path_errors),
            TerminationReason::Pruned(_) => bump(&self.states_pruned),
            TerminationReason::Exit | TerminationReason::Early(_) => {}
        }
    }

    pub(crate) fn record_merges(&self, merges: u64) {
        self.merges.fetch_add(merges, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_merge(&self) {
        bump(&self.malformed_merges);
    }

    pub(crate) fn record_test_case(&self) {
        bump(&self.test_cases);
    }

    pub(crate) fn set_states_live(&self, states: usize) {
        self.states_live.store(states as u64, Ordering::Relaxed);
    }

    /// Copy in the counters of the solver stack.
    pub(crate) fn record_solver(&self, solver: &SolverStatistics) {
        self.queries.store(solver.queries, Ordering::Relaxed);
        self.query_time_us
            .store(solver.query_time_us, Ordering::Relaxed);
        self.cache_hits.store(
            solver.validity_cache_hits + solver.cex_cache_hits,
            Ordering::Relaxed,
        );
        self.cache_misses.store(
            solver.validity_cache_misses + solver.cex_cache_misses,
            Ordering::Relaxed,
        );
        self.unknowns.store(solver.unknowns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let cache_hits = load(&self.cache_hits);
        let cache_misses = load(&self.cache_misses);
        let cache_hit_rate = if cache_hits + cache_misses == 0 {
            0.0
        } else {
            cache_hits as f64 / (cache_hits + cache_misses) as f64
        };
        StatisticsSnapshot {
            states_live: load(&self.states_live),
            forks: load(&self.forks),
            suppressed_forks: load(&self.suppressed_forks),
            instructions: load(&self.instructions),
            queries: load(&self.queries),
            query_time_us: load(&self.query_time_us),
            cache_hits,
            cache_misses,
            cache_hit_rate,
            unknowns: load(&self.unknowns),
            paths_completed: load(&self.paths_completed),
            path_errors: load(&self.path_errors),
            states_pruned: load(&self.states_pruned),
            merges: load(&self.merges),
            malformed_merges: load(&self.malformed_merges),
            test_cases: load(&self.test_cases),
        }
    }
}

/// The counters of a run at one point in time.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub states_live: u64,
    pub forks: u64,
    /// Forks not taken because `max_states` states were live.
    pub suppressed_forks: u64,
    pub instructions: u64,
    pub queries: u64,
    pub query_time_us: u64,
    /// Validity and counterexample cache hits.
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    /// Queries the solver could not decide.
    pub unknowns: u64,
    /// Terminated paths, for any reason.
    pub paths_completed: u64,
    pub path_errors: u64,
    pub states_pruned: u64,
    /// States absorbed into another state at the close of a merge region.
    pub merges: u64,
    pub malformed_merges: u64,
    pub test_cases: u64,
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "instructions: {}, live states: {}, forks: {} ({} suppressed), \
             paths: {} ({} errors, {} pruned), queries: {} ({} unknown, {:.1}% cache hits), \
             merges: {}",
            self.instructions,
            self.states_live,
            self.forks,
            self.suppressed_forks,
            self.paths_completed,
            self.path_errors,
            self.states_pruned,
            self.queries,
            self.unknowns,
            self.cache_hit_rate * 100.0,
            self.merges
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Budget, PathError};

    #[test]
    fn snapshot() {
        let statistics = Statistics::new();
        statistics.record_instruction();
        statistics.record_instruction();
        statistics.record_fork();
        statistics.record_termination(&TerminationReason::Exit);
        statistics.record_termination(&TerminationReason::Error(PathError::DoubleFree));
        statistics.record_termination(&TerminationReason::Pruned(Budget::Memory));
        statistics.record_solver(&SolverStatistics {
            queries: 10,
            validity_cache_hits: 2,
            validity_cache_misses: 4,
            cex_cache_hits: 1,
            cex_cache_misses: 1,
            ..SolverStatistics::default()
        });

        let snapshot = statistics.snapshot();
        assert_eq!(snapshot.instructions, 2);
        assert_eq!(snapshot.forks, 1);
        assert_eq!(snapshot.paths_completed, 3);
        assert_eq!(snapshot.path_errors, 1);
        assert_eq!(snapshot.states_pruned, 1);
        assert_eq!(snapshot.queries, 10);
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 5);
        assert!((snapshot.cache_hit_rate - 0.375).abs() < 1e-9);
    }
}
