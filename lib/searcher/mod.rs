//! State scheduling.
//!
//! A `Searcher` decides which live state runs next. The executor tells every
//! searcher about the states it adds and removes after each step, and asks it
//! for a state before the next one. Searchers only hold state ids; the states
//! themselves are reached through a `SearchView`.

mod basic;
mod batching;
mod composite;
mod deepening;
mod weighted;
mod weighted_queue;

pub use self::basic::{BfsSearcher, DfsSearcher, RandomStateSearcher};
pub use self::batching::BatchingSearcher;
pub use self::composite::{InterleavedSearcher, MixedSearcher};
pub use self::deepening::IterativeDeepeningSearcher;
pub use self::weighted::{WeightType, WeightedRandomSearcher};
pub use self::weighted_queue::{WeightedQueue, MIN_WEIGHT};

use crate::config::{Config, SearchStrategy};
use crate::state::{ExecutionState, StateId};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::time::Duration;

/// What searchers may look at when choosing.
#[derive(Clone, Copy)]
pub struct SearchView<'v> {
    states: &'v BTreeMap<StateId, ExecutionState>,
    instruction_counts: &'v FxHashMap<u64, u64>,
}

impl<'v> SearchView<'v> {
    pub fn new(
        states: &'v BTreeMap<StateId, ExecutionState>,
        instruction_counts: &'v FxHashMap<u64, u64>,
    ) -> SearchView<'v> {
        SearchView {
            states,
            instruction_counts,
        }
    }

    pub fn state(&self, id: StateId) -> Option<&'v ExecutionState> {
        self.states.get(&id)
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// How many times any state has executed the instruction at `pc`.
    pub fn instruction_count(&self, pc: u64) -> u64 {
        self.instruction_counts.get(&pc).copied().unwrap_or(0)
    }
}

/// A scheduling policy over live states.
pub trait Searcher {
    /// The state to run next, or `None` if this searcher holds no states.
    fn select_state(&mut self, view: &SearchView) -> Option<StateId>;

    /// Record the outcome of a step. `current` is the state which ran,
    /// `added` are states created during the step, and `removed` are states
    /// which left the searcher, possibly including `current`. Removing a
    /// state the searcher does not hold is not an error.
    fn update(
        &mut self,
        view: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    );

    fn is_empty(&self) -> bool;

    fn name(&self) -> String;
}

/// Build the searcher a strategy describes. Random searchers draw from
/// generators seeded from `seed`, each with its own stream.
pub fn searcher_for_strategy(strategy: &SearchStrategy, seed: u64) -> Box<dyn Searcher> {
    let mut stream = seed;
    build(strategy, &mut stream)
}

fn build(strategy: &SearchStrategy, stream: &mut u64) -> Box<dyn Searcher> {
    let seed = *stream;
    *stream = stream.wrapping_add(1);
    match *strategy {
        SearchStrategy::Dfs => Box::new(DfsSearcher::new()),
        SearchStrategy::Bfs => Box::new(BfsSearcher::new()),
        SearchStrategy::RandomState => Box::new(RandomStateSearcher::new(seed)),
        SearchStrategy::WeightedRandom(weight_type) => {
            Box::new(WeightedRandomSearcher::new(weight_type, seed))
        }
        SearchStrategy::Interleaved(ref strategies) => Box::new(InterleavedSearcher::new(
            strategies
                .iter()
                .map(|strategy| build(strategy, stream))
                .collect(),
        )),
        SearchStrategy::Mixed(ref strategies) => Box::new(MixedSearcher::new(
            strategies
                .iter()
                .map(|(strategy, probability)| (build(strategy, stream), *probability))
                .collect(),
            seed,
        )),
        SearchStrategy::IterativeDeepening(ref strategy) => Box::new(
            IterativeDeepeningSearcher::new(build(strategy, stream)),
        ),
    }
}

/// The searcher a configuration asks for, batched if batching is configured.
pub fn searcher_for_config(config: &Config) -> Box<dyn Searcher> {
    let searcher = searcher_for_strategy(&config.search_strategy, config.seed);
    match config.batching {
        Some(batching) => Box::new(BatchingSearcher::new(
            searcher,
            batching.instructions,
            batching.time_ms.map(Duration::from_millis),
        )),
        None => searcher,
    }
}
