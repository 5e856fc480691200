use crate::searcher::{SearchView, Searcher};
use crate::state::StateId;
use log::debug;

/// The per-state instruction limit of the first iteration.
pub const INITIAL_INSTRUCTION_LIMIT: u64 = 1000;

/// Iterative deepening over instructions executed per state.
///
/// States which reach the limit are paused and withheld from the base
/// searcher. When the base searcher runs out of states the limit doubles and
/// every paused state is handed back.
pub struct IterativeDeepeningSearcher {
    base: Box<dyn Searcher>,
    limit: u64,
    paused: Vec<StateId>,
}

impl IterativeDeepeningSearcher {
    pub fn new(base: Box<dyn Searcher>) -> IterativeDeepeningSearcher {
        IterativeDeepeningSearcher::with_limit(base, INITIAL_INSTRUCTION_LIMIT)
    }

    pub fn with_limit(base: Box<dyn Searcher>, limit: u64) -> IterativeDeepeningSearcher {
        IterativeDeepeningSearcher {
            base,
            limit: limit.max(1),
            paused: Vec::new(),
        }
    }

    /// The current per-state instruction limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// States waiting for the next iteration.
    pub fn paused(&self) -> &[StateId] {
        &self.paused
    }
}

impl Searcher for IterativeDeepeningSearcher {
    fn select_state(&mut self, view: &SearchView) -> Option<StateId> {
        self.base.select_state(view)
    }

    fn update(
        &mut self,
        view: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        self.paused.retain(|id| !removed.contains(id));
        self.base.update(view, current, added, removed);

        if let Some(current) = current {
            let over = view
                .state(current)
                .map(|state| state.instructions() >= self.limit)
                .unwrap_or(false);
            if over && !removed.contains(&current) && !self.paused.contains(&current) {
                self.base.update(view, None, &[], &[current]);
                self.paused.push(current);
            }
        }

        if self.base.is_empty() && !self.paused.is_empty() {
            self.limit = self.limit.saturating_mul(2);
            debug!(
                "iterative deepening: limit now {} instructions, reviving {} states",
                self.limit,
                self.paused.len()
            );
            let paused = std::mem::take(&mut self.paused);
            self.base.update(view, None, &paused, &[]);
        }
    }

    fn is_empty(&self) -> bool {
        self.base.is_empty() && self.paused.is_empty()
    }

    fn name(&self) -> String {
        format!("iterative-deepening({})", self.base.name())
    }
}
