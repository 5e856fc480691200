use crate::searcher::{SearchView, Searcher};
use crate::state::StateId;
use log::trace;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct Batch {
    state: StateId,
    instructions_at_start: u64,
    started: Instant,
}

/// Keep running the state the base searcher picked until it has used up an
/// instruction budget or a time budget, whichever comes first, so expensive
/// selection heuristics run less often.
pub struct BatchingSearcher {
    base: Box<dyn Searcher>,
    instructions: Option<u64>,
    time: Option<Duration>,
    batch: Option<Batch>,
}

impl BatchingSearcher {
    pub fn new(
        base: Box<dyn Searcher>,
        instructions: Option<u64>,
        time: Option<Duration>,
    ) -> BatchingSearcher {
        BatchingSearcher {
            base,
            instructions,
            time,
            batch: None,
        }
    }

    fn batch_is_live(&self, view: &SearchView) -> bool {
        let batch = match self.batch {
            Some(batch) => batch,
            None => return false,
        };
        let state = match view.state(batch.state) {
            Some(state) => state,
            None => return false,
        };
        let within_instructions = self
            .instructions
            .map(|budget| state.instructions().saturating_sub(batch.instructions_at_start) < budget)
            .unwrap_or(true);
        let within_time = self
            .time
            .map(|budget| batch.started.elapsed() < budget)
            .unwrap_or(true);
        within_instructions && within_time
    }
}

impl Searcher for BatchingSearcher {
    fn select_state(&mut self, view: &SearchView) -> Option<StateId> {
        if self.batch_is_live(view) {
            return self.batch.map(|batch| batch.state);
        }
        let state = self.base.select_state(view)?;
        trace!("new batch for state {}", state);
        self.batch = Some(Batch {
            state,
            instructions_at_start: view.state(state).map(|s| s.instructions()).unwrap_or(0),
            started: Instant::now(),
        });
        Some(state)
    }

    fn update(
        &mut self,
        view: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        if let Some(batch) = self.batch {
            if removed.contains(&batch.state) {
                self.batch = None;
            }
        }
        self.base.update(view, current, added, removed);
    }

    fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    fn name(&self) -> String {
        format!("batching({})", self.base.name())
    }
}
