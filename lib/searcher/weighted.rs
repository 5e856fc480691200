use crate::searcher::{SearchView, Searcher, WeightedQueue};
use crate::state::{ExecutionState, StateId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the weight of a state is derived from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightType {
    /// Halved on every fork, which makes selection a random walk down the
    /// fork tree.
    Depth,
    /// Favor states at rarely executed instructions.
    InstCount,
    /// Favor states whose queries have been cheap.
    QueryCost,
    /// Favor states which covered new code recently.
    CoveringNew,
    Uniform,
}

impl fmt::Display for WeightType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            WeightType::Depth => write!(f, "depth"),
            WeightType::InstCount => write!(f, "inst-count"),
            WeightType::QueryCost => write!(f, "query-cost"),
            WeightType::CoveringNew => write!(f, "covering-new"),
            WeightType::Uniform => write!(f, "uniform"),
        }
    }
}

impl WeightType {
    /// The weight of `state`. Never negative. The queue raises zero weights
    /// to its minimum.
    pub fn weight(&self, state: &ExecutionState, view: &SearchView) -> f64 {
        match *self {
            WeightType::Depth => state.weight(),
            WeightType::InstCount => {
                let count = view.instruction_count(state.pc()).max(1) as f64;
                let inverse = 1.0 / count;
                inverse * inverse
            }
            WeightType::QueryCost => {
                let cost = state.query_cost().as_secs_f64();
                if cost < 0.1 {
                    1.0
                } else {
                    1.0 / cost
                }
            }
            WeightType::CoveringNew => {
                let since = state.instructions_since_covered_new();
                let inverse = if since > 0 {
                    1.0 / since.saturating_sub(1000).max(1) as f64
                } else {
                    0.0
                };
                let floor = 1.0 / 10000.0;
                inverse * inverse + floor * floor
            }
            WeightType::Uniform => 1.0,
        }
    }

    /// Weights which change as the state runs, and so are refreshed after
    /// every step.
    fn is_dynamic(&self) -> bool {
        !matches!(*self, WeightType::Uniform)
    }
}

/// Random choice weighted by a `WeightType`.
#[derive(Clone, Debug)]
pub struct WeightedRandomSearcher {
    weight_type: WeightType,
    queue: WeightedQueue<StateId>,
    rng: ChaCha8Rng,
}

impl WeightedRandomSearcher {
    pub fn new(weight_type: WeightType, seed: u64) -> WeightedRandomSearcher {
        WeightedRandomSearcher {
            weight_type,
            queue: WeightedQueue::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn weight(&self, id: StateId, view: &SearchView) -> f64 {
        view.state(id)
            .map(|state| self.weight_type.weight(state, view))
            .unwrap_or(0.0)
    }
}

impl Searcher for WeightedRandomSearcher {
    fn select_state(&mut self, _: &SearchView) -> Option<StateId> {
        let p = self.rng.gen::<f64>();
        self.queue.choose(p).copied()
    }

    fn update(
        &mut self,
        view: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        if let Some(current) = current {
            if self.weight_type.is_dynamic() && !removed.contains(&current) {
                let weight = self.weight(current, view);
                self.queue.update(&current, weight);
            }
        }
        for id in added {
            let weight = self.weight(*id, view);
            self.queue.insert(*id, weight);
        }
        for id in removed {
            self.queue.remove(id);
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn name(&self) -> String {
        format!("weighted-random({})", self.weight_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::searcher_tests::World;
    use std::time::Duration;

    #[test]
    fn weights() {
        let mut world = World::new();
        world.spawn(1);
        world.counts.insert(0, 4);
        {
            let state = world.state_mut(1);
            state.add_query_cost(Duration::from_millis(500));
            for _ in 0..1100 {
                state.record_instruction(false);
            }
        }
        let view = world.view();
        let state = view.state(1).unwrap();
        assert_eq!(WeightType::Depth.weight(state, &view), 1.0);
        assert_eq!(WeightType::InstCount.weight(state, &view), 1.0 / 16.0);
        assert!((WeightType::QueryCost.weight(state, &view) - 2.0).abs() < 1e-9);
        let expected = 0.01 * 0.01 + 0.0001 * 0.0001;
        assert!((WeightType::CoveringNew.weight(state, &view) - expected).abs() < 1e-12);
        assert_eq!(WeightType::Uniform.weight(state, &view), 1.0);
    }

    #[test]
    fn depth_prefers_shallow_states() {
        let mut world = World::new();
        let mut searcher = WeightedRandomSearcher::new(WeightType::Depth, 5);
        world.add(&mut searcher, None, &[1]);

        // 1 forks into 2, then 2 forks into 3: weights 1/2, 1/4, 1/4
        let sibling = world.state_mut(1).branch(2);
        world.states.insert(2, sibling);
        searcher.update(&world.view(), Some(1), &[2], &[]);
        let sibling = world.state_mut(2).branch(3);
        world.states.insert(3, sibling);
        searcher.update(&world.view(), Some(2), &[3], &[]);

        let mut counts = [0u32; 4];
        for _ in 0..4000 {
            counts[searcher.select_state(&world.view()).unwrap() as usize] += 1;
        }
        assert!(counts[1] > counts[2] && counts[1] > counts[3]);
        assert!(counts[2] > 0 && counts[3] > 0);
    }
}
