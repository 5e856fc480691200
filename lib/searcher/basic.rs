use crate::searcher::{SearchView, Searcher};
use crate::state::StateId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Depth-first: always the newest state.
#[derive(Clone, Debug, Default)]
pub struct DfsSearcher {
    states: Vec<StateId>,
}

impl DfsSearcher {
    pub fn new() -> DfsSearcher {
        DfsSearcher::default()
    }
}

impl Searcher for DfsSearcher {
    fn select_state(&mut self, _: &SearchView) -> Option<StateId> {
        self.states.last().copied()
    }

    fn update(&mut self, _: &SearchView, _: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        self.states.extend_from_slice(added);
        for id in removed {
            // Usually the state on top.
            if let Some(position) = self.states.iter().rposition(|state| state == id) {
                self.states.remove(position);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn name(&self) -> String {
        "dfs".to_string()
    }
}

/// Breadth-first: the oldest state. A state which forks goes to the back of
/// the queue, behind its children.
#[derive(Clone, Debug, Default)]
pub struct BfsSearcher {
    states: VecDeque<StateId>,
}

impl BfsSearcher {
    pub fn new() -> BfsSearcher {
        BfsSearcher::default()
    }
}

impl Searcher for BfsSearcher {
    fn select_state(&mut self, _: &SearchView) -> Option<StateId> {
        self.states.front().copied()
    }

    fn update(
        &mut self,
        _: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        if let Some(current) = current {
            if !added.is_empty() && !removed.contains(&current) {
                if let Some(position) = self.states.iter().position(|id| *id == current) {
                    self.states.remove(position);
                    self.states.push_back(current);
                }
            }
        }
        self.states.extend(added.iter().copied());
        for id in removed {
            if let Some(position) = self.states.iter().position(|state| state == id) {
                self.states.remove(position);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn name(&self) -> String {
        "bfs".to_string()
    }
}

/// Uniformly random.
#[derive(Clone, Debug)]
pub struct RandomStateSearcher {
    states: Vec<StateId>,
    positions: FxHashMap<StateId, usize>,
    rng: ChaCha8Rng,
}

impl RandomStateSearcher {
    pub fn new(seed: u64) -> RandomStateSearcher {
        RandomStateSearcher {
            states: Vec::new(),
            positions: FxHashMap::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Searcher for RandomStateSearcher {
    fn select_state(&mut self, _: &SearchView) -> Option<StateId> {
        if self.states.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.states.len());
        Some(self.states[index])
    }

    fn update(&mut self, _: &SearchView, _: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        for id in added {
            if !self.positions.contains_key(id) {
                self.positions.insert(*id, self.states.len());
                self.states.push(*id);
            }
        }
        for id in removed {
            if let Some(position) = self.positions.remove(id) {
                self.states.swap_remove(position);
                if let Some(moved) = self.states.get(position) {
                    self.positions.insert(*moved, position);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn name(&self) -> String {
        "random-state".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::searcher_tests::World;

    #[test]
    fn dfs_takes_the_newest() {
        let mut world = World::new();
        let mut dfs = DfsSearcher::new();
        world.add(&mut dfs, None, &[1]);
        assert_eq!(dfs.select_state(&world.view()), Some(1));
        world.add(&mut dfs, Some(1), &[2, 3]);
        assert_eq!(dfs.select_state(&world.view()), Some(3));
        world.remove(&mut dfs, &[3]);
        assert_eq!(dfs.select_state(&world.view()), Some(2));
        world.remove(&mut dfs, &[1, 2]);
        assert!(dfs.is_empty());
    }

    #[test]
    fn bfs_moves_forking_states_back() {
        let mut world = World::new();
        let mut bfs = BfsSearcher::new();
        world.add(&mut bfs, None, &[1, 2]);
        assert_eq!(bfs.select_state(&world.view()), Some(1));

        // 1 forks into 3, queue is now 2, 1, 3
        world.add(&mut bfs, Some(1), &[3]);
        assert_eq!(bfs.select_state(&world.view()), Some(2));
        world.remove(&mut bfs, &[2]);
        assert_eq!(bfs.select_state(&world.view()), Some(1));
        world.remove(&mut bfs, &[1]);
        assert_eq!(bfs.select_state(&world.view()), Some(3));
    }

    #[test]
    fn random_state_covers_every_state() {
        let mut world = World::new();
        let mut searcher = RandomStateSearcher::new(11);
        world.add(&mut searcher, None, &[1, 2, 3, 4]);
        world.remove(&mut searcher, &[2]);

        let mut seen = [false; 5];
        for _ in 0..200 {
            let id = searcher.select_state(&world.view()).unwrap();
            assert_ne!(id, 2);
            seen[id as usize] = true;
        }
        assert!(seen[1] && seen[3] && seen[4]);
        world.remove(&mut searcher, &[1, 3, 4]);
        assert_eq!(searcher.select_state(&world.view()), None);
    }
}
