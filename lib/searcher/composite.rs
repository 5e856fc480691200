//! Searchers built from other searchers. Every sub-searcher sees every
//! update, so they all hold the same states.

use crate::searcher::{SearchView, Searcher};
use crate::state::StateId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Round-robin over sub-searchers, one selection each.
pub struct InterleavedSearcher {
    searchers: Vec<Box<dyn Searcher>>,
    next: usize,
}

impl InterleavedSearcher {
    pub fn new(searchers: Vec<Box<dyn Searcher>>) -> InterleavedSearcher {
        InterleavedSearcher { searchers, next: 0 }
    }
}

impl Searcher for InterleavedSearcher {
    fn select_state(&mut self, view: &SearchView) -> Option<StateId> {
        for _ in 0..self.searchers.len() {
            let index = self.next;
            self.next = (self.next + 1) % self.searchers.len();
            if let Some(state) = self.searchers[index].select_state(view) {
                return Some(state);
            }
        }
        None
    }

    fn update(
        &mut self,
        view: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        for searcher in self.searchers.iter_mut() {
            searcher.update(view, current, added, removed);
        }
    }

    fn is_empty(&self) -> bool {
        self.searchers.iter().all(|searcher| searcher.is_empty())
    }

    fn name(&self) -> String {
        let names: Vec<String> = self.searchers.iter().map(|searcher| searcher.name()).collect();
        format!("interleaved({})", names.join(", "))
    }
}

/// Picks a sub-searcher at random for each selection. Probabilities are
/// relative, and renormalized over the sub-searchers which hold states.
pub struct MixedSearcher {
    searchers: Vec<(Box<dyn Searcher>, f64)>,
    rng: ChaCha8Rng,
}

impl MixedSearcher {
    pub fn new(searchers: Vec<(Box<dyn Searcher>, f64)>, seed: u64) -> MixedSearcher {
        MixedSearcher {
            searchers,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Searcher for MixedSearcher {
    fn select_state(&mut self, view: &SearchView) -> Option<StateId> {
        let total: f64 = self
            .searchers
            .iter()
            .filter(|(searcher, _)| !searcher.is_empty())
            .map(|(_, probability)| *probability)
            .sum();
        if total <= 0.0 {
            return self
                .searchers
                .iter_mut()
                .find_map(|(searcher, _)| searcher.select_state(view));
        }

        let mut target = self.rng.gen::<f64>() * total;
        let mut chosen = None;
        for (index, (searcher, probability)) in self.searchers.iter().enumerate() {
            if searcher.is_empty() || *probability <= 0.0 {
                continue;
            }
            chosen = Some(index);
            if target < *probability {
                break;
            }
            target -= probability;
        }
        let index = chosen?;
        self.searchers[index].0.select_state(view)
    }

    fn update(
        &mut self,
        view: &SearchView,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        for (searcher, _) in self.searchers.iter_mut() {
            searcher.update(view, current, added, removed);
        }
    }

    fn is_empty(&self) -> bool {
        self.searchers.iter().all(|(searcher, _)| searcher.is_empty())
    }

    fn name(&self) -> String {
        let names: Vec<String> = self
            .searchers
            .iter()
            .map(|(searcher, probability)| format!("{}: {}", searcher.name(), probability))
            .collect();
        format!("mixed({})", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::searcher_tests::World;
    use crate::searcher::{BfsSearcher, DfsSearcher};

    #[test]
    fn interleaved_takes_turns() {
        let mut world = World::new();
        let searchers: Vec<Box<dyn Searcher>> =
            vec![Box::new(DfsSearcher::new()), Box::new(BfsSearcher::new())];
        let mut searcher = InterleavedSearcher::new(searchers);
        world.add(&mut searcher, None, &[1, 2, 3]);
        let picks: Vec<StateId> = (0..4)
            .map(|_| searcher.select_state(&world.view()).unwrap())
            .collect();
        assert_eq!(picks, vec![3, 1, 3, 1]);
        assert_eq!(searcher.name(), "interleaved(dfs, bfs)");
    }

    #[test]
    fn mixed_follows_probabilities() {
        let mut world = World::new();
        let mut searcher = MixedSearcher::new(
            vec![
                (Box::new(DfsSearcher::new()) as Box<dyn Searcher>, 3.0),
                (Box::new(BfsSearcher::new()) as Box<dyn Searcher>, 1.0),
                (Box::new(BfsSearcher::new()) as Box<dyn Searcher>, 0.0),
            ],
            9,
        );
        world.add(&mut searcher, None, &[1, 2]);
        let mut dfs = 0;
        for _ in 0..4000 {
            if searcher.select_state(&world.view()) == Some(2) {
                dfs += 1;
            }
        }
        assert!(dfs > 2700 && dfs < 3300, "dfs chosen {} times", dfs);

        world.remove(&mut searcher, &[1, 2]);
        assert!(searcher.is_empty());
        assert_eq!(searcher.select_state(&world.view()), None);
    }
}
