use crate::il::{Assignment, Expression};
use crate::solver::{Query, Satisfiability, SolverBackend, SolverFault, SolverResponse, SolverStatistics};
use crate::Error;
use log::trace;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Entries kept before the oldest are evicted.
const CAPACITY: usize = 4096;

/// A sorted set of expression hashes standing for a conjunction.
type Key = Vec<u64>;

fn expression_hash(expression: &Expression) -> u64 {
    let mut hasher = FxHasher::default();
    expression.hash(&mut hasher);
    hasher.finish()
}

fn key(query: &Query) -> Key {
    let mut key: Key = query
        .expressions()
        .filter(|expression| !expression.is_true())
        .map(expression_hash)
        .collect();
    key.sort_unstable();
    key.dedup();
    key
}

/// True if every element of `small` is in `large`. Both are sorted.
fn is_subset(small: &[u64], large: &[u64]) -> bool {
    let mut large = large.iter();
    small
        .iter()
        .all(|element| large.by_ref().any(|candidate| candidate == element))
}

#[derive(Default)]
struct Cache {
    answers: FxHashMap<Key, Option<Assignment>>,
    order: VecDeque<Key>,
}

impl Cache {
    fn insert(&mut self, key: Key, answer: Option<Assignment>) {
        if self.answers.insert(key.clone(), answer).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.answers.remove(&oldest);
            }
        }
    }
}

/// A counterexample cache.
///
/// Remembers, for sets of constraints, either a model or the fact that they
/// are unsatisfiable. A query is the set of its constraints plus its
/// expression, and is answered without the inner solver when:
///
/// * the same set was seen before;
/// * a superset has a model, which then satisfies this set too;
/// * a subset is unsatisfiable, so this set is as well;
/// * any cached model happens to satisfy this set.
pub struct CexCachingSolver {
    inner: Box<dyn SolverBackend>,
    cache: RwLock<Cache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CexCachingSolver {
    pub fn new(inner: Box<dyn SolverBackend>) -> CexCachingSolver {
        CexCachingSolver {
            inner,
            cache: RwLock::new(Cache::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lookup(&self, query: &Query, key: &Key) -> Result<Option<SolverResponse>, Error> {
        let cache = self
            .cache
            .read()
            .map_err(|_| SolverFault::Unavailable("counterexample cache poisoned".to_string()))?;

        if let Some(answer) = cache.answers.get(key) {
            return Ok(Some(match answer {
                Some(model) => SolverResponse::Sat(model.clone()),
                None => SolverResponse::Unsat,
            }));
        }

        for (cached, answer) in cache.answers.iter() {
            if let Some(model) = answer {
                if is_subset(key, cached) {
                    trace!("counterexample cache: superset model");
                    return Ok(Some(SolverResponse::Sat(model.clone())));
                }
            }
        }

        for (cached, answer) in cache.answers.iter() {
            if answer.is_none() && is_subset(cached, key) {
                trace!("counterexample cache: unsatisfiable subset");
                return Ok(Some(SolverResponse::Unsat));
            }
        }

        for answer in cache.answers.values() {
            if let Some(model) = answer {
                let satisfied = query.expressions().all(|expression| {
                    model
                        .evaluate_total(expression)
                        .map(|value| value.to_bool())
                        .unwrap_or(false)
                });
                if satisfied {
                    trace!("counterexample cache: model satisfies the query");
                    return Ok(Some(SolverResponse::Sat(model.clone())));
                }
            }
        }
        Ok(None)
    }

    fn solve(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        let key = key(query);
        if let Some(response) = self.lookup(query, &key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(response);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let response = self.inner.check(query, deadline)?;
        let answer = match response {
            SolverResponse::Sat(ref model) => Some(Some(model.clone())),
            SolverResponse::Unsat => Some(None),
            SolverResponse::Unknown => None,
        };
        if let Some(answer) = answer {
            self.cache
                .write()
                .map_err(|_| SolverFault::Unavailable("counterexample cache poisoned".to_string()))?
                .insert(key, answer);
        }
        Ok(response)
    }

    /// The number of cached answers.
    pub fn len(&self) -> usize {
        self.cache.read().map(|cache| cache.answers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SolverBackend for CexCachingSolver {
    fn name(&self) -> String {
        format!("cex({})", self.inner.name())
    }

    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        query.ensure_boolean()?;
        self.solve(query, deadline)
    }

    fn check_sat(&self, query: &Query, deadline: Option<Instant>) -> Result<Satisfiability, Error> {
        Ok(self.check(query, deadline)?.satisfiability())
    }

    fn statistics(&self) -> SolverStatistics {
        let mut statistics = self.inner.statistics();
        statistics.cex_cache_hits += self.hits.load(Ordering::Relaxed);
        statistics.cex_cache_misses += self.misses.load(Ordering::Relaxed);
        statistics
    }
}
