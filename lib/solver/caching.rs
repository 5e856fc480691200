use crate::il::Expression;
use crate::solver::{Query, Satisfiability, SolverBackend, SolverFault, SolverResponse, SolverStatistics};
use crate::Error;
use log::trace;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// A cache of satisfiability verdicts, keyed by the fingerprint of the
/// constraints and the query expression.
///
/// Only definite verdicts are cached. Queries which need a model go straight
/// through, but their verdicts are recorded on the way back.
pub struct CachingSolver {
    inner: Box<dyn SolverBackend>,
    cache: RwLock<FxHashMap<(u64, Expression), Satisfiability>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingSolver {
    pub fn new(inner: Box<dyn SolverBackend>) -> CachingSolver {
        CachingSolver {
            inner,
            cache: RwLock::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(query: &Query) -> (u64, Expression) {
        (query.constraints_fingerprint(), query.expression().clone())
    }

    fn lookup(&self, query: &Query) -> Result<Option<Satisfiability>, Error> {
        let cache = self
            .cache
            .read()
            .map_err(|_| SolverFault::Unavailable("validity cache poisoned".to_string()))?;
        Ok(cache.get(&Self::key(query)).copied())
    }

    fn record(&self, query: &Query, verdict: Satisfiability) -> Result<(), Error> {
        if verdict == Satisfiability::Unknown {
            return Ok(());
        }
        let mut cache = self
            .cache
            .write()
            .map_err(|_| SolverFault::Unavailable("validity cache poisoned".to_string()))?;
        cache.insert(Self::key(query), verdict);
        Ok(())
    }

    /// The number of cached verdicts.
    pub fn len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SolverBackend for CachingSolver {
    fn name(&self) -> String {
        format!("caching({})", self.inner.name())
    }

    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        if self.lookup(query)? == Some(Satisfiability::Unsat) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(SolverResponse::Unsat);
        }
        let response = self.inner.check(query, deadline)?;
        self.record(query, response.satisfiability())?;
        Ok(response)
    }

    fn check_sat(&self, query: &Query, deadline: Option<Instant>) -> Result<Satisfiability, Error> {
        if let Some(verdict) = self.lookup(query)? {
            trace!("validity cache hit: {}", verdict);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(verdict);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let verdict = self.inner.check_sat(query, deadline)?;
        self.record(query, verdict)?;
        Ok(verdict)
    }

    fn statistics(&self) -> SolverStatistics {
        let mut statistics = self.inner.statistics();
        statistics.validity_cache_hits += self.hits.load(Ordering::Relaxed);
        statistics.validity_cache_misses += self.misses.load(Ordering::Relaxed);
        statistics
    }
}

#[cfg(test)]
mod caching_tests {
    use crate::il::*;
    use crate::solver::*;

    #[test]
    fn repeated_queries_are_answered_from_the_cache() {
        let solver = CachingSolver::new(Box::new(BitblastSolver::new()));
        let c = Expression::cmpltu(expr_scalar("x", 32), expr_const(10, 32)).unwrap();
        let e = Expression::cmpeq(expr_scalar("x", 32), expr_const(3, 32)).unwrap();
        let query = Query::from_constraints(vec![&c], e);

        let first = solver.is_satisfiable(&query, None).unwrap();
        let second = solver.is_satisfiable(&query, None).unwrap();
        assert_eq!(first, Satisfiability::Sat);
        assert_eq!(first, second);

        let statistics = solver.statistics();
        assert_eq!(statistics.validity_cache_hits, 1);
        assert_eq!(statistics.validity_cache_misses, 1);
        assert_eq!(statistics.core_queries, 1);

        // must_be_true asks about the negation, a different key
        assert_eq!(solver.must_be_true(&query, None).unwrap(), Some(false));
        assert_eq!(solver.must_be_true(&query, None).unwrap(), Some(false));
        assert_eq!(solver.statistics().core_queries, 2);
        assert_eq!(solver.len(), 2);
    }
}
