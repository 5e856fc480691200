//! Satisfiability queries over path constraints.
//!
//! A [`Query`] pairs the constraints of a path with one more expression. Every
//! solver in this module implements [`SolverBackend`], which decides whether
//! the constraints and the expression can hold together. Backends are stacked:
//! the caches and independence slicing wrap a core backend, and each layer
//! only overrides what it changes.
//!
//! The executor talks to the stack through [`Solver`], which applies the
//! per-query timeout, turns unknown verdicts into the conservative answer for
//! each kind of question, and charges query time to the asking state.

mod bitblast;
mod caching;
mod cex_cache;
mod crosscheck;
mod independence;
mod sat;
mod smtlib2;

pub use self::bitblast::BitblastSolver;
pub use self::caching::CachingSolver;
pub use self::cex_cache::CexCachingSolver;
pub use self::crosscheck::CrossCheckSolver;
pub use self::independence::IndependentSolver;
pub use self::sat::{Lit, SatResult, SatSolver, Var};
pub use self::smtlib2::{expression_to_smtlib2, Smtlib2Solver};
pub use crate::error::SolverFault;

use crate::config::{Config, Policy, SolverBackendKind};
use crate::il::{self, Assignment, Constant, Expression, Symbol};
use crate::state::{chain_fingerprint, ConstraintSet, ExecutionState};
use crate::Error;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// A set of constraints and one expression.
///
/// Satisfiability queries ask whether the constraints and the expression,
/// which must then be 1-bit, can all be true at once. Value queries ask for a
/// value of the expression under the constraints.
#[derive(Clone, Debug)]
pub struct Query<'q> {
    constraints: Vec<&'q Expression>,
    fingerprint: u64,
    expression: Expression,
}

impl<'q> Query<'q> {
    /// A query over the whole constraint set of a path.
    pub fn new(constraints: &'q ConstraintSet, expression: Expression) -> Query<'q> {
        Query {
            constraints: constraints.to_vec(),
            fingerprint: constraints.fingerprint(),
            expression,
        }
    }

    /// A query over an explicit list of constraints, oldest first.
    pub fn from_constraints(constraints: Vec<&'q Expression>, expression: Expression) -> Query<'q> {
        let fingerprint = constraints
            .iter()
            .fold(0, |fingerprint, constraint| chain_fingerprint(fingerprint, constraint));
        Query {
            constraints,
            fingerprint,
            expression,
        }
    }

    pub fn constraints(&self) -> &[&'q Expression] {
        &self.constraints
    }

    /// A structural hash of the constraints of this query.
    pub fn constraints_fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// The same constraints with a different expression.
    pub fn with_expression(&self, expression: Expression) -> Query<'q> {
        Query {
            constraints: self.constraints.clone(),
            fingerprint: self.fingerprint,
            expression,
        }
    }

    /// The same constraints with the expression negated.
    pub fn negated(&self) -> Result<Query<'q>, Error> {
        Ok(self.with_expression(Expression::not(self.expression.clone())?))
    }

    /// Fail unless the expression of this query is 1-bit.
    pub fn ensure_boolean(&self) -> Result<(), Error> {
        if self.expression.bits() != 1 {
            return Err(Error::Sort);
        }
        Ok(())
    }

    /// The constraints followed by the expression.
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.constraints
            .iter()
            .map(|constraint| &**constraint)
            .chain(std::iter::once(&self.expression))
    }

    /// Every symbolic input mentioned by this query.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .expressions()
            .flat_map(|expression| expression.symbols())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

impl<'q> fmt::Display for Query<'q> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for constraint in &self.constraints {
            writeln!(f, "{}", constraint)?;
        }
        write!(f, "query: {}", self.expression)
    }
}

/// The answer to a satisfiability query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SolverResponse {
    /// Satisfiable, with a model for the inputs of the query.
    Sat(Assignment),
    Unsat,
    /// The backend gave up, usually because the deadline passed.
    Unknown,
}

impl SolverResponse {
    pub fn satisfiability(&self) -> Satisfiability {
        match self {
            SolverResponse::Sat(_) => Satisfiability::Sat,
            SolverResponse::Unsat => Satisfiability::Unsat,
            SolverResponse::Unknown => Satisfiability::Unknown,
        }
    }
}

/// A satisfiability verdict without a model.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Satisfiability {
    Sat,
    Unsat,
    Unknown,
}

impl fmt::Display for Satisfiability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Satisfiability::Sat => write!(f, "sat"),
            Satisfiability::Unsat => write!(f, "unsat"),
            Satisfiability::Unknown => write!(f, "unknown"),
        }
    }
}

/// What the constraints of a query say about its expression.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Validity {
    /// The expression holds in every model of the constraints.
    True,
    /// The expression holds in no model of the constraints.
    False,
    /// The expression may go either way, or the solver could not tell.
    Unknown,
}

/// Counters kept by the solver stack.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SolverStatistics {
    pub queries: u64,
    pub unknowns: u64,
    pub query_time_us: u64,
    pub validity_cache_hits: u64,
    pub validity_cache_misses: u64,
    pub cex_cache_hits: u64,
    pub cex_cache_misses: u64,
    pub independent_slices: u64,
    pub crosschecks: u64,
    pub core_queries: u64,
}

impl SolverStatistics {
    /// Add the counters of `other` to these.
    pub fn merge(&mut self, other: &SolverStatistics) {
        self.queries += other.queries;
        self.unknowns += other.unknowns;
        self.query_time_us += other.query_time_us;
        self.validity_cache_hits += other.validity_cache_hits;
        self.validity_cache_misses += other.validity_cache_misses;
        self.cex_cache_hits += other.cex_cache_hits;
        self.cex_cache_misses += other.cex_cache_misses;
        self.independent_slices += other.independent_slices;
        self.crosschecks += other.crosschecks;
        self.core_queries += other.core_queries;
    }
}

/// A decision procedure for queries.
///
/// Only `check` is required. A layer which can answer satisfiability without
/// producing a model overrides `check_sat` as well. Every other method is
/// derived from these two.
pub trait SolverBackend: Send + Sync {
    /// A short description of this backend and what it wraps.
    fn name(&self) -> String;

    /// Decide the query, producing a model when it is satisfiable. Gives up
    /// with `Unknown` once `deadline` has passed.
    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error>;

    /// Decide the query without needing a model.
    fn check_sat(&self, query: &Query, deadline: Option<Instant>) -> Result<Satisfiability, Error> {
        Ok(self.check(query, deadline)?.satisfiability())
    }

    /// Counters for this backend and everything it wraps.
    fn statistics(&self) -> SolverStatistics {
        SolverStatistics::default()
    }

    /// Can the constraints and the expression hold together?
    fn is_satisfiable(
        &self,
        query: &Query,
        deadline: Option<Instant>,
    ) -> Result<Satisfiability, Error> {
        self.check_sat(query, deadline)
    }

    /// Does the expression hold in every model of the constraints? `None` if
    /// the backend could not tell.
    fn must_be_true(&self, query: &Query, deadline: Option<Instant>) -> Result<Option<bool>, Error> {
        Ok(match self.check_sat(&query.negated()?, deadline)? {
            Satisfiability::Unsat => Some(true),
            Satisfiability::Sat => Some(false),
            Satisfiability::Unknown => None,
        })
    }

    /// Classify the expression under the constraints.
    fn evaluate(&self, query: &Query, deadline: Option<Instant>) -> Result<Validity, Error> {
        match self.must_be_true(query, deadline)? {
            Some(true) => Ok(Validity::True),
            None => Ok(Validity::Unknown),
            Some(false) => Ok(match self.check_sat(query, deadline)? {
                Satisfiability::Unsat => Validity::False,
                _ => Validity::Unknown,
            }),
        }
    }

    /// A value the expression of the query may take under its constraints.
    /// The expression may be of any width.
    fn get_value(&self, query: &Query, deadline: Option<Instant>) -> Result<Option<Constant>, Error> {
        if let Some(constant) = query.expression().get_constant() {
            return Ok(Some(constant.clone()));
        }
        // Inputs the model leaves out are unconstrained, and evaluate as zero.
        let probe = query.with_expression(Expression::bool(true));
        match self.check(&probe, deadline)? {
            SolverResponse::Sat(model) => Ok(Some(model.evaluate_total(query.expression())?)),
            SolverResponse::Unknown => Ok(None),
            SolverResponse::Unsat => Err(Error::InternalInconsistency(
                "path constraints are unsatisfiable".to_string(),
            )),
        }
    }

    /// Values for `symbols` which satisfy the query.
    fn get_initial_values(
        &self,
        query: &Query,
        symbols: &[Symbol],
        deadline: Option<Instant>,
    ) -> Result<SolverResponse, Error> {
        Ok(match self.check(query, deadline)? {
            SolverResponse::Sat(model) => SolverResponse::Sat(model.restrict(symbols)),
            response => response,
        })
    }
}

/// The executor's view of the solver stack.
///
/// Every method takes the asking state: query time is charged to it, and
/// unknown verdicts are flagged on it. An unknown verdict makes
/// `must_be_true` false and `is_satisfiable` true, so exploration may visit
/// infeasible paths but never skips a feasible one.
pub struct Solver {
    backend: Box<dyn SolverBackend>,
    timeout: Option<Duration>,
    max_consecutive_timeouts: u32,
    fault_policy: Policy,
    consecutive_timeouts: u32,
    statistics: SolverStatistics,
}

impl Solver {
    pub fn new(backend: Box<dyn SolverBackend>) -> Solver {
        Solver {
            backend,
            timeout: None,
            max_consecutive_timeouts: 0,
            fault_policy: Policy::Stop,
            consecutive_timeouts: 0,
            statistics: SolverStatistics::default(),
        }
    }

    /// Build the solver stack a configuration asks for.
    ///
    /// From the outside in: validity cache, counterexample cache,
    /// independence slicing, then the core backend, which is a crosscheck of
    /// two backends if one is configured.
    pub fn from_config(config: &Config) -> Result<Solver, Error> {
        let mut backend = core_backend(config.solver_backend, config)?;
        if let Some(oracle) = config.crosscheck_backend {
            backend = Box::new(CrossCheckSolver::new(backend, core_backend(oracle, config)?));
        }
        if config.use_independence {
            backend = Box::new(IndependentSolver::new(backend));
        }
        if config.use_cex_cache {
            backend = Box::new(CexCachingSolver::new(backend));
        }
        if config.use_validity_cache {
            backend = Box::new(CachingSolver::new(backend));
        }
        debug!("solver stack: {}", backend.name());
        Ok(Solver::new(backend)
            .with_timeout(config.solver_timeout())
            .with_max_consecutive_timeouts(config.max_consecutive_timeouts)
            .with_fault_policy(config.solver_fault_policy))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Solver {
        self.timeout = timeout;
        self
    }

    /// Fail with `SolverFault::RepeatedTimeout` after this many unknown
    /// verdicts in a row. Zero disables the check.
    pub fn with_max_consecutive_timeouts(mut self, max: u32) -> Solver {
        self.max_consecutive_timeouts = max;
        self
    }

    /// What to do with non-fatal solver faults.
    pub fn with_fault_policy(mut self, policy: Policy) -> Solver {
        self.fault_policy = policy;
        self
    }

    pub fn backend(&self) -> &dyn SolverBackend {
        self.backend.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Counters for this solver and its whole stack.
    pub fn statistics(&self) -> SolverStatistics {
        let mut statistics = self.backend.statistics();
        statistics.merge(&self.statistics);
        statistics
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    /// Account for one query and apply the unknown and fault policies.
    fn settle<T>(
        &mut self,
        state: &mut ExecutionState,
        start: Instant,
        result: Result<Option<T>, Error>,
    ) -> Result<Option<T>, Error> {
        let elapsed = start.elapsed();
        state.add_query_cost(elapsed);
        self.statistics.queries += 1;
        self.statistics.query_time_us += elapsed.as_micros() as u64;

        let result = match result {
            Err(Error::Solver(fault)) if !fault.is_fatal() && self.fault_policy == Policy::Continue => {
                warn!("state {}: {}, treating the query as unknown", state.id(), fault);
                Ok(None)
            }
            result => result,
        };

        match result {
            Ok(Some(value)) => {
                self.consecutive_timeouts = 0;
                Ok(Some(value))
            }
            Ok(None) => {
                self.statistics.unknowns += 1;
                self.consecutive_timeouts += 1;
                state.flag_unknown_query();
                debug!(
                    "state {}: solver returned unknown after {:?}",
                    state.id(),
                    elapsed
                );
                if self.max_consecutive_timeouts > 0
                    && self.consecutive_timeouts >= self.max_consecutive_timeouts
                {
                    let fault = SolverFault::RepeatedTimeout(self.consecutive_timeouts);
                    self.consecutive_timeouts = 0;
                    if self.fault_policy == Policy::Stop {
                        return Err(fault.into());
                    }
                    warn!("{}", fault);
                }
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Can `expression` be true on this path? Unknown counts as yes.
    pub fn is_satisfiable(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<bool, Error> {
        if let Some(constant) = expression.get_constant() {
            return Ok(constant.to_bool());
        }
        let start = Instant::now();
        let deadline = self.deadline();
        let result = {
            let query = Query::new(state.constraints(), expression.clone());
            self.backend
                .is_satisfiable(&query, deadline)
                .map(|verdict| match verdict {
                    Satisfiability::Sat => Some(true),
                    Satisfiability::Unsat => Some(false),
                    Satisfiability::Unknown => None,
                })
        };
        Ok(self.settle(state, start, result)?.unwrap_or(true))
    }

    pub fn may_be_true(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<bool, Error> {
        self.is_satisfiable(state, expression)
    }

    pub fn may_be_false(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<bool, Error> {
        self.is_satisfiable(state, &Expression::not(expression.clone())?)
    }

    /// Is `expression` true on every path through this state's constraints?
    /// Unknown counts as no.
    pub fn must_be_true(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<bool, Error> {
        if let Some(constant) = expression.get_constant() {
            return Ok(constant.to_bool());
        }
        let start = Instant::now();
        let deadline = self.deadline();
        let result = {
            let query = Query::new(state.constraints(), expression.clone());
            self.backend.must_be_true(&query, deadline)
        };
        Ok(self.settle(state, start, result)?.unwrap_or(false))
    }

    pub fn must_be_false(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<bool, Error> {
        self.must_be_true(state, &Expression::not(expression.clone())?)
    }

    /// Classify `expression` on this path.
    pub fn evaluate(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<Validity, Error> {
        if let Some(constant) = expression.get_constant() {
            return Ok(if constant.to_bool() {
                Validity::True
            } else {
                Validity::False
            });
        }
        let start = Instant::now();
        let deadline = self.deadline();
        let result = {
            let query = Query::new(state.constraints(), expression.clone());
            self.backend.evaluate(&query, deadline).map(|validity| match validity {
                Validity::Unknown => None,
                validity => Some(validity),
            })
        };
        Ok(self
            .settle(state, start, result)?
            .unwrap_or(Validity::Unknown))
    }

    /// One feasible value of `expression` on this path, or `None` if the
    /// solver could not produce one in time.
    pub fn get_value(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<Option<Constant>, Error> {
        if let Some(constant) = expression.get_constant() {
            return Ok(Some(constant.clone()));
        }
        let start = Instant::now();
        let deadline = self.deadline();
        let result = {
            let query = Query::new(state.constraints(), expression.clone());
            self.backend.get_value(&query, deadline)
        };
        self.settle(state, start, result)
    }

    /// Concrete values for every symbolic input of this path.
    pub fn get_initial_values(
        &mut self,
        state: &mut ExecutionState,
    ) -> Result<Option<Assignment>, Error> {
        let start = Instant::now();
        let deadline = self.deadline();
        let result = {
            let query = Query::new(state.constraints(), Expression::bool(true));
            match self
                .backend
                .get_initial_values(&query, state.symbolics(), deadline)
            {
                Ok(SolverResponse::Sat(assignment)) => Ok(Some(assignment)),
                Ok(SolverResponse::Unknown) => Ok(None),
                Ok(SolverResponse::Unsat) => Err(Error::InternalInconsistency(format!(
                    "state {} has unsatisfiable constraints",
                    state.id()
                ))),
                Err(error) => Err(error),
            }
        };
        self.settle(state, start, result)
    }

    /// The unsigned range `expression` may take on this path.
    ///
    /// Found by binary search. Unknown verdicts widen the range.
    pub fn get_range(
        &mut self,
        state: &mut ExecutionState,
        expression: &Expression,
    ) -> Result<Option<(u64, u64)>, Error> {
        let bits = expression.bits();
        let example = match self.get_value(state, expression)? {
            Some(example) => example.value(),
            None => return Ok(None),
        };
        if expression.is_constant() {
            return Ok(Some((example, example)));
        }

        let (mut lo, mut hi) = (0, example);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let below = Expression::cmpleu(expression.clone(), il::expr_const(mid, bits))?;
            if self.may_be_true(state, &below)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let min = lo;

        let (mut lo, mut hi) = (example, il::mask(bits));
        while lo < hi {
            let mid = lo + (hi - lo) / 2 + (hi - lo) % 2;
            let above = Expression::not(Expression::cmpltu(
                expression.clone(),
                il::expr_const(mid, bits),
            )?)?;
            if self.may_be_true(state, &above)? {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(Some((min, lo)))
    }
}

fn core_backend(kind: SolverBackendKind, config: &Config) -> Result<Box<dyn SolverBackend>, Error> {
    Ok(match kind {
        SolverBackendKind::Bitblast => Box::new(BitblastSolver::new()),
        SolverBackendKind::Smtlib2 => Box::new(Smtlib2Solver::new(&config.smtlib2_command)?),
    })
}

#[cfg(test)]
mod solver_tests {
    use crate::config::Policy;
    use crate::il::*;
    use crate::memory::*;
    use crate::solver::*;
    use crate::state::ExecutionState;
    use crate::{Error, RC};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn state() -> ExecutionState {
        let space = AddressSpace::new(RC::new(Allocator::deterministic()), Endian::Little);
        ExecutionState::new(1, 0, space)
    }

    fn x() -> Expression {
        expr_scalar("x", 32)
    }

    fn eq(lhs: Expression, value: u64) -> Expression {
        Expression::cmpeq(lhs, expr_const(value, 32)).unwrap()
    }

    /// A backend which never decides anything.
    struct Stubborn(Arc<AtomicU64>);

    impl SolverBackend for Stubborn {
        fn name(&self) -> String {
            "stubborn".to_string()
        }

        fn check(&self, _: &Query, _: Option<Instant>) -> Result<SolverResponse, Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SolverResponse::Unknown)
        }
    }

    #[test]
    fn unknown_is_conservative() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut solver = Solver::new(Box::new(Stubborn(calls.clone())));
        let mut state = state();

        assert!(solver.is_satisfiable(&mut state, &eq(x(), 10)).unwrap());
        assert!(!solver.must_be_true(&mut state, &eq(x(), 10)).unwrap());
        assert_eq!(solver.get_value(&mut state, &x()).unwrap(), None);
        assert_eq!(state.unknown_queries(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // constants never reach the backend
        assert!(solver.must_be_true(&mut state, &Expression::bool(true)).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn repeated_timeouts_follow_the_fault_policy() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut solver =
            Solver::new(Box::new(Stubborn(calls.clone()))).with_max_consecutive_timeouts(2);
        let mut state = state();
        assert!(solver.may_be_true(&mut state, &eq(x(), 1)).unwrap());
        match solver.may_be_true(&mut state, &eq(x(), 2)) {
            Err(Error::Solver(SolverFault::RepeatedTimeout(2))) => {}
            other => panic!("expected a repeated timeout, got {:?}", other),
        }

        let mut solver = Solver::new(Box::new(Stubborn(calls)))
            .with_max_consecutive_timeouts(2)
            .with_fault_policy(Policy::Continue);
        assert!(solver.may_be_true(&mut state, &eq(x(), 1)).unwrap());
        assert!(solver.may_be_true(&mut state, &eq(x(), 2)).unwrap());
    }

    #[test]
    fn fork_condition_models() {
        let mut solver = Solver::new(Box::new(BitblastSolver::new()));
        let mut taken = state();
        taken.new_symbolic_scalar("x", 32);
        let mut not_taken = taken.clone();

        let condition = eq(x(), 10);
        taken.add_constraint(condition.clone()).unwrap();
        not_taken
            .add_constraint(Expression::not(condition).unwrap())
            .unwrap();

        let model = solver.get_initial_values(&mut taken).unwrap().unwrap();
        assert_eq!(model.scalar("x").unwrap().value(), 10);
        let model = solver.get_initial_values(&mut not_taken).unwrap().unwrap();
        assert_ne!(model.scalar("x").unwrap().value(), 10);

        assert!(solver.must_be_true(&mut taken, &eq(x(), 10)).unwrap());
        assert!(solver.must_be_false(&mut not_taken, &eq(x(), 10)).unwrap());
        assert_eq!(
            solver.evaluate(&mut not_taken, &eq(x(), 11)).unwrap(),
            Validity::Unknown
        );
        assert!(solver.statistics().queries >= 5);
    }

    #[test]
    fn ranges() {
        let mut solver = Solver::new(Box::new(BitblastSolver::new()));
        let mut state = state();
        let x = expr_scalar("x", 8);
        state
            .add_constraint(Expression::cmpltu(x.clone(), expr_const(20, 8)).unwrap())
            .unwrap();
        state
            .add_constraint(Expression::cmpltu(expr_const(4, 8), x.clone()).unwrap())
            .unwrap();
        assert_eq!(solver.get_range(&mut state, &x).unwrap(), Some((5, 19)));
    }
}
