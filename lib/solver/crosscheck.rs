use crate::solver::{
    Query, Satisfiability, SolverBackend, SolverFault, SolverResponse, SolverStatistics,
};
use crate::Error;
use log::{error, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

/// Run every query on two backends in parallel and compare the answers.
///
/// Definite answers must agree, and every model must satisfy the query it
/// was produced for. Anything else is a `SolverFault::Crosscheck`, which is
/// fatal. When the primary backend gives up the oracle's answer is used.
pub struct CrossCheckSolver {
    primary: Box<dyn SolverBackend>,
    oracle: Box<dyn SolverBackend>,
    checks: AtomicU64,
}

impl CrossCheckSolver {
    pub fn new(primary: Box<dyn SolverBackend>, oracle: Box<dyn SolverBackend>) -> CrossCheckSolver {
        CrossCheckSolver {
            primary,
            oracle,
            checks: AtomicU64::new(0),
        }
    }

    fn fault(query: &Query, first: &SolverResponse, second: &SolverResponse) -> Error {
        let fault = SolverFault::Crosscheck {
            query: query.to_string(),
            first: describe(first),
            second: describe(second),
        };
        error!("{}", fault);
        fault.into()
    }

    fn validate(&self, query: &Query, response: &SolverResponse) -> bool {
        match response {
            SolverResponse::Sat(model) => query.expressions().all(|expression| {
                model
                    .evaluate_total(expression)
                    .map(|value| value.to_bool())
                    .unwrap_or(false)
            }),
            _ => true,
        }
    }
}

fn describe(response: &SolverResponse) -> String {
    match response {
        SolverResponse::Sat(model) => format!("sat {}", model),
        SolverResponse::Unsat => "unsat".to_string(),
        SolverResponse::Unknown => "unknown".to_string(),
    }
}

impl SolverBackend for CrossCheckSolver {
    fn name(&self) -> String {
        format!("crosscheck({}, {})", self.primary.name(), self.oracle.name())
    }

    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        query.ensure_boolean()?;
        self.checks.fetch_add(1, Ordering::Relaxed);

        let (first, second) = thread::scope(|scope| {
            let oracle = scope.spawn(|| self.oracle.check(query, deadline));
            let first = self.primary.check(query, deadline);
            let second = oracle.join().unwrap_or_else(|_| {
                Err(SolverFault::Unavailable(format!("{} panicked", self.oracle.name())).into())
            });
            (first, second)
        });
        let (first, second) = (first?, second?);
        trace!("crosscheck: {} / {}", describe(&first), describe(&second));

        if !self.validate(query, &first) {
            return Err(Self::fault(query, &first, &second));
        }
        if !self.validate(query, &second) {
            return Err(Self::fault(query, &first, &second));
        }
        match (first.satisfiability(), second.satisfiability()) {
            (Satisfiability::Unknown, _) => Ok(second),
            (_, Satisfiability::Unknown) => Ok(first),
            (a, b) if a == b => Ok(first),
            _ => Err(Self::fault(query, &first, &second)),
        }
    }

    fn statistics(&self) -> SolverStatistics {
        let mut statistics = self.primary.statistics();
        statistics.merge(&self.oracle.statistics());
        statistics.crosschecks += self.checks.load(Ordering::Relaxed);
        statistics
    }
}

#[cfg(test)]
mod crosscheck_tests {
    use crate::il::*;
    use crate::solver::*;
    use crate::Error;
    use std::time::Instant;

    /// Claims everything is unsatisfiable.
    struct Liar;

    impl SolverBackend for Liar {
        fn name(&self) -> String {
            "liar".to_string()
        }

        fn check(&self, _: &Query, _: Option<Instant>) -> Result<SolverResponse, Error> {
            Ok(SolverResponse::Unsat)
        }
    }

    /// Never decides anything.
    struct Shrug;

    impl SolverBackend for Shrug {
        fn name(&self) -> String {
            "shrug".to_string()
        }

        fn check(&self, _: &Query, _: Option<Instant>) -> Result<SolverResponse, Error> {
            Ok(SolverResponse::Unknown)
        }
    }

    fn x_is(value: u64) -> Expression {
        Expression::cmpeq(expr_scalar("x", 16), expr_const(value, 16)).unwrap()
    }

    #[test]
    fn agreement() {
        let solver = CrossCheckSolver::new(
            Box::new(BitblastSolver::new()),
            Box::new(BitblastSolver::new()),
        );
        let query = Query::from_constraints(vec![], x_is(9));
        match solver.check(&query, None).unwrap() {
            SolverResponse::Sat(model) => assert_eq!(model.scalar("x").unwrap().value(), 9),
            response => panic!("expected sat, got {:?}", response),
        }
        let statistics = solver.statistics();
        assert_eq!(statistics.crosschecks, 1);
        assert_eq!(statistics.core_queries, 2);
    }

    #[test]
    fn disagreement_is_fatal() {
        let solver = CrossCheckSolver::new(Box::new(BitblastSolver::new()), Box::new(Liar));
        let query = Query::from_constraints(vec![], x_is(9));
        match solver.check(&query, None) {
            Err(Error::Solver(fault)) => {
                assert!(fault.is_fatal());
                assert!(matches!(fault, SolverFault::Crosscheck { .. }));
            }
            other => panic!("expected a crosscheck fault, got {:?}", other),
        }
    }

    #[test]
    fn unknown_defers_to_the_oracle() {
        let solver = CrossCheckSolver::new(Box::new(Shrug), Box::new(BitblastSolver::new()));
        let a = x_is(1);
        let query = Query::from_constraints(vec![&a], x_is(2));
        assert_eq!(solver.check(&query, None).unwrap(), SolverResponse::Unsat);
    }
}
