use crate::il::{Assignment, Expression};
use crate::solver::{Query, Satisfiability, SolverBackend, SolverResponse, SolverStatistics};
use crate::Error;
use log::trace;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Disjoint sets over constraint indices.
struct Components {
    parents: Vec<usize>,
}

impl Components {
    fn new(len: usize) -> Components {
        Components {
            parents: (0..len).collect(),
        }
    }

    fn find(&mut self, mut index: usize) -> usize {
        while self.parents[index] != index {
            self.parents[index] = self.parents[self.parents[index]];
            index = self.parents[index];
        }
        index
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parents[a] = b;
        }
    }
}

/// Split `expressions` into groups which share no symbolic input, keeping
/// the order of `expressions` inside each group.
fn partition(expressions: &[&Expression]) -> Vec<Vec<usize>> {
    let mut components = Components::new(expressions.len());
    let mut owner: FxHashMap<String, usize> = FxHashMap::default();
    for (index, expression) in expressions.iter().enumerate() {
        for symbol in expression.symbols() {
            match owner.get(symbol.name()) {
                Some(other) => components.union(index, *other),
                None => {
                    owner.insert(symbol.name().to_string(), index);
                }
            }
        }
    }
    let mut groups: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    let mut order = Vec::new();
    for index in 0..expressions.len() {
        let root = components.find(index);
        groups
            .entry(root)
            .or_insert_with(|| {
                order.push(root);
                Vec::new()
            })
            .push(index);
    }
    order
        .into_iter()
        .filter_map(|root| groups.remove(&root))
        .collect()
}

/// Constraint independence.
///
/// Only constraints which transitively share a symbolic input with the query
/// expression can affect its satisfiability, so only they are passed on.
/// When a model is needed, every other independent group is solved on its
/// own and the models are combined.
pub struct IndependentSolver {
    inner: Box<dyn SolverBackend>,
    slices: AtomicU64,
}

impl IndependentSolver {
    pub fn new(inner: Box<dyn SolverBackend>) -> IndependentSolver {
        IndependentSolver {
            inner,
            slices: AtomicU64::new(0),
        }
    }

    /// The groups of a query. The group holding the query expression, which
    /// is the last of `expressions`, comes first.
    fn groups<'q>(query: &Query<'q>) -> (Vec<&'q Expression>, Vec<Vec<usize>>) {
        let constraints: Vec<&'q Expression> = query.constraints().to_vec();
        let mut all: Vec<&Expression> = constraints.clone();
        all.push(query.expression());
        let mut groups = partition(&all);
        let expression_index = constraints.len();
        if let Some(position) = groups
            .iter()
            .position(|group| group.contains(&expression_index))
        {
            let group = groups.remove(position);
            groups.insert(0, group);
        }
        (constraints, groups)
    }

    /// The sub-query over the group holding the query expression.
    fn slice<'q>(&self, query: &Query<'q>) -> Query<'q> {
        let (constraints, groups) = Self::groups(query);
        let relevant: Vec<&'q Expression> = groups
            .first()
            .map(|group| {
                group
                    .iter()
                    .filter(|index| **index < constraints.len())
                    .map(|index| constraints[*index])
                    .collect()
            })
            .unwrap_or_default();
        if relevant.len() < constraints.len() {
            self.slices.fetch_add(1, Ordering::Relaxed);
            trace!(
                "independence: kept {} of {} constraints",
                relevant.len(),
                constraints.len()
            );
        }
        Query::from_constraints(relevant, query.expression().clone())
    }
}

impl SolverBackend for IndependentSolver {
    fn name(&self) -> String {
        format!("independent({})", self.inner.name())
    }

    fn check_sat(&self, query: &Query, deadline: Option<Instant>) -> Result<Satisfiability, Error> {
        query.ensure_boolean()?;
        self.inner.check_sat(&self.slice(query), deadline)
    }

    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        query.ensure_boolean()?;
        let (constraints, groups) = Self::groups(query);
        if groups.len() <= 1 {
            return self.inner.check(query, deadline);
        }
        self.slices.fetch_add(1, Ordering::Relaxed);

        let mut model = Assignment::new();
        for (i, group) in groups.iter().enumerate() {
            let members: Vec<&Expression> = group
                .iter()
                .filter(|index| **index < constraints.len())
                .map(|index| constraints[*index])
                .collect();
            let expression = if i == 0 {
                query.expression().clone()
            } else {
                Expression::bool(true)
            };
            match self
                .inner
                .check(&Query::from_constraints(members, expression), deadline)?
            {
                SolverResponse::Sat(part) => model.extend(&part),
                response => return Ok(response),
            }
        }
        Ok(SolverResponse::Sat(model))
    }

    fn statistics(&self) -> SolverStatistics {
        let mut statistics = self.inner.statistics();
        statistics.independent_slices += self.slices.load(Ordering::Relaxed);
        statistics
    }
}

#[cfg(test)]
mod independence_tests {
    use super::partition;
    use crate::il::*;
    use crate::solver::*;

    fn eq(name: &str, value: u64) -> Expression {
        Expression::cmpeq(expr_scalar(name, 32), expr_const(value, 32)).unwrap()
    }

    #[test]
    fn partitions_by_shared_inputs() {
        let a = eq("x", 1);
        let b = eq("y", 2);
        let c = Expression::cmpeq(expr_scalar("x", 32), expr_scalar("z", 32)).unwrap();
        let d = eq("z", 1);
        let groups = partition(&[&a, &b, &c, &d]);
        assert_eq!(groups, vec![vec![0, 2, 3], vec![1]]);
    }

    #[test]
    fn models_cover_every_group() {
        let solver = IndependentSolver::new(Box::new(BitblastSolver::new()));
        let a = eq("x", 1);
        let b = eq("y", 2);
        let query = Query::from_constraints(vec![&a, &b], eq("x", 1));

        assert_eq!(solver.is_satisfiable(&query, None).unwrap(), Satisfiability::Sat);
        match solver.check(&query, None).unwrap() {
            SolverResponse::Sat(model) => {
                assert_eq!(model.scalar("x").unwrap().value(), 1);
                assert_eq!(model.scalar("y").unwrap().value(), 2);
            }
            response => panic!("expected sat, got {:?}", response),
        }
        assert!(solver.statistics().independent_slices >= 2);
    }

    #[test]
    fn unrelated_constraints_are_dropped() {
        let solver = IndependentSolver::new(Box::new(BitblastSolver::new()));
        let a = eq("x", 1);
        let b = eq("y", 2);
        let query = Query::from_constraints(vec![&a, &b], eq("y", 3));
        assert_eq!(solver.is_satisfiable(&query, None).unwrap(), Satisfiability::Unsat);
        assert_eq!(solver.statistics().core_queries, 1);
    }
}
