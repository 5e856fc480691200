use crate::il::Expression;
use crate::{Error, RC};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug)]
struct ConstraintNode {
    constraint: Expression,
    fingerprint: u64,
    previous: Option<RC<ConstraintNode>>,
}

impl Drop for ConstraintNode {
    // Unlink the chain iteratively. Paths can carry far more constraints
    // than the default recursive drop has stack for.
    fn drop(&mut self) {
        let mut previous = self.previous.take();
        while let Some(node) = previous {
            match RC::try_unwrap(node) {
                Ok(mut node) => previous = node.previous.take(),
                Err(_) => break,
            }
        }
    }
}

/// Extend the fingerprint of a list of constraints with one more.
pub fn chain_fingerprint(previous: u64, constraint: &Expression) -> u64 {
    let mut hasher = FxHasher::default();
    previous.hash(&mut hasher);
    constraint.hash(&mut hasher);
    hasher.finish()
}

/// The path condition of a state: an ordered conjunction of 1-bit
/// expressions which only ever grows.
///
/// The set is a persistent list. Forked states share every constraint added
/// before the fork. Each node carries a running structural hash of the set up
/// to and including it, which the solver layer uses as a cache key.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    head: Option<RC<ConstraintNode>>,
    len: usize,
}

impl ConstraintSet {
    pub fn new() -> ConstraintSet {
        ConstraintSet::default()
    }

    /// The number of constraints in this set.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A structural hash of this set. Equal sets have equal fingerprints.
    pub fn fingerprint(&self) -> u64 {
        self.head.as_ref().map(|node| node.fingerprint).unwrap_or(0)
    }

    /// Add a constraint.
    ///
    /// Constant true constraints are dropped and conjunctions are split. The
    /// caller is responsible for ensuring the constraint is feasible; adding
    /// constant false is an internal inconsistency.
    pub fn add(&mut self, constraint: Expression) -> Result<(), Error> {
        if constraint.bits() != 1 {
            return Err(Error::Sort);
        }
        if constraint.is_true() {
            return Ok(());
        }
        if constraint.is_false() {
            return Err(Error::InternalInconsistency(
                "added a constraint which is always false".to_string(),
            ));
        }
        if let Expression::And(lhs, rhs) = constraint {
            self.add(*lhs)?;
            return self.add(*rhs);
        }
        let fingerprint = chain_fingerprint(self.fingerprint(), &constraint);
        self.head = Some(RC::new(ConstraintNode {
            constraint,
            fingerprint,
            previous: self.head.take(),
        }));
        self.len += 1;
        Ok(())
    }

    /// Iterate over the constraints, newest first.
    pub fn iter(&self) -> ConstraintIter {
        ConstraintIter {
            node: self.head.as_ref(),
        }
    }

    /// The constraints in the order they were added.
    pub fn to_vec(&self) -> Vec<&Expression> {
        let mut constraints: Vec<&Expression> = self.iter().collect();
        constraints.reverse();
        constraints
    }

    pub fn contains(&self, constraint: &Expression) -> bool {
        self.iter().any(|c| c == constraint)
    }

    /// True if the newest constraints of `self` are the whole of `prefix`.
    pub fn extends(&self, prefix: &ConstraintSet) -> bool {
        if prefix.len > self.len {
            return false;
        }
        let mut node = self.head.as_ref();
        for _ in prefix.len..self.len {
            node = node.and_then(|n| n.previous.as_ref());
        }
        match (node, prefix.head.as_ref()) {
            (Some(lhs), Some(rhs)) => {
                RC::ptr_eq(lhs, rhs)
                    || (lhs.fingerprint == rhs.fingerprint && lhs.constraint == rhs.constraint)
            }
            (None, None) => true,
            _ => false,
        }
    }
}

impl PartialEq for ConstraintSet {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self.fingerprint() == other.fingerprint()
            && self.iter().zip(other.iter()).all(|(lhs, rhs)| lhs == rhs)
    }
}

impl Eq for ConstraintSet {}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for constraint in self.to_vec() {
            writeln!(f, "{}", constraint)?;
        }
        Ok(())
    }
}

/// Iterates over a `ConstraintSet`, newest first.
pub struct ConstraintIter<'c> {
    node: Option<&'c RC<ConstraintNode>>,
}

impl<'c> Iterator for ConstraintIter<'c> {
    type Item = &'c Expression;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.previous.as_ref();
        Some(&node.constraint)
    }
}

#[cfg(test)]
mod tests {
    use crate::il::*;
    use crate::state::ConstraintSet;

    fn lt(name: &str, value: u64) -> Expression {
        Expression::cmpltu(expr_scalar(name, 32), expr_const(value, 32)).unwrap()
    }

    #[test]
    fn grows_and_shares() {
        let mut parent = ConstraintSet::new();
        parent.add(lt("x", 10)).unwrap();
        let mut child = parent.clone();
        child.add(lt("y", 3)).unwrap();

        assert_eq!(parent.len(), 1);
        assert_eq!(child.len(), 2);
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
        assert_eq!(child.to_vec()[0], &lt("x", 10));
        assert_ne!(parent.fingerprint(), child.fingerprint());
    }

    #[test]
    fn fingerprints_are_structural() {
        let mut a = ConstraintSet::new();
        let mut b = ConstraintSet::new();
        a.add(lt("x", 10)).unwrap();
        b.add(lt("x", 10)).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a, b);
    }

    #[test]
    fn trivial_constraints() {
        let mut set = ConstraintSet::new();
        set.add(Expression::bool(true)).unwrap();
        assert!(set.is_empty());
        assert!(set.add(Expression::bool(false)).is_err());
        assert!(set.add(expr_scalar("x", 8)).is_err());

        let conjunction = Expression::and(lt("x", 10), lt("y", 10)).unwrap();
        set.add(conjunction).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn long_sets_drop_on_a_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let mut set = ConstraintSet::new();
                for i in 1..=100_000 {
                    set.add(lt("x", i)).unwrap();
                }
                let shared = set.clone();
                assert_eq!(set.len(), 100_000);
                drop(set);
                assert_eq!(shared.len(), 100_000);
                drop(shared);
            })
            .unwrap();
        handle.join().unwrap();
    }
}
