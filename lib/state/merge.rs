use crate::il::Expression;
use crate::memory::{MemoryObject, ObjectState};
use crate::state::{ConstraintSet, ExecutionState, Frame};
use crate::{Error, RC};
use log::{debug, trace};
use rustc_hash::FxHashSet;

impl ExecutionState {
    /// True if `other` can be merged into this state.
    ///
    /// Both states must be at the same pc with call stacks of the same shape,
    /// the same symbolic inputs, and the same set of bound objects.
    pub fn can_merge(&self, other: &ExecutionState) -> bool {
        if self.pc() != other.pc()
            || self.symbolics() != other.symbolics()
            || self.stack().depth() != other.stack().depth()
        {
            return false;
        }
        let frames_match = self
            .stack()
            .frames()
            .zip(other.stack().frames())
            .all(|(lhs, rhs)| {
                lhs.function() == rhs.function()
                    && lhs.return_address() == rhs.return_address()
                    && lhs.allocas() == rhs.allocas()
                    && lhs.locals().keys().eq(rhs.locals().keys())
            });
        frames_match && self.address_space().same_objects(other.address_space())
    }

    /// Merge `other` into this state.
    ///
    /// The constraints the two states share are kept, and the constraints
    /// where they diverge become `in_self ∨ in_other`. Every local and every
    /// byte of memory on which they disagree becomes `ite(in_self, ours,
    /// theirs)`. Returns false, leaving this state untouched, if the states
    /// cannot be merged.
    pub fn merge(&mut self, other: &ExecutionState) -> Result<bool, Error> {
        if !self.can_merge(other) {
            trace!("state {} cannot merge with state {}", self.id(), other.id());
            return Ok(false);
        }

        let ours: FxHashSet<&Expression> = self.constraints().iter().collect();
        let theirs: FxHashSet<&Expression> = other.constraints().iter().collect();

        let mut common = ConstraintSet::new();
        let mut in_self = Vec::new();
        for constraint in self.constraints().to_vec() {
            if theirs.contains(constraint) {
                common.add(constraint.clone())?;
            } else {
                in_self.push(constraint.clone());
            }
        }
        let in_other: Vec<Expression> = other
            .constraints()
            .to_vec()
            .into_iter()
            .filter(|constraint| !ours.contains(constraint))
            .cloned()
            .collect();

        let in_self = Expression::conjunction(in_self)?;
        let in_other = Expression::conjunction(in_other)?;

        // locals
        let mut frames: Vec<Frame> = Vec::with_capacity(self.stack().depth());
        for (ours, theirs) in self.stack().frames().zip(other.stack().frames()) {
            let mut frame = ours.clone();
            for (name, value) in ours.locals() {
                let their_value = theirs
                    .local(name)
                    .ok_or_else(|| Error::InternalInconsistency(format!("local {} vanished", name)))?;
                if value != their_value {
                    let merged = Expression::ite(in_self.clone(), value.clone(), their_value.clone())?;
                    frame.set_local(name.clone(), merged);
                }
            }
            frames.push(frame);
        }

        // memory
        let mut rebound: Vec<(RC<MemoryObject>, ObjectState)> = Vec::new();
        for (ours, theirs) in self
            .address_space()
            .bindings()
            .zip(other.address_space().bindings())
        {
            if RC::ptr_eq(ours.state(), theirs.state()) || ours.state() == theirs.state() {
                continue;
            }
            let mut merged: ObjectState = ours.state().as_ref().clone();
            for offset in 0..ours.object().size() {
                let lhs = ours.state().read8(offset)?;
                let rhs = theirs.state().read8(offset)?;
                if lhs != rhs {
                    merged.write8(offset, Expression::ite(in_self.clone(), lhs, rhs)?)?;
                }
            }
            rebound.push((ours.object().clone(), merged));
        }

        let mut constraints = common;
        constraints.add(Expression::bool_or(in_self, in_other)?)?;

        debug!(
            "merged state {} into state {}, {} objects differ",
            other.id(),
            self.id(),
            rebound.len()
        );

        self.stack_mut().replace_frames(frames);
        for (object, state) in rebound {
            self.address_space_mut().bind(object, state);
        }
        self.set_constraints(constraints);
        self.absorb(other);
        Ok(true)
    }

    /// Fold the scheduling metadata of a merged state into this one.
    fn absorb(&mut self, other: &ExecutionState) {
        self.weight += other.weight;
        self.depth = self.depth.min(other.depth);
        self.instructions = self.instructions.max(other.instructions);
        self.query_cost += other.query_cost;
        self.unknown_queries += other.unknown_queries;
        self.covered_new |= other.covered_new;
    }
}

#[cfg(test)]
mod merge_tests {
    use crate::il::*;
    use crate::memory::*;
    use crate::state::*;
    use crate::RC;

    fn state() -> ExecutionState {
        let space = AddressSpace::new(RC::new(Allocator::deterministic()), Endian::Little);
        let mut state = ExecutionState::new(1, 0x1000, space);
        state.call(0x1000, None);
        state
    }

    #[test]
    fn differing_bytes_become_ite() {
        let mut a = state();
        let p = Expression::cmpeq(a.new_symbolic_scalar("p", 8), expr_const(1, 8)).unwrap();
        let object = a.allocate(1, "o", ObjectFlags::NONE).unwrap();

        let mut b = a.branch(2);
        a.add_constraint(p.clone()).unwrap();
        b.add_constraint(Expression::not(p.clone()).unwrap()).unwrap();
        a.address_space_mut()
            .object_mut(&object)
            .unwrap()
            .write8(0, expr_const(5, 8))
            .unwrap();
        b.address_space_mut()
            .object_mut(&object)
            .unwrap()
            .write8(0, expr_const(7, 8))
            .unwrap();

        assert!(a.merge(&b).unwrap());

        let byte = a
            .address_space()
            .find_object(&object)
            .unwrap()
            .read8(0)
            .unwrap();
        assert_eq!(
            byte,
            Expression::ite(p.clone(), expr_const(5, 8), expr_const(7, 8)).unwrap()
        );
        assert_eq!(a.constraints().len(), 1);
        assert_eq!(a.weight(), 1.0);

        let mut assignment = Assignment::new();
        assignment.set_scalar("p", const_(1, 8));
        assert_eq!(assignment.evaluate(&byte).unwrap().value(), 5);
        assignment.set_scalar("p", const_(0, 8));
        assert_eq!(assignment.evaluate(&byte).unwrap().value(), 7);
        assert!(assignment.satisfies(a.constraints().iter()));
    }

    #[test]
    fn differing_locals_become_ite() {
        let mut a = state();
        let p = Expression::cmpeq(a.new_symbolic_scalar("p", 8), expr_const(1, 8)).unwrap();
        let mut b = a.branch(2);
        a.add_constraint(p.clone()).unwrap();
        b.add_constraint(Expression::not(p.clone()).unwrap()).unwrap();
        a.set_local("r", expr_const(1, 32)).unwrap();
        b.set_local("r", expr_const(2, 32)).unwrap();

        assert!(a.merge(&b).unwrap());
        assert_eq!(
            a.local("r").unwrap(),
            &Expression::ite(p, expr_const(1, 32), expr_const(2, 32)).unwrap()
        );
    }

    #[test]
    fn incompatible_states_are_untouched() {
        let mut a = state();
        let mut b = a.branch(2);
        b.set_pc(0x2000);
        assert!(!a.merge(&b).unwrap());

        b.set_pc(a.pc());
        b.allocate(4, "extra", ObjectFlags::NONE).unwrap();
        assert!(!a.merge(&b).unwrap());
        assert_eq!(a.weight(), 0.5);
    }
}
