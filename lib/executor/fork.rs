use crate::executor::{Executor, Step};
use crate::il::Expression;
use crate::state::{ExecutionState, MergeTag, TerminationReason};
use crate::{Error, PathError};
use log::trace;
use rand::Rng;

/// Which sides of a condition a state continues on.
#[derive(Debug)]
pub(crate) enum Branches {
    /// Only the condition holding is feasible. The state is unchanged.
    True,
    /// Only the condition failing is feasible. The state is unchanged.
    False,
    /// Both are feasible. The state now assumes the condition, and the
    /// returned sibling assumes its negation.
    Both(ExecutionState),
}

impl Executor {
    /// Split `state` on `condition`.
    ///
    /// An unknown solver verdict counts as feasible. When `max_states`
    /// states are live no sibling is created and one side is chosen at
    /// random instead.
    pub(crate) fn fork(
        &mut self,
        state: &mut ExecutionState,
        condition: &Expression,
        step: &mut Step,
    ) -> Result<Branches, Error> {
        if let Some(constant) = condition.get_constant() {
            return Ok(if constant.to_bool() {
                Branches::True
            } else {
                Branches::False
            });
        }

        let true_feasible = self.solver.may_be_true(state, condition)?;
        let false_feasible = self.solver.may_be_false(state, condition)?;
        match (true_feasible, false_feasible) {
            (true, false) => return Ok(Branches::True),
            (false, true) => return Ok(Branches::False),
            (false, false) => {
                return Err(Error::InternalInconsistency(format!(
                    "state {} at 0x{:x}: neither side of {} is feasible",
                    state.id(),
                    state.pc(),
                    condition
                )))
            }
            (true, true) => {}
        }

        // The forking state itself is not counted by the searcher or the step.
        let live = self.live_states() + step.live_len() + 1;
        if self.config.max_states.map(|max| live >= max).unwrap_or(false) {
            self.statistics.record_suppressed_fork();
            return if self.rng.gen::<bool>() {
                state.add_constraint(condition.clone())?;
                Ok(Branches::True)
            } else {
                state.add_constraint(Expression::not(condition.clone())?)?;
                Ok(Branches::False)
            };
        }

        let id = self.next_state_id();
        let mut sibling = state.branch(id);
        if !self.config.use_copy_on_write {
            let copy = sibling.address_space().deep_copy();
            sibling.set_address_space(copy);
        }
        state.add_constraint(condition.clone())?;
        sibling.add_constraint(Expression::not(condition.clone())?)?;
        if let MergeTag::InMerge { id: region, .. } = sibling.merge_tag() {
            self.merges.join(region, id)?;
        }
        step.create(id);
        self.statistics.record_fork();
        trace!("state {} forked state {} on {}", state.id(), id, condition);
        Ok(Branches::Both(sibling))
    }

    pub(crate) fn execute_branch(
        &mut self,
        mut state: ExecutionState,
        condition: Expression,
        on_true: u64,
        on_false: u64,
        step: &mut Step,
    ) -> Result<(), Error> {
        match self.fork(&mut state, &condition, step)? {
            Branches::True => {
                state.set_pc(on_true);
                step.keep(state);
            }
            Branches::False => {
                state.set_pc(on_false);
                step.keep(state);
            }
            Branches::Both(mut sibling) => {
                state.set_pc(on_true);
                sibling.set_pc(on_false);
                step.keep(state);
                step.keep(sibling);
            }
        }
        Ok(())
    }

    pub(crate) fn execute_assert(
        &mut self,
        mut state: ExecutionState,
        condition: Expression,
        error: PathError,
        step: &mut Step,
    ) -> Result<(), Error> {
        match self.fork(&mut state, &condition, step)? {
            Branches::True => {
                step.keep(state);
                Ok(())
            }
            Branches::False => self.terminate(state, TerminationReason::Error(error), step),
            Branches::Both(failing) => {
                step.keep(state);
                self.terminate(failing, TerminationReason::Error(error), step)
            }
        }
    }

    pub(crate) fn execute_assume(
        &mut self,
        mut state: ExecutionState,
        condition: Expression,
        step: &mut Step,
    ) -> Result<(), Error> {
        if !self.solver.may_be_true(&mut state, &condition)? {
            return self.terminate(
                state,
                TerminationReason::Error(PathError::InvalidAssume),
                step,
            );
        }
        state.add_constraint(condition)?;
        step.keep(state);
        Ok(())
    }
}
