//! Execution states.
//!
//! An `ExecutionState` is one path through the program: where it is, its call
//! stack, its memory, and the constraints its inputs must satisfy to get
//! there. States are created by forking, and every part of a state is
//! structurally shared with the state it was forked from.

mod constraints;
mod merge;
mod stack;

pub use self::constraints::*;
pub use self::stack::*;

use crate::il::{self, Array, Expression, Symbol};
use crate::memory::{AddressSpace, MemoryObject, ObjectFlags};
use crate::{Budget, Error, PathError, RC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies an execution state. Also serves as its path identifier.
pub type StateId = u64;

/// Identifies a merge region.
pub type MergeId = u64;

/// Why a state stopped executing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TerminationReason {
    /// The program exited normally.
    Exit,
    /// A fault on this path.
    Error(PathError),
    /// Pruned because a budget ran out.
    Pruned(Budget),
    /// The run halted while this state was still live.
    Early(String),
}

impl TerminationReason {
    pub fn is_error(&self) -> bool {
        matches!(self, TerminationReason::Error(_))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TerminationReason::Exit => write!(f, "exit"),
            TerminationReason::Error(error) => write!(f, "{}", error),
            TerminationReason::Pruned(budget) => write!(f, "pruned, exhausted the {}", budget),
            TerminationReason::Early(reason) => write!(f, "halted early: {}", reason),
        }
    }
}

/// Whether a state is inside a merge region.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MergeTag {
    NotInMerge,
    /// Inside region `id`. `nested` counts opens seen inside the region,
    /// which are folded into it.
    InMerge { id: MergeId, nested: u32 },
}

impl Default for MergeTag {
    fn default() -> MergeTag {
        MergeTag::NotInMerge
    }
}

/// One path of exploration.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    id: StateId,
    pc: u64,
    stack: Stack,
    address_space: AddressSpace,
    constraints: ConstraintSet,
    symbolics: Vec<Symbol>,
    depth: u32,
    weight: f64,
    instructions: u64,
    instructions_since_covered_new: u64,
    covered_new: bool,
    query_cost: Duration,
    unknown_queries: u32,
    merge: MergeTag,
}

impl ExecutionState {
    /// Create a root state with an empty call stack and no constraints.
    pub fn new(id: StateId, pc: u64, address_space: AddressSpace) -> ExecutionState {
        ExecutionState {
            id,
            pc,
            stack: Stack::new(),
            address_space,
            constraints: ConstraintSet::new(),
            symbolics: Vec::new(),
            depth: 0,
            weight: 1.0,
            instructions: 0,
            instructions_since_covered_new: 0,
            covered_new: false,
            query_cost: Duration::default(),
            unknown_queries: 0,
            merge: MergeTag::NotInMerge,
        }
    }

    /// Create a sibling of this state with the given id.
    ///
    /// Both states are one level deeper and carry half the weight this state
    /// carried. Nothing is copied beyond a handful of pointers.
    pub(crate) fn branch(&mut self, id: StateId) -> ExecutionState {
        self.depth += 1;
        self.weight *= 0.5;
        let mut sibling = self.clone();
        sibling.id = id;
        sibling.covered_new = false;
        sibling.instructions_since_covered_new = 0;
        sibling
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: StateId) {
        self.id = id;
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn address_space_mut(&mut self) -> &mut AddressSpace {
        &mut self.address_space
    }

    pub(crate) fn set_address_space(&mut self, address_space: AddressSpace) {
        self.address_space = address_space;
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Add a constraint the caller has already shown to be feasible.
    pub(crate) fn add_constraint(&mut self, constraint: Expression) -> Result<(), Error> {
        self.constraints.add(constraint)
    }

    pub(crate) fn set_constraints(&mut self, constraints: ConstraintSet) {
        self.constraints = constraints;
    }

    /// The symbolic inputs of this path.
    pub fn symbolics(&self) -> &[Symbol] {
        &self.symbolics
    }

    /// Create a fresh symbolic scalar and record it as an input.
    pub fn new_symbolic_scalar<S: Into<String>>(&mut self, name: S, bits: usize) -> Expression {
        let scalar = il::scalar(name, bits);
        self.symbolics.push(Symbol::Scalar(scalar.clone()));
        scalar.into()
    }

    /// Make the content of `object` a symbolic input named `name`.
    pub fn make_symbolic<S: Into<String>>(
        &mut self,
        object: &MemoryObject,
        name: S,
    ) -> Result<Array, Error> {
        let array = Array::new(name, object.size());
        self.address_space.make_symbolic(object, array.clone())?;
        self.symbolics.push(Symbol::Array(array.clone()));
        Ok(array)
    }

    /// Allocate a heap or global object.
    pub fn allocate<S: Into<String>>(
        &mut self,
        size: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        self.address_space.allocate(size, name, flags)
    }

    /// Allocate a stack object owned by the current frame.
    pub fn allocate_local<S: Into<String>>(
        &mut self,
        size: u64,
        name: S,
    ) -> Result<RC<MemoryObject>, Error> {
        if self.stack.is_empty() {
            return Err(Error::Custom("stack allocation with an empty call stack".to_string()));
        }
        let object = self
            .address_space
            .allocate(size, name, ObjectFlags::LOCAL)?;
        if let Some(frame) = self.stack.top_mut() {
            frame.add_alloca(object.id());
        }
        Ok(object)
    }

    /// Enter a function.
    pub fn call(&mut self, function: u64, return_address: Option<u64>) {
        self.stack.push(function, return_address);
        self.pc = function;
    }

    /// Leave the current function, releasing its stack objects. Returns the
    /// return address, if the frame had one.
    pub fn ret(&mut self) -> Result<Option<u64>, Error> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| Error::Custom("return with an empty call stack".to_string()))?;
        for id in frame.allocas() {
            self.address_space.release_local(*id);
        }
        if let Some(return_address) = frame.return_address() {
            self.pc = return_address;
        }
        Ok(frame.return_address())
    }

    pub fn local(&self, name: &str) -> Option<&Expression> {
        self.stack.local(name)
    }

    pub fn set_local<S: Into<String>>(&mut self, name: S, value: Expression) -> Result<(), Error> {
        self.stack.set_local(name, value)
    }

    /// Forking depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The share of the exploration tree this state represents, halved on
    /// every fork.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn instructions_since_covered_new(&self) -> u64 {
        self.instructions_since_covered_new
    }

    /// True if this state has covered code no other state covered before.
    pub fn covered_new(&self) -> bool {
        self.covered_new
    }

    /// Count one executed instruction. `new_coverage` is true when it was
    /// executed for the first time by any state.
    pub(crate) fn record_instruction(&mut self, new_coverage: bool) {
        self.instructions += 1;
        if new_coverage {
            self.covered_new = true;
            self.instructions_since_covered_new = 0;
        } else {
            self.instructions_since_covered_new += 1;
        }
    }

    /// Time spent in the solver on behalf of this path.
    pub fn query_cost(&self) -> Duration {
        self.query_cost
    }

    pub(crate) fn add_query_cost(&mut self, cost: Duration) {
        self.query_cost += cost;
    }

    /// Solver queries on this path which came back unknown. A path with
    /// unknown verdicts may contain infeasible branches.
    pub fn unknown_queries(&self) -> u32 {
        self.unknown_queries
    }

    pub(crate) fn flag_unknown_query(&mut self) {
        self.unknown_queries += 1;
    }

    pub fn merge_tag(&self) -> MergeTag {
        self.merge
    }

    pub(crate) fn set_merge_tag(&mut self, merge: MergeTag) {
        self.merge = merge;
    }
}

#[cfg(test)]
mod tests {
    use crate::il::*;
    use crate::memory::*;
    use crate::state::*;
    use crate::RC;

    fn state() -> ExecutionState {
        let space = AddressSpace::new(RC::new(Allocator::deterministic()), Endian::Little);
        ExecutionState::new(1, 0x1000, space)
    }

    #[test]
    fn branch_shares_everything() {
        let mut state = state();
        state.call(0x1000, None);
        let object = state.allocate(4, "o", ObjectFlags::NONE).unwrap();
        let mut sibling = state.branch(2);

        assert_eq!(sibling.id(), 2);
        assert_eq!(state.depth(), 1);
        assert_eq!(sibling.depth(), 1);
        assert_eq!(state.weight(), 0.5);
        assert!(sibling.stack().shares_top(state.stack()));
        assert!(RC::ptr_eq(
            state.address_space().find_object(&object).unwrap(),
            sibling.address_space().find_object(&object).unwrap()
        ));

        sibling
            .address_space_mut()
            .object_mut(&object)
            .unwrap()
            .write8(0, expr_const(7, 8))
            .unwrap();
        assert_eq!(
            state
                .address_space()
                .find_object(&object)
                .unwrap()
                .read8(0)
                .unwrap(),
            expr_const(0, 8)
        );
    }

    #[test]
    fn stack_objects_die_with_their_frame() {
        let mut state = state();
        state.call(0x1000, None);
        state.call(0x2000, Some(0x1004));
        let local = state.allocate_local(8, "buf").unwrap();
        assert!(state.address_space().resolve_one(local.address()).is_some());

        assert_eq!(state.ret().unwrap(), Some(0x1004));
        assert_eq!(state.pc(), 0x1004);
        assert!(state.address_space().resolve_one(local.address()).is_none());
        assert!(state.address_space().resolve_freed(local.address()).is_some());
    }

    #[test]
    fn symbolic_inputs_are_recorded() {
        let mut state = state();
        let object = state.allocate(4, "input", ObjectFlags::NONE).unwrap();
        let array = state.make_symbolic(&object, "input").unwrap();
        let x = state.new_symbolic_scalar("x", 32);
        assert_eq!(state.symbolics().len(), 2);
        assert_eq!(x.bits(), 32);
        let byte = state
            .address_space()
            .find_object(&object)
            .unwrap()
            .read8(2)
            .unwrap();
        assert_eq!(byte.collect_arrays(), vec![&array]);
    }
}
