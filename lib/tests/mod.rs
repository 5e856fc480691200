//! Whole-run scenarios over a toy instruction set.

mod forking;
mod memory;
mod merging;

use crate::config::{Config, SearchStrategy};
use crate::executor::*;
use crate::il::{Assignment, Expression};
use crate::memory::{ObjectFlags, POINTER_BITS};
use crate::state::{ExecutionState, StateId, TerminationReason};
use crate::{il, Error, PathError};
use std::collections::BTreeMap;

/// One toy instruction. Operands name locals of the current frame.
#[derive(Clone, Debug)]
pub(crate) enum Op {
    Symbolic(&'static str, usize),
    Const(&'static str, u64, usize),
    Add(&'static str, &'static str, &'static str),
    Zext(&'static str, &'static str, usize),
    Eq(&'static str, &'static str, &'static str),
    Ne(&'static str, &'static str, &'static str),
    Ult(&'static str, &'static str, &'static str),
    Ite(&'static str, &'static str, &'static str, &'static str),
    /// Branch to the target if the local is true, else fall through.
    Branch(&'static str, u64),
    Jump(u64),
    Malloc(&'static str, u64, ObjectFlags),
    /// Make the object at a pointer a symbolic input.
    MakeSymbolic(&'static str, &'static str),
    Load(&'static str, &'static str, usize),
    Store(&'static str, &'static str),
    Free(&'static str),
    Assert(&'static str, PathError),
    Assume(&'static str),
    Fail(&'static str),
    MergeOpen,
    MergeClose,
    Exit,
}

/// Runs a list of `Op`s, with the pc as the index of the next one.
pub(crate) struct Toy {
    program: Vec<Op>,
    /// The locals of every state which reached `Exit`.
    pub exits: Vec<(StateId, BTreeMap<String, Expression>)>,
}

fn local(state: &ExecutionState, name: &str) -> Result<Expression, Error> {
    state
        .local(name)
        .cloned()
        .ok_or_else(|| Error::Custom(format!("no local {}", name)))
}

impl Toy {
    pub fn new(program: Vec<Op>) -> Toy {
        Toy {
            program,
            exits: Vec::new(),
        }
    }

    /// The locals `id` exited with.
    pub fn exit(&self, id: StateId) -> &BTreeMap<String, Expression> {
        &self
            .exits
            .iter()
            .find(|(exited, _)| *exited == id)
            .unwrap()
            .1
    }
}

impl Interpreter for Toy {
    fn step(&mut self, state: &mut ExecutionState) -> Result<StepOutcome, Error> {
        let pc = state.pc();
        let op = self
            .program
            .get(pc as usize)
            .cloned()
            .ok_or_else(|| Error::Custom(format!("no instruction at {}", pc)))?;
        state.set_pc(pc + 1);

        let outcome = match op {
            Op::Symbolic(name, bits) => {
                let value = state.new_symbolic_scalar(name, bits);
                state.set_local(name, value)?;
                StepOutcome::Continue
            }
            Op::Const(name, value, bits) => {
                state.set_local(name, il::expr_const(value, bits))?;
                StepOutcome::Continue
            }
            Op::Add(dst, lhs, rhs) => {
                let value = Expression::add(local(state, lhs)?, local(state, rhs)?)?;
                state.set_local(dst, value)?;
                StepOutcome::Continue
            }
            Op::Zext(dst, src, bits) => {
                let value = Expression::zext(bits, local(state, src)?)?;
                state.set_local(dst, value)?;
                StepOutcome::Continue
            }
            Op::Eq(dst, lhs, rhs) => {
                let value = Expression::cmpeq(local(state, lhs)?, local(state, rhs)?)?;
                state.set_local(dst, value)?;
                StepOutcome::Continue
            }
            Op::Ne(dst, lhs, rhs) => {
                let value = Expression::cmpneq(local(state, lhs)?, local(state, rhs)?)?;
                state.set_local(dst, value)?;
                StepOutcome::Continue
            }
            Op::Ult(dst, lhs, rhs) => {
                let value = Expression::cmpltu(local(state, lhs)?, local(state, rhs)?)?;
                state.set_local(dst, value)?;
                StepOutcome::Continue
            }
            Op::Ite(dst, condition, then, else_) => {
                let value = Expression::ite(
                    local(state, condition)?,
                    local(state, then)?,
                    local(state, else_)?,
                )?;
                state.set_local(dst, value)?;
                StepOutcome::Continue
            }
            Op::Branch(condition, target) => StepOutcome::Branch {
                condition: local(state, condition)?,
                on_true: target,
                on_false: pc + 1,
            },
            Op::Jump(target) => {
                state.set_pc(target);
                StepOutcome::Continue
            }
            Op::Malloc(dst, size, flags) => StepOutcome::Allocate {
                size: il::expr_const(size, POINTER_BITS),
                name: dst.to_string(),
                flags,
                destination: dst.to_string(),
            },
            Op::MakeSymbolic(pointer, name) => {
                let address = local(state, pointer)?
                    .get_constant()
                    .map(|constant| constant.value())
                    .ok_or("symbolic pointer")?;
                let object = state
                    .address_space()
                    .resolve_one(address)
                    .ok_or("no object")?
                    .object()
                    .clone();
                state.make_symbolic(&object, name)?;
                StepOutcome::Continue
            }
            Op::Load(dst, pointer, bits) => StepOutcome::Memory(MemoryAccess::Read {
                pointer: local(state, pointer)?,
                bits,
                destination: dst.to_string(),
            }),
            Op::Store(pointer, value) => StepOutcome::Memory(MemoryAccess::Write {
                pointer: local(state, pointer)?,
                value: local(state, value)?,
            }),
            Op::Free(pointer) => StepOutcome::Free {
                pointer: local(state, pointer)?,
            },
            Op::Assert(condition, error) => StepOutcome::Assert {
                condition: local(state, condition)?,
                error,
            },
            Op::Assume(condition) => StepOutcome::Assume {
                condition: local(state, condition)?,
            },
            Op::Fail(message) => {
                StepOutcome::Terminate(TerminationReason::Error(PathError::Assertion(
                    message.to_string(),
                )))
            }
            Op::MergeOpen => StepOutcome::MergeOpen,
            Op::MergeClose => StepOutcome::MergeClose,
            Op::Exit => {
                let locals = state
                    .stack()
                    .top()
                    .map(|frame| frame.locals().clone())
                    .unwrap_or_default();
                self.exits.push((state.id(), locals));
                StepOutcome::Terminate(TerminationReason::Exit)
            }
        };
        Ok(outcome)
    }
}

/// Depth-first exploration with otherwise default options.
pub(crate) fn config() -> Config {
    Config {
        search_strategy: SearchStrategy::Dfs,
        ..Config::default()
    }
}

pub(crate) struct Run {
    pub executor: Executor,
    pub toy: Toy,
    pub test_cases: Vec<TestCase>,
    pub summary: RunSummary,
}

impl Run {
    /// The test case of the path which exited with `local` set to `value`.
    pub fn exited_with(&self, local: &str, value: u64) -> &TestCase {
        let (id, _) = self
            .toy
            .exits
            .iter()
            .find(|(_, locals)| {
                locals
                    .get(local)
                    .and_then(|expression| expression.get_constant())
                    .map(|constant| constant.value() == value)
                    .unwrap_or(false)
            })
            .unwrap();
        self.test_cases
            .iter()
            .find(|test_case| test_case.path == *id)
            .unwrap()
    }

    pub fn errors(&self) -> Vec<&TestCase> {
        self.test_cases
            .iter()
            .filter(|test_case| test_case.is_error())
            .collect()
    }
}

/// Explore `program` from a single state at pc 0.
pub(crate) fn run(config: Config, program: Vec<Op>) -> Run {
    let mut executor = Executor::new(config).unwrap();
    let mut state = executor.new_state(0);
    state.call(0, None);
    executor.add_state(state);

    let mut toy = Toy::new(program);
    let mut sink = TestCaseCollector::new();
    let summary = executor.run(&mut toy, &mut sink).unwrap();
    Run {
        executor,
        toy,
        test_cases: sink.into_test_cases(),
        summary,
    }
}

/// The value of the scalar `name` in a test case.
pub(crate) fn input(test_case: &TestCase, name: &str) -> u64 {
    test_case.inputs.scalar(name).unwrap().value()
}

/// Evaluate `expression` with the scalar `name` set to `value`.
pub(crate) fn evaluate_with(expression: &Expression, name: &str, value: u64, bits: usize) -> u64 {
    let mut assignment = Assignment::new();
    assignment.set_scalar(name, il::const_(value, bits));
    assignment.evaluate(expression).unwrap().value()
}
