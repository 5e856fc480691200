use crate::il::Expression;
use crate::memory::ObjectFlags;
use crate::state::{ExecutionState, TerminationReason};
use crate::{Error, PathError};

/// A load or store the executor performs for an instruction.
#[derive(Clone, Debug)]
pub enum MemoryAccess {
    /// Load `bits` bits at `pointer` into the local `destination`.
    Read {
        pointer: Expression,
        bits: usize,
        destination: String,
    },
    /// Store `value` at `pointer`.
    Write { pointer: Expression, value: Expression },
}

impl MemoryAccess {
    pub fn pointer(&self) -> &Expression {
        match *self {
            MemoryAccess::Read { ref pointer, .. } | MemoryAccess::Write { ref pointer, .. } => {
                pointer
            }
        }
    }

    /// The width of the access in bits.
    pub fn bits(&self) -> usize {
        match *self {
            MemoryAccess::Read { bits, .. } => bits,
            MemoryAccess::Write { ref value, .. } => value.bits(),
        }
    }

    /// The number of bytes the access touches, counting a partial byte.
    pub fn bytes(&self) -> u64 {
        ((self.bits() + 7) / 8) as u64
    }

    pub fn is_write(&self) -> bool {
        matches!(*self, MemoryAccess::Write { .. })
    }
}

/// What an instruction asks of the executor.
///
/// Everything which needs the solver, or which may create or end states, is
/// handed back to the executor. For every outcome except `Branch` the
/// interpreter has already moved the pc to the next instruction.
#[derive(Clone, Debug)]
pub enum StepOutcome {
    /// Nothing further to do.
    Continue,
    /// A conditional branch, to `on_true` if `condition` holds and to
    /// `on_false` otherwise.
    Branch {
        condition: Expression,
        on_true: u64,
        on_false: u64,
    },
    /// Terminate the path with `error` where `condition` can be false.
    Assert {
        condition: Expression,
        error: PathError,
    },
    /// Continue only where `condition` holds.
    Assume { condition: Expression },
    Memory(MemoryAccess),
    /// Allocate `size` bytes and store the base address in the local
    /// `destination`, or zero if the allocation fails. Objects flagged
    /// `LOCAL` belong to the current frame.
    Allocate {
        size: Expression,
        name: String,
        flags: ObjectFlags,
        destination: String,
    },
    Free { pointer: Expression },
    /// Enter a merge region.
    MergeOpen,
    /// Leave a merge region, waiting for the other states in it.
    MergeClose,
    Terminate(TerminationReason),
}

/// Executes one instruction of a program at a time.
pub trait Interpreter {
    /// Execute the instruction at the pc of `state`.
    ///
    /// Faults of the program belong in `StepOutcome::Terminate`. An `Err`
    /// stops the whole run.
    fn step(&mut self, state: &mut ExecutionState) -> Result<StepOutcome, Error>;
}

#[cfg(test)]
mod tests {
    use super::MemoryAccess;
    use crate::il::{expr_const, expr_scalar};

    #[test]
    fn partial_bytes_count_as_whole_bytes() {
        let read = |bits| MemoryAccess::Read {
            pointer: expr_scalar("p", 64),
            bits,
            destination: "v".to_string(),
        };
        assert_eq!(read(1).bytes(), 1);
        assert_eq!(read(12).bytes(), 2);
        assert_eq!(read(32).bytes(), 4);

        let write = MemoryAccess::Write {
            pointer: expr_scalar("p", 64),
            value: expr_const(0, 12),
        };
        assert_eq!(write.bits(), 12);
        assert_eq!(write.bytes(), 2);
        assert!(write.is_write());
    }
}
