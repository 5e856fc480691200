//! Errors raised by harrier.
//!
//! Faults local to one execution path are not errors. They terminate the
//! offending state with a [`PathError`] and the run
//! continues. Everything in this module stops whatever asked for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A fault local to one execution path. It terminates that state only.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum PathError {
    OutOfBounds,
    UseAfterFree,
    DoubleFree,
    /// Freeing an address that is not the base of a heap object.
    InvalidFree,
    /// A write to a read-only object.
    ReadOnly,
    /// A load or store whose width is not a whole number of bytes.
    InvalidWidth(usize),
    DivideByZero,
    Overshift,
    Assertion(String),
    /// An assumption that can never hold on this path.
    InvalidAssume,
    /// The solver could not produce a value the path needed.
    Unresolved(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PathError::OutOfBounds => write!(f, "memory error: out of bound pointer"),
            PathError::UseAfterFree => write!(f, "memory error: use after free"),
            PathError::DoubleFree => write!(f, "memory error: double free"),
            PathError::InvalidFree => write!(f, "memory error: invalid free"),
            PathError::ReadOnly => write!(f, "memory error: write to read-only object"),
            PathError::InvalidWidth(bits) => {
                write!(f, "memory error: access of {} bits is not whole bytes", bits)
            }
            PathError::DivideByZero => write!(f, "divide by zero"),
            PathError::Overshift => write!(f, "overshift"),
            PathError::Assertion(message) => write!(f, "assertion failed: {}", message),
            PathError::InvalidAssume => write!(f, "invalid assumption (provably false)"),
            PathError::Unresolved(what) => write!(f, "could not resolve {}", what),
        }
    }
}

/// A fault in the solver layer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SolverFault {
    /// The backend could not be started or stopped answering.
    Unavailable(String),
    /// Two backends disagreed on the same query.
    Crosscheck {
        query: String,
        first: String,
        second: String,
    },
    /// Too many queries in a row ran out of time.
    RepeatedTimeout(u32),
    /// The backend answered with something we could not understand.
    Protocol(String),
}

impl SolverFault {
    /// A fatal fault stops the run regardless of the configured fault policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SolverFault::Crosscheck { .. })
    }
}

impl fmt::Display for SolverFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverFault::Unavailable(reason) => write!(f, "solver unavailable: {}", reason),
            SolverFault::Crosscheck {
                query,
                first,
                second,
            } => write!(
                f,
                "solvers disagree on {}: {} vs {}",
                query, first, second
            ),
            SolverFault::RepeatedTimeout(count) => {
                write!(f, "{} consecutive solver timeouts", count)
            }
            SolverFault::Protocol(reason) => write!(f, "solver protocol error: {}", reason),
        }
    }
}

/// A resource budget which may be exhausted during exploration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Budget {
    /// Total instructions executed across all states.
    Instructions,
    /// Instructions executed by a single state.
    StateInstructions,
    /// Wall-clock time.
    Time,
    /// Approximate memory held by live states.
    Memory,
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Budget::Instructions => write!(f, "instruction budget"),
            Budget::StateInstructions => write!(f, "per-state instruction budget"),
            Budget::Time => write!(f, "time budget"),
            Budget::Memory => write!(f, "memory budget"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Sort error, invalid bitness between expressions")]
    Sort,
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),
    #[error("Expression contains unassigned scalar {0}")]
    EvalScalar(String),
    #[error("Array {0} read at invalid index {1}")]
    ArrayIndex(String, u64),
    #[error("Memory error: {0}")]
    Memory(String),
    #[error("Unknown execution state {0}")]
    UnknownState(u64),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Solver fault, {0}")]
    Solver(SolverFault),
    #[error("Exhausted the {0}")]
    ResourceExhausted(Budget),
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error("{0}")]
    Custom(String),
    #[error("{0}, caused by: {1}")]
    Chain(Box<Error>, Box<Error>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    ParseInt(#[from] std::num::ParseIntError),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    /// Wrap this error with additional context.
    pub fn chain(self, other: Error) -> Error {
        Error::Chain(Box::new(other), Box::new(self))
    }

    /// Errors which must stop the run no matter how the run is configured.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::InternalInconsistency(_) => true,
            Error::Solver(fault) => fault.is_fatal(),
            Error::Chain(outer, inner) => outer.is_fatal() || inner.is_fatal(),
            _ => false,
        }
    }
}

impl From<SolverFault> for Error {
    fn from(fault: SolverFault) -> Error {
        Error::Solver(fault)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Custom(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}
