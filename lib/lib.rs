//! Harrier: the core of a symbolic execution engine.
//!
//! Harrier explores every feasible path through a program whose inputs are
//! symbolic. It does not decode programs itself: an `Interpreter` executes
//! one instruction of an `ExecutionState` at a time and hands back whatever
//! needs the solver or creates new states. Harrier provides:
//!
//! * `il`, bit-vector expressions over symbolic inputs.
//! * `memory`, copy-on-write memory shared between forked states.
//! * `state`, execution states and state merging.
//! * `searcher`, the strategies deciding which state runs next.
//! * `solver`, cached and sliced satisfiability queries over an in-process
//!   bit-blasting solver or an external SMT-LIB2 solver.
//! * `executor`, the exploration loop, which produces a `TestCase` for every
//!   path it finishes.

pub mod config;
mod error;
pub mod executor;
pub mod il;
pub mod memory;
pub mod searcher;
pub mod solver;
pub mod state;
#[cfg(test)]
mod tests;

pub use crate::error::*;

/// The reference counted pointer used throughout harrier.
pub use std::sync::Arc as RC;
