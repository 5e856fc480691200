//! The memory model of an execution state.
//!
//! Memory is a set of disjoint objects. A `MemoryObject` is the immutable
//! identity of an allocation: where it lives and how big it is. The content of
//! that allocation in one state is an `ObjectState`. An `AddressSpace` binds
//! objects to their content for one state.
//!
//! Everything below the `AddressSpace` is reference counted. Forking a state
//! clones a handful of pointers, and the first write through either copy
//! clones only what it touches: the binding map, then the written
//! `ObjectState`. Reads never clone.
//!
//! Addresses are handed out by an `Allocator`, which is shared by every
//! address space of a run and guarantees allocations never overlap, in any
//! state.

mod address_space;
mod allocator;
mod object;
mod object_state;

pub use self::address_space::*;
pub use self::allocator::*;
pub use self::object::*;
pub use self::object_state::*;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The bitness of pointers.
pub const POINTER_BITS: usize = 64;

/// Byte order for multi-byte loads and stores.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    Big,
    Little,
}

impl Default for Endian {
    fn default() -> Endian {
        Endian::Little
    }
}

bitflags! {
    /// Properties of a memory object.
    #[derive(Deserialize, Serialize)]
    pub struct ObjectFlags: u32 {
        const NONE      = 0b0000;
        /// A stack allocation, owned by a call frame.
        const LOCAL     = 0b0001;
        /// A global variable.
        const GLOBAL    = 0b0010;
        /// Placed at a caller-chosen address.
        const FIXED     = 0b0100;
        /// Writes to this object are errors.
        const READ_ONLY = 0b1000;
    }
}
