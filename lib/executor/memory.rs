//! Pointer resolution and the memory operations of the executor.

use crate::executor::{Branches, Executor, MemoryAccess, Step};
use crate::il::{self, Expression};
use crate::memory::{MemoryObject, ObjectFlags, POINTER_BITS};
use crate::solver::Solver;
use crate::state::{ExecutionState, TerminationReason};
use crate::{Error, PathError, RC};
use log::{trace, warn};

/// Concrete allocations larger than this fail and yield a null pointer.
pub const MAX_ALLOCATION: u64 = 1 << 24;

/// The most bytes reserved for an object with a symbolic size.
pub const MAX_SYMBOLIC_CAPACITY: u64 = 1 << 16;

/// An object a pointer may point into.
#[derive(Clone, Debug)]
pub struct ResolvedObject {
    pub object: RC<MemoryObject>,
    /// The object was freed in this lineage.
    pub freed: bool,
}

/// Every object a pointer may point into.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub objects: Vec<ResolvedObject>,
    /// The search stopped before every object was considered, either at the
    /// resolution limit or because the solver gave up.
    pub incomplete: bool,
}

fn object_at_or_below(state: &ExecutionState, address: u64, freed: bool) -> Option<RC<MemoryObject>> {
    let space = state.address_space();
    if freed {
        space.freed_in(..=address).next_back().cloned()
    } else {
        space
            .objects_in(..=address)
            .next_back()
            .map(|binding| binding.object().clone())
    }
}

fn object_at_or_above(state: &ExecutionState, address: u64, freed: bool) -> Option<RC<MemoryObject>> {
    let space = state.address_space();
    if freed {
        space.freed_in(address..).next().cloned()
    } else {
        space
            .objects_in(address..)
            .next()
            .map(|binding| binding.object().clone())
    }
}

/// Find the objects, live or freed in this lineage, which `pointer` may
/// point into on this path.
///
/// The search starts at the object holding one feasible value of the
/// pointer and scans outward in both directions, stopping in a direction
/// once the pointer provably cannot reach further. At most `limit` objects
/// are returned.
pub fn resolve(
    solver: &mut Solver,
    state: &mut ExecutionState,
    pointer: &Expression,
    limit: usize,
) -> Result<Resolution, Error> {
    let mut resolution = Resolution::default();

    if let Some(address) = pointer.get_constant().map(|constant| constant.value()) {
        if let Some(binding) = state.address_space().resolve_one(address) {
            resolution.objects.push(ResolvedObject {
                object: binding.object().clone(),
                freed: false,
            });
        } else if let Some(object) = state.address_space().resolve_freed(address) {
            resolution.objects.push(ResolvedObject {
                object: object.clone(),
                freed: true,
            });
        }
        return Ok(resolution);
    }

    let example = match solver.get_value(state, pointer)? {
        Some(example) => example.value(),
        None => {
            resolution.incomplete = true;
            return Ok(resolution);
        }
    };

    // Usually the pointer can only point into the object at the example.
    let containing = state
        .address_space()
        .resolve_one(example)
        .map(|binding| binding.object().clone());
    if let Some(object) = containing {
        let in_bounds = object.bounds_check_pointer(pointer)?;
        if solver.must_be_true(state, &in_bounds)? {
            resolution.objects.push(ResolvedObject {
                object,
                freed: false,
            });
            return Ok(resolution);
        }
    }

    for freed in [false, true] {
        let mut cursor = Some(example);
        while let Some(address) = cursor {
            let object = match object_at_or_below(state, address, freed) {
                Some(object) => object,
                None => break,
            };
            cursor = object.address().checked_sub(1);
            let in_bounds = object.bounds_check_pointer(pointer)?;
            if solver.may_be_true(state, &in_bounds)? {
                resolution.objects.push(ResolvedObject {
                    object: object.clone(),
                    freed,
                });
                if resolution.objects.len() >= limit {
                    resolution.incomplete = true;
                    return Ok(resolution);
                }
            }
            let at_or_above = Expression::not(Expression::cmpltu(
                pointer.clone(),
                object.base_expr(),
            )?)?;
            if solver.must_be_true(state, &at_or_above)? {
                break;
            }
        }

        let mut cursor = example.checked_add(1);
        while let Some(address) = cursor {
            let object = match object_at_or_above(state, address, freed) {
                Some(object) => object,
                None => break,
            };
            cursor = object.address().checked_add(1);
            let in_bounds = object.bounds_check_pointer(pointer)?;
            if solver.may_be_true(state, &in_bounds)? {
                resolution.objects.push(ResolvedObject {
                    object: object.clone(),
                    freed,
                });
                if resolution.objects.len() >= limit {
                    resolution.incomplete = true;
                    return Ok(resolution);
                }
            }
            let below = Expression::cmpltu(pointer.clone(), object.base_expr())?;
            if solver.must_be_true(state, &below)? {
                break;
            }
        }
    }

    Ok(resolution)
}

impl Executor {
    /// Perform a load or store, forking once per object the pointer may
    /// point into.
    pub(crate) fn execute_memory(
        &mut self,
        mut state: ExecutionState,
        access: MemoryAccess,
        step: &mut Step,
    ) -> Result<(), Error> {
        let pointer = access.pointer().clone();
        if pointer.bits() != POINTER_BITS {
            return Err(Error::Sort);
        }
        let bits = access.bits();
        if bits == 0 || bits % 8 != 0 {
            return self.terminate(
                state,
                TerminationReason::Error(PathError::InvalidWidth(bits)),
                step,
            );
        }
        let bytes = access.bytes();
        let resolution = resolve(
            &mut self.solver,
            &mut state,
            &pointer,
            self.config.max_resolutions,
        )?;
        trace!(
            "state {}: {} resolves to {} objects",
            state.id(),
            pointer,
            resolution.objects.len()
        );

        let mut remainder = Some(state);
        for resolved in resolution.objects.iter() {
            let mut current = match remainder.take() {
                Some(current) => current,
                None => break,
            };
            let offset = resolved.object.offset_expr(&pointer)?;
            let in_bounds = resolved.object.bounds_check_offset(&offset, bytes)?;
            let bound = match self.fork(&mut current, &in_bounds, step)? {
                Branches::True => current,
                Branches::False => {
                    remainder = Some(current);
                    continue;
                }
                Branches::Both(other) => {
                    remainder = Some(other);
                    current
                }
            };
            if resolved.freed {
                self.terminate(bound, TerminationReason::Error(PathError::UseAfterFree), step)?;
            } else {
                self.access_object(bound, &resolved.object, &offset, &access, step)?;
            }
        }

        if let Some(state) = remainder {
            let reason = if resolution.incomplete && resolution.objects.is_empty() {
                TerminationReason::Error(PathError::Unresolved(format!("pointer {}", pointer)))
            } else if resolution.incomplete {
                TerminationReason::Early(format!(
                    "pointer may address more than {} objects",
                    self.config.max_resolutions
                ))
            } else {
                TerminationReason::Error(PathError::OutOfBounds)
            };
            self.terminate(state, reason, step)?;
        }
        Ok(())
    }

    fn access_object(
        &mut self,
        mut state: ExecutionState,
        object: &RC<MemoryObject>,
        offset: &Expression,
        access: &MemoryAccess,
        step: &mut Step,
    ) -> Result<(), Error> {
        let endian = state.address_space().endian();
        match *access {
            MemoryAccess::Read {
                bits,
                ref destination,
                ..
            } => {
                let value = state
                    .address_space()
                    .find_object(object)
                    .ok_or_else(|| {
                        Error::InternalInconsistency(format!("resolved {} is not bound", object))
                    })?
                    .read(offset, bits, endian)?;
                state.set_local(destination.clone(), value)?;
            }
            MemoryAccess::Write { ref value, .. } => {
                let read_only = object.is_read_only()
                    || state
                        .address_space()
                        .find_object(object)
                        .map(|object_state| object_state.is_read_only())
                        .unwrap_or(false);
                if read_only {
                    return self.terminate(state, TerminationReason::Error(PathError::ReadOnly), step);
                }
                state
                    .address_space_mut()
                    .object_mut(object)?
                    .write(offset, value, endian)?;
            }
        }
        step.keep(state);
        Ok(())
    }

    pub(crate) fn execute_allocate(
        &mut self,
        mut state: ExecutionState,
        size: Expression,
        name: String,
        flags: ObjectFlags,
        destination: String,
        step: &mut Step,
    ) -> Result<(), Error> {
        let size = match size.bits() {
            bits if bits < POINTER_BITS => Expression::zext(POINTER_BITS, size)?,
            bits if bits > POINTER_BITS => Expression::trun(POINTER_BITS, size)?,
            _ => size,
        };

        let allocation = if let Some(bytes) = size.get_constant().map(|constant| constant.value()) {
            if bytes > MAX_ALLOCATION {
                Err(Error::Memory(format!("{} bytes is too large", bytes)))
            } else if flags.contains(ObjectFlags::LOCAL) {
                state.allocate_local(bytes, name.clone())
            } else {
                state.allocate(bytes, name.clone(), flags)
            }
        } else {
            let (_, max) = match self.solver.get_range(&mut state, &size)? {
                Some(range) => range,
                None => {
                    let reason = PathError::Unresolved(format!("size of {}", name));
                    return self.terminate(state, TerminationReason::Error(reason), step);
                }
            };
            if max > MAX_SYMBOLIC_CAPACITY {
                let fits = Expression::cmpleu(
                    size.clone(),
                    il::expr_const(MAX_SYMBOLIC_CAPACITY, POINTER_BITS),
                )?;
                let reason = format!("symbolic allocation of {} is too large", name);
                match self.fork(&mut state, &fits, step)? {
                    Branches::True => {}
                    Branches::False => {
                        return self.terminate(state, TerminationReason::Early(reason), step);
                    }
                    Branches::Both(other) => {
                        self.terminate(other, TerminationReason::Early(reason), step)?;
                    }
                }
            }
            let capacity = max.min(MAX_SYMBOLIC_CAPACITY);
            let allocation =
                state
                    .address_space_mut()
                    .allocate_symbolic(size, capacity, name.clone(), flags);
            if let Ok(ref object) = allocation {
                if flags.contains(ObjectFlags::LOCAL) {
                    if let Some(frame) = state.stack_mut().top_mut() {
                        frame.add_alloca(object.id());
                    }
                }
            }
            allocation
        };

        let pointer = match allocation {
            Ok(object) => object.base_expr(),
            Err(Error::Memory(reason)) => {
                warn!("state {}: allocation of {} failed: {}", state.id(), name, reason);
                il::expr_const(0, POINTER_BITS)
            }
            Err(error) => return Err(error),
        };
        state.set_local(destination, pointer)?;
        step.keep(state);
        Ok(())
    }

    /// Free the object at `pointer`. A symbolic pointer is resolved one
    /// feasible value at a time.
    pub(crate) fn execute_free(
        &mut self,
        mut state: ExecutionState,
        pointer: Expression,
        step: &mut Step,
    ) -> Result<(), Error> {
        if let Some(address) = pointer.get_constant().map(|constant| constant.value()) {
            return self.free_address(state, address, step);
        }

        for _ in 0..self.config.max_resolutions {
            let address = match self.solver.get_value(&mut state, &pointer)? {
                Some(address) => address,
                None => {
                    let reason = PathError::Unresolved(format!("freed pointer {}", pointer));
                    return self.terminate(state, TerminationReason::Error(reason), step);
                }
            };
            let is_address = Expression::cmpeq(pointer.clone(), address.clone().into())?;
            match self.fork(&mut state, &is_address, step)? {
                Branches::True => return self.free_address(state, address.value(), step),
                Branches::False => {}
                Branches::Both(other) => {
                    self.free_address(state, address.value(), step)?;
                    state = other;
                }
            }
        }

        let reason = format!(
            "freed pointer may take more than {} values",
            self.config.max_resolutions
        );
        self.terminate(state, TerminationReason::Early(reason), step)
    }

    fn free_address(
        &mut self,
        mut state: ExecutionState,
        address: u64,
        step: &mut Step,
    ) -> Result<(), Error> {
        match state.address_space_mut().free(address) {
            Ok(object) => {
                trace!("state {} freed {}", state.id(), object);
                step.keep(state);
                Ok(())
            }
            Err(error) => self.terminate(state, TerminationReason::Error(error), step),
        }
    }
}
