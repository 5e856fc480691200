use crate::il::Expression;
use crate::memory::{MemoryObject, ObjectFlags, ObjectId};
use crate::{Error, RC};
use log::trace;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The lowest address the allocator hands out.
pub const ALLOCATION_BASE: u64 = 0x1000_0000;

/// The address randomized layouts stay below.
pub const ALLOCATION_LIMIT: u64 = 0x7fff_0000_0000;

/// Unused bytes left after every deterministic allocation, so an access just
/// past the end of one object never lands in the next.
pub const RED_ZONE: u64 = 16;

const RANDOM_ATTEMPTS: usize = 64;

/// How the allocator picks addresses.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPolicy {
    /// Bump allocation from `ALLOCATION_BASE`.
    Deterministic,
    /// Seeded random placement.
    Randomized,
}

#[derive(Debug)]
struct AllocatorInner {
    next_id: ObjectId,
    next_address: u64,
    rng: ChaCha8Rng,
    /// Reserved ranges, start -> end. Ranges are never released, so a freed
    /// address is never handed out again.
    reserved: BTreeMap<u64, u64>,
}

impl AllocatorInner {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        match self.reserved.range(..end).next_back() {
            Some((_, reserved_end)) => *reserved_end > start,
            None => false,
        }
    }

    fn next_id(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Hands out object identities and non-overlapping address ranges.
///
/// One allocator is shared by every address space of a run. Allocation is
/// serialized behind a lock.
#[derive(Debug)]
pub struct Allocator {
    layout: LayoutPolicy,
    alignment: u64,
    inner: Mutex<AllocatorInner>,
}

impl Allocator {
    /// Create a new allocator. `alignment` must be a power of two.
    pub fn new(layout: LayoutPolicy, alignment: u64, seed: u64) -> Result<Allocator, Error> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "alignment {} is not a power of two",
                alignment
            )));
        }
        Ok(Allocator {
            layout,
            alignment,
            inner: Mutex::new(AllocatorInner {
                next_id: 1,
                next_address: ALLOCATION_BASE,
                rng: ChaCha8Rng::seed_from_u64(seed),
                reserved: BTreeMap::new(),
            }),
        })
    }

    /// A deterministic allocator with 16-byte alignment.
    pub fn deterministic() -> Allocator {
        Allocator {
            layout: LayoutPolicy::Deterministic,
            alignment: 16,
            inner: Mutex::new(AllocatorInner {
                next_id: 1,
                next_address: ALLOCATION_BASE,
                rng: ChaCha8Rng::seed_from_u64(0),
                reserved: BTreeMap::new(),
            }),
        }
    }

    pub fn layout(&self) -> LayoutPolicy {
        self.layout
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<AllocatorInner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::InternalInconsistency("allocator lock poisoned".to_string()))
    }

    fn align(&self, address: u64) -> Option<u64> {
        address
            .checked_add(self.alignment - 1)
            .map(|address| address & !(self.alignment - 1))
    }

    fn reserve(&self, inner: &mut AllocatorInner, size: u64) -> Result<u64, Error> {
        let overflow = || Error::Memory(format!("allocation of {} bytes overflows", size));
        // Zero-sized objects still get a distinct address.
        let length = size.max(1);
        match self.layout {
            LayoutPolicy::Deterministic => {
                let mut address = self.align(inner.next_address).ok_or_else(overflow)?;
                let mut end = address.checked_add(length).ok_or_else(overflow)?;
                while inner.overlaps(address, end) {
                    let reserved_end = inner
                        .reserved
                        .range(..end)
                        .next_back()
                        .map(|(_, reserved_end)| *reserved_end)
                        .unwrap_or(end);
                    address = reserved_end
                        .checked_add(RED_ZONE)
                        .and_then(|address| self.align(address))
                        .ok_or_else(overflow)?;
                    end = address.checked_add(length).ok_or_else(overflow)?;
                }
                let next_address = end.checked_add(RED_ZONE).ok_or_else(overflow)?;
                inner.reserved.insert(address, end);
                inner.next_address = next_address;
                Ok(address)
            }
            LayoutPolicy::Randomized => {
                if length >= ALLOCATION_LIMIT - ALLOCATION_BASE {
                    return Err(Error::Memory(format!(
                        "allocation of {} bytes does not fit",
                        size
                    )));
                }
                for _ in 0..RANDOM_ATTEMPTS {
                    let address = inner
                        .rng
                        .gen_range(ALLOCATION_BASE..ALLOCATION_LIMIT - length)
                        & !(self.alignment - 1);
                    if address >= ALLOCATION_BASE && !inner.overlaps(address, address + length) {
                        inner.reserved.insert(address, address + length);
                        return Ok(address);
                    }
                }
                Err(Error::Memory(format!(
                    "no free range for {} bytes after {} attempts",
                    size, RANDOM_ATTEMPTS
                )))
            }
        }
    }

    /// Allocate a new object of `size` bytes.
    pub fn allocate<S: Into<String>>(
        &self,
        size: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        let mut inner = self.lock()?;
        let address = self.reserve(&mut inner, size)?;
        let id = inner.next_id();
        let object = MemoryObject::new(id, address, size, None, name.into(), flags);
        trace!("allocated {}", object);
        Ok(RC::new(object))
    }

    /// Allocate a new object at a fixed address.
    pub fn allocate_fixed<S: Into<String>>(
        &self,
        address: u64,
        size: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        let mut inner = self.lock()?;
        let end = address
            .checked_add(size.max(1))
            .ok_or_else(|| Error::Memory(format!("fixed object at 0x{:x} overflows", address)))?;
        if inner.overlaps(address, end) {
            return Err(Error::Memory(format!(
                "fixed object at 0x{:x} of {} bytes overlaps an existing object",
                address, size
            )));
        }
        inner.reserved.insert(address, end);
        let id = inner.next_id();
        let object = MemoryObject::new(
            id,
            address,
            size,
            None,
            name.into(),
            flags | ObjectFlags::FIXED,
        );
        trace!("allocated fixed {}", object);
        Ok(RC::new(object))
    }

    /// Allocate an object whose size is symbolic, reserving `capacity` bytes.
    ///
    /// `capacity` must be an upper bound on the values `size` may take.
    pub fn allocate_symbolic<S: Into<String>>(
        &self,
        size: Expression,
        capacity: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        let mut inner = self.lock()?;
        let address = self.reserve(&mut inner, capacity)?;
        let id = inner.next_id();
        let object = MemoryObject::new(id, address, capacity, Some(size), name.into(), flags);
        trace!("allocated symbolically sized {}", object);
        Ok(RC::new(object))
    }
}
