use crate::il::{Array, Expression};
use crate::memory::{Allocator, Endian, MemoryObject, ObjectFlags, ObjectId, ObjectState};
use crate::{Error, PathError, RC};
use log::trace;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

/// A `MemoryObject` and its content in one state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Binding {
    object: RC<MemoryObject>,
    state: RC<ObjectState>,
}

impl Binding {
    pub fn object(&self) -> &RC<MemoryObject> {
        &self.object
    }

    pub fn state(&self) -> &RC<ObjectState> {
        &self.state
    }
}

/// The memory of one execution state.
///
/// Cloning an `AddressSpace` is cheap. The binding map and every
/// `ObjectState` are shared until one of the copies writes to them.
#[derive(Clone, Debug)]
pub struct AddressSpace {
    allocator: RC<Allocator>,
    endian: Endian,
    objects: RC<BTreeMap<u64, Binding>>,
    /// Objects freed in this lineage, by base address.
    freed: RC<BTreeMap<u64, RC<MemoryObject>>>,
}

impl AddressSpace {
    /// Create an empty address space drawing allocations from `allocator`.
    pub fn new(allocator: RC<Allocator>, endian: Endian) -> AddressSpace {
        AddressSpace {
            allocator,
            endian,
            objects: RC::new(BTreeMap::new()),
            freed: RC::new(BTreeMap::new()),
        }
    }

    pub fn allocator(&self) -> &RC<Allocator> {
        &self.allocator
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// A copy of this address space which shares no `ObjectState` with it.
    pub fn deep_copy(&self) -> AddressSpace {
        let objects = self
            .objects
            .iter()
            .map(|(address, binding)| {
                (
                    *address,
                    Binding {
                        object: binding.object.clone(),
                        state: RC::new(binding.state.as_ref().clone()),
                    },
                )
            })
            .collect();
        AddressSpace {
            allocator: self.allocator.clone(),
            endian: self.endian,
            objects: RC::new(objects),
            freed: RC::new(self.freed.as_ref().clone()),
        }
    }

    /// Allocate a zero-filled object and bind it.
    pub fn allocate<S: Into<String>>(
        &mut self,
        size: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        let object = self.allocator.allocate(size, name, flags)?;
        self.bind(object.clone(), ObjectState::new(object.clone()));
        Ok(object)
    }

    /// Allocate a zero-filled object at a fixed address and bind it.
    pub fn allocate_fixed<S: Into<String>>(
        &mut self,
        address: u64,
        size: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        let object = self.allocator.allocate_fixed(address, size, name, flags)?;
        self.bind(object.clone(), ObjectState::new(object.clone()));
        Ok(object)
    }

    /// Allocate a zero-filled object with a symbolic size and bind it.
    pub fn allocate_symbolic<S: Into<String>>(
        &mut self,
        size: Expression,
        capacity: u64,
        name: S,
        flags: ObjectFlags,
    ) -> Result<RC<MemoryObject>, Error> {
        let object = self
            .allocator
            .allocate_symbolic(size, capacity, name, flags)?;
        self.bind(object.clone(), ObjectState::new(object.clone()));
        Ok(object)
    }

    /// Bind `state` as the content of `object`, replacing any previous
    /// content.
    pub fn bind(&mut self, object: RC<MemoryObject>, state: ObjectState) {
        RC::make_mut(&mut self.objects).insert(
            object.address(),
            Binding {
                object,
                state: RC::new(state),
            },
        );
    }

    /// Remove the binding of `object` without recording it as freed.
    pub fn unbind(&mut self, object: &MemoryObject) -> Option<Binding> {
        if !self.objects.contains_key(&object.address()) {
            return None;
        }
        RC::make_mut(&mut self.objects).remove(&object.address())
    }

    /// The content bound to `object` in this state.
    pub fn find_object(&self, object: &MemoryObject) -> Option<&RC<ObjectState>> {
        self.objects
            .get(&object.address())
            .filter(|binding| binding.object.id() == object.id())
            .map(|binding| &binding.state)
    }

    /// The live binding at the given base address.
    pub fn binding(&self, address: u64) -> Option<&Binding> {
        self.objects.get(&address)
    }

    /// The live binding of the object with the given id.
    pub fn binding_by_id(&self, id: ObjectId) -> Option<&Binding> {
        self.objects.values().find(|binding| binding.object.id() == id)
    }

    /// Writable content for `object`.
    ///
    /// Clones the binding map and then the `ObjectState` if either is shared
    /// with another state.
    pub fn object_mut(&mut self, object: &MemoryObject) -> Result<&mut ObjectState, Error> {
        let binding = RC::make_mut(&mut self.objects)
            .get_mut(&object.address())
            .filter(|binding| binding.object.id() == object.id())
            .ok_or_else(|| Error::Memory(format!("{} is not bound", object)))?;
        Ok(RC::make_mut(&mut binding.state))
    }

    /// Find the live object containing the concrete `address`.
    pub fn resolve_one(&self, address: u64) -> Option<&Binding> {
        self.objects
            .range(..=address)
            .next_back()
            .map(|(_, binding)| binding)
            .filter(|binding| binding.object.contains(address))
    }

    /// Find the object freed in this lineage which contained `address`.
    pub fn resolve_freed(&self, address: u64) -> Option<&RC<MemoryObject>> {
        self.freed
            .range(..=address)
            .next_back()
            .map(|(_, object)| object)
            .filter(|object| object.contains(address))
    }

    /// Live objects whose base address is in `range`, in address order.
    pub fn objects_in<R>(&self, range: R) -> impl DoubleEndedIterator<Item = &Binding>
    where
        R: std::ops::RangeBounds<u64>,
    {
        self.objects.range(range).map(|(_, binding)| binding)
    }

    /// Freed objects whose base address is in `range`, in address order.
    pub fn freed_in<R>(&self, range: R) -> impl DoubleEndedIterator<Item = &RC<MemoryObject>>
    where
        R: std::ops::RangeBounds<u64>,
    {
        self.freed.range(range).map(|(_, object)| object)
    }

    /// Every live binding, in address order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.objects.values()
    }

    /// The number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Free the heap object whose base address is `address`.
    ///
    /// States forked before the free keep their binding.
    pub fn free(&mut self, address: u64) -> Result<RC<MemoryObject>, PathError> {
        match self.objects.get(&address) {
            Some(binding) if binding.object.is_local() || binding.object.is_global() => {
                return Err(PathError::InvalidFree)
            }
            Some(_) => {}
            None => {
                if self.freed.contains_key(&address) {
                    return Err(PathError::DoubleFree);
                }
                return Err(PathError::InvalidFree);
            }
        }
        let binding = RC::make_mut(&mut self.objects)
            .remove(&address)
            .ok_or(PathError::InvalidFree)?;
        trace!("freed {}", binding.object);
        RC::make_mut(&mut self.freed).insert(address, binding.object.clone());
        Ok(binding.object)
    }

    /// Release a stack object when its frame is popped.
    pub fn release_local(&mut self, id: ObjectId) {
        let address = self
            .binding_by_id(id)
            .map(|binding| binding.object.address());
        if let Some(address) = address {
            if let Some(binding) = RC::make_mut(&mut self.objects).remove(&address) {
                RC::make_mut(&mut self.freed).insert(address, binding.object);
            }
        }
    }

    /// Replace the content of `object` with reads of the symbolic `array`.
    pub fn make_symbolic(&mut self, object: &MemoryObject, array: Array) -> Result<(), Error> {
        self.object_mut(object)?.make_symbolic(array)
    }

    /// Bytes held by object states not yet counted in `seen`.
    ///
    /// Shared states are counted once across every address space passed the
    /// same `seen` set.
    pub fn unshared_bytes(&self, seen: &mut FxHashSet<usize>) -> u64 {
        self.objects
            .values()
            .filter(|binding| seen.insert(RC::as_ptr(&binding.state) as usize))
            .map(|binding| binding.state.size())
            .sum()
    }

    /// True if `other` binds the same objects, ignoring content.
    pub fn same_objects(&self, other: &AddressSpace) -> bool {
        self.objects.len() == other.objects.len()
            && self
                .objects
                .iter()
                .zip(other.objects.iter())
                .all(|((la, lb), (ra, rb))| la == ra && lb.object.id() == rb.object.id())
    }
}

#[cfg(test)]
mod address_space_tests {
    use crate::il::*;
    use crate::memory::*;
    use crate::{PathError, RC};

    fn address_space() -> AddressSpace {
        AddressSpace::new(RC::new(Allocator::deterministic()), Endian::Little)
    }

    #[test]
    fn copy_on_write_isolation() {
        let mut first = address_space();
        let object = first.allocate(4, "o", ObjectFlags::NONE).unwrap();
        first
            .object_mut(&object)
            .unwrap()
            .write8(0, expr_const(1, 8))
            .unwrap();

        let mut second = first.clone();
        assert!(RC::ptr_eq(
            first.find_object(&object).unwrap(),
            second.find_object(&object).unwrap()
        ));

        second
            .object_mut(&object)
            .unwrap()
            .write8(0, expr_const(2, 8))
            .unwrap();

        assert!(!RC::ptr_eq(
            first.find_object(&object).unwrap(),
            second.find_object(&object).unwrap()
        ));
        assert_eq!(
            first.find_object(&object).unwrap().read8(0).unwrap(),
            expr_const(1, 8)
        );
        assert_eq!(
            second.find_object(&object).unwrap().read8(0).unwrap(),
            expr_const(2, 8)
        );
    }

    #[test]
    fn reads_do_not_clone() {
        let mut first = address_space();
        let object = first.allocate(4, "o", ObjectFlags::NONE).unwrap();
        let second = first.clone();
        let _ = second.find_object(&object).unwrap().read8(3).unwrap();
        assert!(RC::ptr_eq(
            first.find_object(&object).unwrap(),
            second.find_object(&object).unwrap()
        ));
        let _ = first.object_mut(&object).unwrap();
        assert_eq!(RC::strong_count(second.find_object(&object).unwrap()), 1);
        assert_eq!(RC::strong_count(first.find_object(&object).unwrap()), 1);
    }

    #[test]
    fn resolve_concrete() {
        let mut space = address_space();
        let a = space.allocate(8, "a", ObjectFlags::NONE).unwrap();
        let b = space.allocate(8, "b", ObjectFlags::NONE).unwrap();
        assert_eq!(space.resolve_one(a.address() + 7).unwrap().object().id(), a.id());
        assert_eq!(space.resolve_one(b.address()).unwrap().object().id(), b.id());
        assert!(space.resolve_one(a.end()).is_none());
    }

    #[test]
    fn free_is_per_lineage() {
        let mut parent = address_space();
        let object = parent.allocate(4, "heap", ObjectFlags::NONE).unwrap();
        let before = parent.clone();

        assert_eq!(parent.free(object.address()).unwrap().id(), object.id());
        let after = parent.clone();

        assert!(before.resolve_one(object.address()).is_some());
        assert!(parent.resolve_one(object.address()).is_none());
        assert!(after.resolve_one(object.address()).is_none());
        assert_eq!(
            after.resolve_freed(object.address() + 1).unwrap().id(),
            object.id()
        );
        assert_eq!(parent.free(object.address()), Err(PathError::DoubleFree));
    }

    #[test]
    fn invalid_frees() {
        let mut space = address_space();
        let heap = space.allocate(4, "heap", ObjectFlags::NONE).unwrap();
        let stack = space.allocate(4, "stack", ObjectFlags::LOCAL).unwrap();
        assert_eq!(space.free(heap.address() + 1), Err(PathError::InvalidFree));
        assert_eq!(space.free(stack.address()), Err(PathError::InvalidFree));
    }

    #[test]
    fn deep_copy_shares_nothing() {
        let mut space = address_space();
        let object = space.allocate(4, "o", ObjectFlags::NONE).unwrap();
        let copy = space.deep_copy();
        assert!(!RC::ptr_eq(
            space.find_object(&object).unwrap(),
            copy.find_object(&object).unwrap()
        ));
        let mut seen = Default::default();
        assert_eq!(space.unshared_bytes(&mut seen) + copy.unshared_bytes(&mut seen), 8);
        let shared = space.clone();
        assert_eq!(shared.unshared_bytes(&mut seen), 0);
    }
}
