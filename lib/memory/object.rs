use crate::il::{self, Expression};
use crate::memory::{ObjectFlags, POINTER_BITS};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a `MemoryObject` for the lifetime of a run.
pub type ObjectId = u64;

/// The identity of an allocation.
///
/// A `MemoryObject` never changes after allocation. States share it, each
/// binding its own `ObjectState` to it.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct MemoryObject {
    id: ObjectId,
    address: u64,
    size: u64,
    symbolic_size: Option<Expression>,
    name: String,
    flags: ObjectFlags,
}

impl MemoryObject {
    pub(crate) fn new(
        id: ObjectId,
        address: u64,
        size: u64,
        symbolic_size: Option<Expression>,
        name: String,
        flags: ObjectFlags,
    ) -> MemoryObject {
        MemoryObject {
            id,
            address,
            size,
            symbolic_size,
            name,
            flags,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The base address of this object.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The capacity of this object in bytes.
    ///
    /// For objects with a symbolic size this is an upper bound on the size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// One past the last address of this object.
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    /// The symbolic size of this object, if it has one.
    pub fn symbolic_size(&self) -> Option<&Expression> {
        self.symbolic_size.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(ObjectFlags::LOCAL)
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains(ObjectFlags::GLOBAL)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(ObjectFlags::READ_ONLY)
    }

    /// True if the concrete `address` lies within this object.
    ///
    /// A zero-sized object contains only its base address.
    pub fn contains(&self, address: u64) -> bool {
        if self.size == 0 {
            address == self.address
        } else {
            address >= self.address && address < self.end()
        }
    }

    pub fn base_expr(&self) -> Expression {
        il::expr_const(self.address, POINTER_BITS)
    }

    /// The size of this object as a pointer-width expression.
    pub fn size_expr(&self) -> Result<Expression, Error> {
        match self.symbolic_size {
            Some(ref size) => Expression::zext(POINTER_BITS, size.clone()),
            None => Ok(il::expr_const(self.size, POINTER_BITS)),
        }
    }

    /// The offset of `pointer` from the base of this object.
    pub fn offset_expr(&self, pointer: &Expression) -> Result<Expression, Error> {
        Expression::sub(pointer.clone(), self.base_expr())
    }

    /// A condition which holds when `bytes` bytes at `offset` lie within this
    /// object.
    pub fn bounds_check_offset(&self, offset: &Expression, bytes: u64) -> Result<Expression, Error> {
        if self.symbolic_size.is_none() {
            if self.size == 0 && bytes == 0 {
                return Expression::cmpeq(offset.clone(), il::expr_const(0, POINTER_BITS));
            }
            if bytes > self.size {
                return Ok(Expression::bool(false));
            }
            return Expression::cmpleu(
                offset.clone(),
                il::expr_const(self.size - bytes, POINTER_BITS),
            );
        }
        let size = self.size_expr()?;
        let bytes = il::expr_const(bytes, POINTER_BITS);
        let fits = Expression::cmpleu(bytes.clone(), size.clone())?;
        let within = Expression::cmpleu(offset.clone(), Expression::sub(size, bytes)?)?;
        Expression::bool_and(fits, within)
    }

    /// A condition which holds when `pointer` addresses this object.
    pub fn bounds_check_pointer(&self, pointer: &Expression) -> Result<Expression, Error> {
        let offset = self.offset_expr(pointer)?;
        if self.size == 0 {
            return self.bounds_check_offset(&offset, 0);
        }
        self.bounds_check_offset(&offset, 1)
    }
}

impl fmt::Display for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}#{}@0x{:x}[{}]",
            self.name, self.id, self.address, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::il::*;
    use crate::memory::*;

    fn object(size: u64) -> MemoryObject {
        MemoryObject::new(1, 0x1000, size, None, "o".to_string(), ObjectFlags::NONE)
    }

    #[test]
    fn concrete_bounds() {
        let o = object(4);
        let check = |address: u64, bytes: u64| {
            let offset = o.offset_expr(&expr_const(address, POINTER_BITS)).unwrap();
            o.bounds_check_offset(&offset, bytes).unwrap()
        };
        assert!(check(0x1000, 4).is_true());
        assert!(check(0x1001, 4).is_false());
        assert!(check(0x1003, 1).is_true());
        assert!(check(0x0fff, 1).is_false());
        assert!(o
            .bounds_check_pointer(&expr_const(0x1004, POINTER_BITS))
            .unwrap()
            .is_false());
    }

    #[test]
    fn zero_sized() {
        let o = object(0);
        assert!(o.contains(0x1000));
        assert!(!o.contains(0x1001));
        assert!(o
            .bounds_check_pointer(&expr_const(0x1000, POINTER_BITS))
            .unwrap()
            .is_true());
    }

    #[test]
    fn symbolic_bounds() {
        let size = expr_scalar("n", 32);
        let o = MemoryObject::new(
            2,
            0x2000,
            16,
            Some(size),
            "s".to_string(),
            ObjectFlags::NONE,
        );
        let check = o
            .bounds_check_pointer(&expr_const(0x2004, POINTER_BITS))
            .unwrap();
        let mut assignment = Assignment::new();
        assignment.set_scalar("n", const_(5, 32));
        assert!(assignment.evaluate(&check).unwrap().to_bool());
        assignment.set_scalar("n", const_(4, 32));
        assert!(!assignment.evaluate(&check).unwrap().to_bool());
    }
}
