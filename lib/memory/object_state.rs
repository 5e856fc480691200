//! The content of one memory object in one state.
//!
//! Every byte is held in a cell. A cell is either a concrete byte, a symbolic
//! expression, or a marker that says the byte is defined by the update list.
//! Concrete-offset writes only touch cells. A write at a symbolic offset
//! cannot know which cell it hits, so it first flushes every cell that the
//! update list does not reflect yet, then records itself in the update list
//! and marks every cell as defined by the update list.

use crate::il::{self, Array, Expression, UpdateList, ARRAY_INDEX_BITS};
use crate::memory::{Endian, MemoryObject};
use crate::{Error, RC};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
enum ByteCell {
    Concrete(u8),
    Symbolic(Expression),
    Updated,
}

impl ByteCell {
    fn from_expression(value: Expression) -> ByteCell {
        match value.get_constant() {
            Some(constant) => ByteCell::Concrete(constant.value() as u8),
            None => ByteCell::Symbolic(value),
        }
    }
}

/// The content of a `MemoryObject` within one execution state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObjectState {
    object: RC<MemoryObject>,
    cells: Vec<ByteCell>,
    /// `flushed[i]` holds when the update list already yields `cells[i]`.
    flushed: Vec<bool>,
    updates: UpdateList,
    read_only: bool,
}

fn index_expr(offset: u64) -> Expression {
    il::expr_const(offset, ARRAY_INDEX_BITS)
}

impl ObjectState {
    /// A zero-filled object.
    pub fn new(object: RC<MemoryObject>) -> ObjectState {
        let bytes = vec![0; object.size() as usize];
        ObjectState::new_with_contents(object, bytes)
    }

    /// An object holding the given concrete bytes.
    ///
    /// `bytes` is truncated or zero-padded to the size of the object.
    pub fn new_with_contents(object: RC<MemoryObject>, mut bytes: Vec<u8>) -> ObjectState {
        bytes.resize(object.size() as usize, 0);
        let cells = bytes.iter().map(|byte| ByteCell::Concrete(*byte)).collect();
        let root = Array::new_constant(format!("{}#{}", object.name(), object.id()), bytes);
        let read_only = object.is_read_only();
        ObjectState {
            flushed: vec![true; object.size() as usize],
            cells,
            updates: UpdateList::new(root),
            read_only,
            object,
        }
    }

    /// An object whose every byte is read from the symbolic `array`.
    pub fn new_symbolic(object: RC<MemoryObject>, array: Array) -> Result<ObjectState, Error> {
        let mut state = ObjectState::new(object);
        state.make_symbolic(array)?;
        Ok(state)
    }

    pub fn object(&self) -> &RC<MemoryObject> {
        &self.object
    }

    /// The number of bytes held.
    pub fn size(&self) -> u64 {
        self.cells.len() as u64
    }

    pub fn updates(&self) -> &UpdateList {
        &self.updates
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Replace the content of this object with reads of `array`.
    pub fn make_symbolic(&mut self, array: Array) -> Result<(), Error> {
        if array.size() != self.size() {
            return Err(Error::Memory(format!(
                "array {} of {} bytes cannot back {}",
                array.name(),
                array.size(),
                self.object
            )));
        }
        self.updates = UpdateList::new(array);
        self.cells = (0..self.size())
            .map(|offset| Ok(ByteCell::Symbolic(self.updates.read(index_expr(offset))?)))
            .collect::<Result<Vec<ByteCell>, Error>>()?;
        self.flushed = vec![true; self.cells.len()];
        Ok(())
    }

    fn check_offset(&self, offset: u64) -> Result<usize, Error> {
        if offset >= self.size() {
            return Err(Error::Memory(format!(
                "offset {} out of bounds of {}",
                offset, self.object
            )));
        }
        Ok(offset as usize)
    }

    fn cell_expr(&self, offset: usize) -> Result<Expression, Error> {
        Ok(match self.cells[offset] {
            ByteCell::Concrete(byte) => il::expr_const(byte as u64, 8),
            ByteCell::Symbolic(ref expression) => expression.clone(),
            ByteCell::Updated => self.updates.read(index_expr(offset as u64))?,
        })
    }

    /// True if the byte at `offset` is a known constant.
    pub fn is_byte_concrete(&self, offset: u64) -> Result<bool, Error> {
        let offset = self.check_offset(offset)?;
        Ok(self.cell_expr(offset)?.is_constant())
    }

    /// All bytes of this object, if every one is concrete.
    pub fn concrete_bytes(&self) -> Result<Option<Vec<u8>>, Error> {
        let mut bytes = Vec::with_capacity(self.cells.len());
        for offset in 0..self.cells.len() {
            match self.cell_expr(offset)?.get_constant() {
                Some(constant) => bytes.push(constant.value() as u8),
                None => return Ok(None),
            }
        }
        Ok(Some(bytes))
    }

    /// Read the byte at a concrete offset.
    pub fn read8(&self, offset: u64) -> Result<Expression, Error> {
        let offset = self.check_offset(offset)?;
        self.cell_expr(offset)
    }

    /// Read the byte at a possibly symbolic 32-bit offset.
    ///
    /// Unflushed cells are layered onto a private extension of the update
    /// list, so reading never modifies this object.
    pub fn read8_expr(&self, offset: &Expression) -> Result<Expression, Error> {
        if let Some(constant) = offset.get_constant() {
            return self.read8(constant.value());
        }
        let mut updates = self.updates.clone();
        for (i, flushed) in self.flushed.iter().enumerate() {
            if !flushed {
                updates = updates.extend(index_expr(i as u64), self.cell_expr(i)?)?;
            }
        }
        updates.read(offset.clone())
    }

    /// Write the byte at a concrete offset.
    pub fn write8(&mut self, offset: u64, value: Expression) -> Result<(), Error> {
        if value.bits() != 8 {
            return Err(Error::Sort);
        }
        let offset = self.check_offset(offset)?;
        let cell = ByteCell::from_expression(value);
        if self.cells[offset] == cell {
            return Ok(());
        }
        self.cells[offset] = cell;
        self.flushed[offset] = false;
        Ok(())
    }

    /// Write the byte at a possibly symbolic 32-bit offset.
    pub fn write8_expr(&mut self, offset: &Expression, value: Expression) -> Result<(), Error> {
        if let Some(constant) = offset.get_constant() {
            return self.write8(constant.value(), value);
        }
        if value.bits() != 8 {
            return Err(Error::Sort);
        }
        self.flush()?;
        self.updates = self.updates.extend(offset.clone(), value)?;
        for cell in self.cells.iter_mut() {
            *cell = ByteCell::Updated;
        }
        Ok(())
    }

    /// Record every unflushed cell in the update list.
    fn flush(&mut self) -> Result<(), Error> {
        for i in 0..self.cells.len() {
            if !self.flushed[i] {
                let value = self.cell_expr(i)?;
                self.updates = self.updates.extend(index_expr(i as u64), value)?;
                self.flushed[i] = true;
            }
        }
        Ok(())
    }

    fn byte_offset(offset: &Expression, i: u64) -> Result<Expression, Error> {
        let offset = match offset.bits() {
            ARRAY_INDEX_BITS => offset.clone(),
            bits if bits > ARRAY_INDEX_BITS => Expression::trun(ARRAY_INDEX_BITS, offset.clone())?,
            _ => Expression::zext(ARRAY_INDEX_BITS, offset.clone())?,
        };
        Expression::add(offset, index_expr(i))
    }

    /// Read a `bits`-wide value at `offset`. `bits` must be a non-zero
    /// multiple of 8.
    pub fn read(&self, offset: &Expression, bits: usize, endian: Endian) -> Result<Expression, Error> {
        if bits % 8 != 0 || bits == 0 {
            return Err(format!("Reading object with invalid bit-width {}", bits).into());
        }
        let bytes = (bits / 8) as u64;
        let mut result: Option<Expression> = None;
        for i in 0..bytes {
            let byte = self.read8_expr(&ObjectState::byte_offset(offset, i)?)?;
            let shift = match endian {
                Endian::Big => (bytes - i - 1) * 8,
                Endian::Little => i * 8,
            };
            let byte = Expression::shl(
                Expression::zext(bits, byte)?,
                il::expr_const(shift, bits),
            )?;
            result = Some(match result {
                Some(r) => Expression::or(r, byte)?,
                None => byte,
            });
        }
        result.ok_or_else(|| Error::Custom("empty read".to_string()))
    }

    /// Write `value` at `offset`. The width of `value` must be a non-zero
    /// multiple of 8.
    pub fn write(&mut self, offset: &Expression, value: &Expression, endian: Endian) -> Result<(), Error> {
        let bits = value.bits();
        if bits % 8 != 0 || bits == 0 {
            return Err(format!("Writing object with invalid bit-width {}", bits).into());
        }
        let bytes = (bits / 8) as u64;
        for i in 0..bytes {
            let shift = match endian {
                Endian::Big => (bytes - i - 1) * 8,
                Endian::Little => i * 8,
            };
            let byte = Expression::trun(
                8,
                Expression::shr(value.clone(), il::expr_const(shift, bits))?,
            )?;
            self.write8_expr(&ObjectState::byte_offset(offset, i)?, byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod object_state_tests {
    use crate::il::*;
    use crate::memory::*;
    use crate::RC;

    fn object(size: u64) -> RC<MemoryObject> {
        Allocator::deterministic()
            .allocate(size, "o", ObjectFlags::NONE)
            .unwrap()
    }

    fn offset(i: u64) -> Expression {
        expr_const(i, ARRAY_INDEX_BITS)
    }

    #[test]
    fn write_then_read_concrete_over_symbolic() {
        let object = object(4);
        let mut state = ObjectState::new_symbolic(object, Array::new("input", 4)).unwrap();
        assert!(!state.read8(0).unwrap().is_constant());

        state.write8(0, expr_const(5, 8)).unwrap();
        assert_eq!(state.read8(0).unwrap(), expr_const(5, 8));
        assert!(!state.read8(1).unwrap().is_constant());
    }

    #[test]
    fn symbolic_write_then_concrete_read() {
        let mut state = ObjectState::new(object(4));
        state.write8(1, expr_const(9, 8)).unwrap();
        let i = expr_scalar("i", ARRAY_INDEX_BITS);
        state.write8_expr(&i, expr_const(0x41, 8)).unwrap();

        let read = state.read8(1).unwrap();
        assert!(!read.is_constant());

        let mut assignment = Assignment::new();
        assignment.set_scalar("i", const_(1, ARRAY_INDEX_BITS));
        assert_eq!(assignment.evaluate(&read).unwrap(), const_(0x41, 8));
        assignment.set_scalar("i", const_(3, ARRAY_INDEX_BITS));
        assert_eq!(assignment.evaluate(&read).unwrap(), const_(9, 8));

        // a later concrete write folds away the history for that byte
        state.write8(1, expr_const(7, 8)).unwrap();
        assert_eq!(state.read8(1).unwrap(), expr_const(7, 8));
    }

    #[test]
    fn symbolic_read_sees_unflushed_writes() {
        let mut state = ObjectState::new(object(4));
        state.write8(2, expr_const(0x22, 8)).unwrap();
        let before = state.updates().len();
        let read = state.read8_expr(&expr_scalar("i", ARRAY_INDEX_BITS)).unwrap();
        assert_eq!(state.updates().len(), before);

        let mut assignment = Assignment::new();
        assignment.set_scalar("i", const_(2, ARRAY_INDEX_BITS));
        assert_eq!(assignment.evaluate(&read).unwrap(), const_(0x22, 8));
        assignment.set_scalar("i", const_(0, ARRAY_INDEX_BITS));
        assert_eq!(assignment.evaluate(&read).unwrap(), const_(0, 8));
    }

    #[test]
    fn multi_byte_values() {
        let mut state = ObjectState::new(object(8));
        state
            .write(&offset(0), &expr_const(0xAABBCCDD, 32), Endian::Little)
            .unwrap();
        assert_eq!(state.read8(0).unwrap(), expr_const(0xDD, 8));
        assert_eq!(
            state.read(&offset(0), 32, Endian::Little).unwrap(),
            expr_const(0xAABBCCDD, 32)
        );
        assert_eq!(
            state.read(&offset(1), 16, Endian::Little).unwrap(),
            expr_const(0xBBCC, 16)
        );

        state
            .write(&offset(4), &expr_const(0x1122, 16), Endian::Big)
            .unwrap();
        assert_eq!(state.read8(4).unwrap(), expr_const(0x11, 8));
        assert_eq!(
            state.read(&offset(4), 16, Endian::Big).unwrap(),
            expr_const(0x1122, 16)
        );
    }

    #[test]
    fn identical_writes_do_not_grow_history() {
        let mut state = ObjectState::new(object(4));
        let i = expr_scalar("i", ARRAY_INDEX_BITS);
        state.write8_expr(&i, expr_const(1, 8)).unwrap();
        let length = state.updates().len();
        state.write8_expr(&i, expr_const(1, 8)).unwrap();
        assert_eq!(state.updates().len(), length);
    }

    #[test]
    fn out_of_bounds() {
        let state = ObjectState::new(object(4));
        assert!(state.read8(4).is_err());
    }
}
