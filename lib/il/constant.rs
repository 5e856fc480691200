//! A `Constant` holds a single bit-vector value.
//!
//! Only values up to 64 bits are supported. Arithmetic over constants follows
//! SMT-LIB bit-vector semantics, so division by zero and over-wide shifts are
//! defined rather than errors.

use crate::il::*;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The largest width a `Constant` may have.
pub const MAX_BITS: usize = 64;

/// Returns a mask with the low `bits` bits set.
pub fn mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// A constant value for harrier IL
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Constant {
    value: u64,
    bits: usize,
}

impl Constant {
    /// Create a new `Constant` with the given value and bitness.
    ///
    /// The value is masked to the given bitness.
    pub fn new(value: u64, bits: usize) -> Constant {
        Constant {
            value: value & mask(bits),
            bits,
        }
    }

    /// Create a 1-bit constant from a bool.
    pub fn new_bool(value: bool) -> Constant {
        Constant::new(value as u64, 1)
    }

    /// Get the value of this `Constant`.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Get the value of this `Constant`, sign-extended to 64 bits.
    pub fn value_signed(&self) -> i64 {
        if self.bits == 0 || self.bits >= 64 {
            return self.value as i64;
        }
        let shift = 64 - self.bits;
        ((self.value << shift) as i64) >> shift
    }

    /// Get the number of bits for this `Constant`.
    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    pub fn is_one(&self) -> bool {
        self.value == 1
    }

    /// True if every bit of this constant is set.
    pub fn is_all_ones(&self) -> bool {
        self.value == mask(self.bits)
    }

    /// Interpret this constant as a boolean. Any non-zero value is true.
    pub fn to_bool(&self) -> bool {
        self.value != 0
    }

    fn sign_bit(&self) -> bool {
        self.bits > 0 && (self.value >> (self.bits - 1)) & 1 == 1
    }

    fn ensure_sort(&self, rhs: &Constant) -> Result<(), Error> {
        if self.bits != rhs.bits {
            Err(Error::Sort)
        } else {
            Ok(())
        }
    }

    pub fn add(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new(self.value.wrapping_add(rhs.value), self.bits))
    }

    pub fn sub(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new(self.value.wrapping_sub(rhs.value), self.bits))
    }

    pub fn mul(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new(self.value.wrapping_mul(rhs.value), self.bits))
    }

    /// Unsigned division. Division by zero yields all ones.
    pub fn divu(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        if rhs.is_zero() {
            return Ok(Constant::new(u64::MAX, self.bits));
        }
        Ok(Constant::new(self.value / rhs.value, self.bits))
    }

    /// Unsigned remainder. The remainder of division by zero is the dividend.
    pub fn modu(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        if rhs.is_zero() {
            return Ok(self.clone());
        }
        Ok(Constant::new(self.value % rhs.value, self.bits))
    }

    /// Signed division, rounding towards zero.
    pub fn divs(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        let lhs_neg = self.sign_bit();
        let rhs_neg = rhs.sign_bit();
        let lhs_abs = if lhs_neg { self.neg().value } else { self.value };
        let rhs_abs = if rhs_neg { rhs.neg().value } else { rhs.value };
        let quotient = Constant::new(lhs_abs, self.bits).divu(&Constant::new(rhs_abs, self.bits))?;
        if lhs_neg != rhs_neg {
            Ok(quotient.neg())
        } else {
            Ok(quotient)
        }
    }

    /// Signed remainder, taking the sign of the dividend.
    pub fn mods(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        let lhs_neg = self.sign_bit();
        let lhs_abs = if lhs_neg { self.neg().value } else { self.value };
        let rhs_abs = if rhs.sign_bit() {
            rhs.neg().value
        } else {
            rhs.value
        };
        let remainder = Constant::new(lhs_abs, self.bits).modu(&Constant::new(rhs_abs, self.bits))?;
        if lhs_neg {
            Ok(remainder.neg())
        } else {
            Ok(remainder)
        }
    }

    pub fn and(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new(self.value & rhs.value, self.bits))
    }

    pub fn or(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new(self.value | rhs.value, self.bits))
    }

    pub fn xor(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new(self.value ^ rhs.value, self.bits))
    }

    pub fn shl(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        if rhs.value >= self.bits as u64 {
            return Ok(Constant::new(0, self.bits));
        }
        Ok(Constant::new(self.value << rhs.value, self.bits))
    }

    pub fn shr(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        if rhs.value >= self.bits as u64 {
            return Ok(Constant::new(0, self.bits));
        }
        Ok(Constant::new(self.value >> rhs.value, self.bits))
    }

    /// Arithmetic shift right. Over-wide shifts fill with the sign bit.
    pub fn ashr(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        let shift = if rhs.value >= self.bits as u64 {
            63
        } else {
            rhs.value as u32
        };
        Ok(Constant::new(
            (self.value_signed() >> shift) as u64,
            self.bits,
        ))
    }

    pub fn cmpeq(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new_bool(self.value == rhs.value))
    }

    pub fn cmpneq(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new_bool(self.value != rhs.value))
    }

    pub fn cmpltu(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new_bool(self.value < rhs.value))
    }

    pub fn cmplts(&self, rhs: &Constant) -> Result<Constant, Error> {
        self.ensure_sort(rhs)?;
        Ok(Constant::new_bool(self.value_signed() < rhs.value_signed()))
    }

    pub fn zext(&self, bits: usize) -> Result<Constant, Error> {
        if bits < self.bits || bits > MAX_BITS {
            return Err(Error::Sort);
        }
        Ok(Constant::new(self.value, bits))
    }

    pub fn sext(&self, bits: usize) -> Result<Constant, Error> {
        if bits < self.bits || bits > MAX_BITS {
            return Err(Error::Sort);
        }
        Ok(Constant::new(self.value_signed() as u64, bits))
    }

    pub fn trun(&self, bits: usize) -> Result<Constant, Error> {
        if bits > self.bits || bits == 0 {
            return Err(Error::Sort);
        }
        Ok(Constant::new(self.value, bits))
    }

    /// Two's complement negation.
    pub fn neg(&self) -> Constant {
        Constant::new((!self.value).wrapping_add(1), self.bits)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:X}:{}", self.value(), self.bits)
    }
}

impl From<Constant> for Expression {
    fn from(constant: Constant) -> Expression {
        Expression::constant(constant)
    }
}
