//! harrier Intermediate Language.
//!
//! The IL is the language of path constraints and memory contents. It is a
//! small bit-vector expression language over two kinds of symbolic inputs:
//!
//! * `Scalar`: a named bit-vector.
//! * `Array`: a named byte array, read through an `UpdateList` of writes.
//!
//! ## `Expression`
//!
//! * Terminals: `Scalar`, `Constant`, `Read`.
//! * Arithmetic: `Add`, `Sub`, `Mul`, `Divu`, `Modu`, `Divs`, `Mods`, `And`,
//! `Or`, `Xor`, `Shl`, `Shr`, `AShr`.
//! * Comparison: `Cmpeq`, `Cmpneq`, `Cmplts`, `Cmpltu`.
//! * Extension: `Zext`, `Sext`, `Trun`.
//! * Ternary: `Ite`
//!
//! Comparison expressions evaluate to a 1-bit expression with the value `1`
//! representing `True`, and the value `0` representing `False`.
//!
//! It is an error to create an expression which operates over expressions of
//! differing bitness. This is checked dynamically at runtime, and a `Sort`
//! error will be emitted. `Zext`, `Sext`, and `Trun` should be used to ensure
//! expressions are of the same bitness.
//!
//! Constructors fold constants. Division by zero and shifts by at least the
//! operand width are defined the way SMT-LIB defines them, so folding,
//! `Assignment::evaluate` and every solver backend agree.
//!
//! ## `Assignment`
//!
//! An `Assignment` maps symbolic inputs to concrete values. Solver models,
//! counterexamples and generated test cases are all assignments.

mod array;
mod assignment;
mod constant;
mod expression;
mod scalar;

pub use self::array::*;
pub use self::assignment::*;
pub use self::constant::*;
pub use self::expression::*;
pub use self::scalar::*;

/// A convenience function to create a new constant.
///
/// This is the preferred way to create a `Constant`.
pub fn const_(value: u64, bits: usize) -> Constant {
    Constant::new(value, bits)
}

/// A convenience function to create a new constant expression.
///
/// This is the preferred way to create an `Expression::Constant`.
pub fn expr_const(value: u64, bits: usize) -> Expression {
    Expression::constant(Constant::new(value, bits))
}

/// A convenience function to create a new scalar.
///
/// This is the preferred way to create a `Scalar`.
pub fn scalar<S>(name: S, bits: usize) -> Scalar
where
    S: Into<String>,
{
    Scalar::new(name, bits)
}

/// A convenience function to create a new scalar expression.
///
/// This is the preferred way to create an `Expression::Scalar`.
pub fn expr_scalar<S>(name: S, bits: usize) -> Expression
where
    S: Into<String>,
{
    Expression::scalar(Scalar::new(name, bits))
}
