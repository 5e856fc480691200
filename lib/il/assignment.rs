//! Concrete values for symbolic inputs, and evaluation of expressions under
//! them.

use crate::il::*;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A symbolic input: a scalar, or a whole symbolic array.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Symbol {
    Scalar(Scalar),
    Array(Array),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match *self {
            Symbol::Scalar(ref scalar) => scalar.name(),
            Symbol::Array(ref array) => array.name(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Symbol::Scalar(ref scalar) => scalar.fmt(f),
            Symbol::Array(ref array) => array.fmt(f),
        }
    }
}

/// A mapping from symbolic inputs to concrete values.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Assignment {
    scalars: BTreeMap<String, Constant>,
    arrays: BTreeMap<String, Vec<u8>>,
}

impl Assignment {
    pub fn new() -> Assignment {
        Assignment::default()
    }

    pub fn set_scalar<S: Into<String>>(&mut self, name: S, value: Constant) {
        self.scalars.insert(name.into(), value);
    }

    pub fn scalar(&self, name: &str) -> Option<&Constant> {
        self.scalars.get(name)
    }

    pub fn set_array<S: Into<String>>(&mut self, name: S, bytes: Vec<u8>) {
        self.arrays.insert(name.into(), bytes);
    }

    pub fn array(&self, name: &str) -> Option<&[u8]> {
        self.arrays.get(name).map(|bytes| bytes.as_slice())
    }

    pub fn scalars(&self) -> &BTreeMap<String, Constant> {
        &self.scalars
    }

    pub fn arrays(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.arrays
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.arrays.is_empty()
    }

    /// True if this assignment gives a value to `symbol`.
    pub fn binds(&self, symbol: &Symbol) -> bool {
        match *symbol {
            Symbol::Scalar(ref scalar) => self.scalars.contains_key(scalar.name()),
            Symbol::Array(ref array) => self.arrays.contains_key(array.name()),
        }
    }

    /// Copy every value of `other` into this assignment.
    pub fn extend(&mut self, other: &Assignment) {
        for (name, value) in &other.scalars {
            self.scalars.insert(name.clone(), value.clone());
        }
        for (name, bytes) in &other.arrays {
            self.arrays.insert(name.clone(), bytes.clone());
        }
    }

    /// An assignment for exactly `symbols`, with unbound inputs set to zero.
    pub fn restrict(&self, symbols: &[Symbol]) -> Assignment {
        let mut assignment = Assignment::new();
        for symbol in symbols {
            match *symbol {
                Symbol::Scalar(ref scalar) => assignment.set_scalar(
                    scalar.name(),
                    self.scalars
                        .get(scalar.name())
                        .cloned()
                        .unwrap_or_else(|| const_(0, scalar.bits())),
                ),
                Symbol::Array(ref array) => {
                    let mut bytes = self
                        .arrays
                        .get(array.name())
                        .cloned()
                        .unwrap_or_default();
                    bytes.resize(array.size() as usize, 0);
                    assignment.set_array(array.name(), bytes);
                }
            }
        }
        assignment
    }

    /// Evaluate `expression`, failing if it mentions an input this
    /// assignment does not bind.
    pub fn evaluate(&self, expression: &Expression) -> Result<Constant, Error> {
        self.eval(expression, true)
    }

    /// Evaluate `expression`, treating unbound inputs as zero.
    pub fn evaluate_total(&self, expression: &Expression) -> Result<Constant, Error> {
        self.eval(expression, false)
    }

    /// True if every expression evaluates to true under this assignment.
    ///
    /// An expression mentioning an unbound input is not satisfied.
    pub fn satisfies<'e, I>(&self, constraints: I) -> bool
    where
        I: IntoIterator<Item = &'e Expression>,
    {
        constraints
            .into_iter()
            .all(|constraint| match self.evaluate(constraint) {
                Ok(value) => value.to_bool(),
                Err(_) => false,
            })
    }

    fn eval_read(
        &self,
        updates: &UpdateList,
        index: &Expression,
        strict: bool,
    ) -> Result<Constant, Error> {
        let index = self.eval(index, strict)?;
        for (i, v) in updates.iter() {
            if self.eval(i, strict)?.value() == index.value() {
                return self.eval(v, strict);
            }
        }
        let root = updates.root();
        if let Some(contents) = root.contents() {
            return match contents.get(index.value() as usize) {
                Some(byte) => Ok(const_(*byte as u64, 8)),
                None if !strict => Ok(const_(0, 8)),
                None => Err(Error::ArrayIndex(root.name().to_string(), index.value())),
            };
        }
        match self.arrays.get(root.name()) {
            Some(bytes) => match bytes.get(index.value() as usize) {
                Some(byte) => Ok(const_(*byte as u64, 8)),
                None if !strict => Ok(const_(0, 8)),
                None => Err(Error::ArrayIndex(root.name().to_string(), index.value())),
            },
            None if !strict => Ok(const_(0, 8)),
            None => Err(Error::EvalScalar(root.name().to_string())),
        }
    }

    fn eval(&self, expression: &Expression, strict: bool) -> Result<Constant, Error> {
        Ok(match *expression {
            Expression::Scalar(ref scalar) => match self.scalars.get(scalar.name()) {
                Some(value) => value.clone(),
                None if !strict => const_(0, scalar.bits()),
                None => return Err(Error::EvalScalar(scalar.name().to_string())),
            },
            Expression::Constant(ref constant) => constant.clone(),
            Expression::Read(ref updates, ref index) => self.eval_read(updates, index, strict)?,
            Expression::Add(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.add(&self.eval(rhs, strict)?)?
            }
            Expression::Sub(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.sub(&self.eval(rhs, strict)?)?
            }
            Expression::Mul(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.mul(&self.eval(rhs, strict)?)?
            }
            Expression::Divu(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.divu(&self.eval(rhs, strict)?)?
            }
            Expression::Modu(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.modu(&self.eval(rhs, strict)?)?
            }
            Expression::Divs(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.divs(&self.eval(rhs, strict)?)?
            }
            Expression::Mods(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.mods(&self.eval(rhs, strict)?)?
            }
            Expression::And(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.and(&self.eval(rhs, strict)?)?
            }
            Expression::Or(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.or(&self.eval(rhs, strict)?)?
            }
            Expression::Xor(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.xor(&self.eval(rhs, strict)?)?
            }
            Expression::Shl(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.shl(&self.eval(rhs, strict)?)?
            }
            Expression::Shr(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.shr(&self.eval(rhs, strict)?)?
            }
            Expression::AShr(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.ashr(&self.eval(rhs, strict)?)?
            }
            Expression::Cmpeq(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.cmpeq(&self.eval(rhs, strict)?)?
            }
            Expression::Cmpneq(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.cmpneq(&self.eval(rhs, strict)?)?
            }
            Expression::Cmplts(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.cmplts(&self.eval(rhs, strict)?)?
            }
            Expression::Cmpltu(ref lhs, ref rhs) => {
                self.eval(lhs, strict)?.cmpltu(&self.eval(rhs, strict)?)?
            }
            Expression::Zext(bits, ref src) => self.eval(src, strict)?.zext(bits)?,
            Expression::Sext(bits, ref src) => self.eval(src, strict)?.sext(bits)?,
            Expression::Trun(bits, ref src) => self.eval(src, strict)?.trun(bits)?,
            Expression::Ite(ref cond, ref then, ref else_) => {
                if self.eval(cond, strict)?.to_bool() {
                    self.eval(then, strict)?
                } else {
                    self.eval(else_, strict)?
                }
            }
        })
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, value) in &self.scalars {
            writeln!(f, "{} = {}", name, value)?;
        }
        for (name, bytes) in &self.arrays {
            writeln!(f, "{} = {:?}", name, bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::il::*;

    #[test]
    fn evaluate_scalars() {
        let mut assignment = Assignment::new();
        assignment.set_scalar("x", const_(10, 32));
        let e = Expression::cmpeq(expr_scalar("x", 32), expr_const(10, 32)).unwrap();
        assert!(assignment.evaluate(&e).unwrap().to_bool());
        assert!(assignment.satisfies(&[e]));

        let y = expr_scalar("y", 32);
        assert!(assignment.evaluate(&y).is_err());
        assert_eq!(assignment.evaluate_total(&y).unwrap(), const_(0, 32));
    }

    #[test]
    fn evaluate_reads() {
        let a = Array::new("a", 4);
        let i = expr_scalar("i", ARRAY_INDEX_BITS);
        let updates = UpdateList::new(a.clone())
            .extend(i.clone(), expr_const(0x41, 8))
            .unwrap();
        let read = Expression::read(&updates, expr_const(2, ARRAY_INDEX_BITS)).unwrap();

        let mut assignment = Assignment::new();
        assignment.set_array("a", vec![1, 2, 3, 4]);
        assignment.set_scalar("i", const_(2, ARRAY_INDEX_BITS));
        assert_eq!(assignment.evaluate(&read).unwrap(), const_(0x41, 8));
        assignment.set_scalar("i", const_(0, ARRAY_INDEX_BITS));
        assert_eq!(assignment.evaluate(&read).unwrap(), const_(3, 8));
    }

    #[test]
    fn restrict_fills_defaults() {
        let mut assignment = Assignment::new();
        assignment.set_array("a", vec![7]);
        let restricted = assignment.restrict(&[
            Symbol::Array(Array::new("a", 3)),
            Symbol::Scalar(scalar("x", 8)),
        ]);
        assert_eq!(restricted.array("a").unwrap(), &[7, 0, 0]);
        assert_eq!(restricted.scalar("x").unwrap(), &const_(0, 8));
    }
}
