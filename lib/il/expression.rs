use crate::il::*;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A harrier IL expression.
///
/// Expressions are bit-vectors. Comparisons evaluate to 1-bit expressions,
/// where `1` is true. Every constructor checks the sorts of its operands and
/// folds constant operands, so an expression built only from constants is
/// always an `Expression::Constant`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Expression {
    Scalar(Scalar),
    Constant(Constant),
    Read(UpdateList, Box<Expression>),

    Add(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
    Mul(Box<Expression>, Box<Expression>),
    Divu(Box<Expression>, Box<Expression>),
    Modu(Box<Expression>, Box<Expression>),
    Divs(Box<Expression>, Box<Expression>),
    Mods(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Xor(Box<Expression>, Box<Expression>),
    Shl(Box<Expression>, Box<Expression>),
    Shr(Box<Expression>, Box<Expression>),
    AShr(Box<Expression>, Box<Expression>),

    Cmpeq(Box<Expression>, Box<Expression>),
    Cmpneq(Box<Expression>, Box<Expression>),
    Cmplts(Box<Expression>, Box<Expression>),
    Cmpltu(Box<Expression>, Box<Expression>),

    Zext(usize, Box<Expression>),
    Sext(usize, Box<Expression>),
    Trun(usize, Box<Expression>),

    Ite(Box<Expression>, Box<Expression>, Box<Expression>),
}

impl Expression {
    /// Return the bit-sort of this expression.
    pub fn bits(&self) -> usize {
        match *self {
            Expression::Scalar(ref scalar) => scalar.bits(),
            Expression::Constant(ref constant) => constant.bits(),
            Expression::Read(_, _) => 8,
            Expression::Add(ref lhs, _)
            | Expression::Sub(ref lhs, _)
            | Expression::Mul(ref lhs, _)
            | Expression::Divu(ref lhs, _)
            | Expression::Modu(ref lhs, _)
            | Expression::Divs(ref lhs, _)
            | Expression::Mods(ref lhs, _)
            | Expression::And(ref lhs, _)
            | Expression::Or(ref lhs, _)
            | Expression::Xor(ref lhs, _)
            | Expression::Shl(ref lhs, _)
            | Expression::Shr(ref lhs, _)
            | Expression::AShr(ref lhs, _) => lhs.bits(),
            Expression::Cmpeq(_, _)
            | Expression::Cmpneq(_, _)
            | Expression::Cmplts(_, _)
            | Expression::Cmpltu(_, _) => 1,
            Expression::Zext(bits, _) | Expression::Sext(bits, _) | Expression::Trun(bits, _) => {
                bits
            }
            Expression::Ite(_, ref then, _) => then.bits(),
        }
    }

    /// Ensures the bits of both lhs and rhs are the same, and non-zero.
    fn ensure_sort(lhs: &Expression, rhs: &Expression) -> Result<(), Error> {
        if lhs.bits() != rhs.bits() || lhs.bits() == 0 {
            Err(Error::Sort)
        } else {
            Ok(())
        }
    }

    /// If this expression is a constant, return it.
    pub fn get_constant(&self) -> Option<&Constant> {
        match *self {
            Expression::Constant(ref constant) => Some(constant),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.get_constant().is_some()
    }

    /// True if this expression is the 1-bit constant `1`.
    pub fn is_true(&self) -> bool {
        self.get_constant()
            .map(|c| c.bits() == 1 && c.is_one())
            .unwrap_or(false)
    }

    /// True if this expression is the 1-bit constant `0`.
    pub fn is_false(&self) -> bool {
        self.get_constant()
            .map(|c| c.bits() == 1 && c.is_zero())
            .unwrap_or(false)
    }

    /// Visit this expression and every sub-expression, including the indices
    /// and values held in update lists.
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&Expression),
    {
        f(self);
        match *self {
            Expression::Scalar(_) | Expression::Constant(_) => {}
            Expression::Read(ref updates, ref index) => {
                for (i, v) in updates.iter() {
                    i.walk(f);
                    v.walk(f);
                }
                index.walk(f);
            }
            Expression::Add(ref lhs, ref rhs)
            | Expression::Sub(ref lhs, ref rhs)
            | Expression::Mul(ref lhs, ref rhs)
            | Expression::Divu(ref lhs, ref rhs)
            | Expression::Modu(ref lhs, ref rhs)
            | Expression::Divs(ref lhs, ref rhs)
            | Expression::Mods(ref lhs, ref rhs)
            | Expression::And(ref lhs, ref rhs)
            | Expression::Or(ref lhs, ref rhs)
            | Expression::Xor(ref lhs, ref rhs)
            | Expression::Shl(ref lhs, ref rhs)
            | Expression::Shr(ref lhs, ref rhs)
            | Expression::AShr(ref lhs, ref rhs)
            | Expression::Cmpeq(ref lhs, ref rhs)
            | Expression::Cmpneq(ref lhs, ref rhs)
            | Expression::Cmplts(ref lhs, ref rhs)
            | Expression::Cmpltu(ref lhs, ref rhs) => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expression::Zext(_, ref src)
            | Expression::Sext(_, ref src)
            | Expression::Trun(_, ref src) => src.walk(f),
            Expression::Ite(ref cond, ref then, ref else_) => {
                cond.walk(f);
                then.walk(f);
                else_.walk(f);
            }
        }
    }

    /// Returns all scalars used in the expression.
    pub fn collect_scalars(&self) -> Vec<&Scalar> {
        let mut scalars = Vec::new();
        self.collect_scalars_into(&mut scalars);
        scalars
    }

    fn collect_scalars_into<'e>(&'e self, scalars: &mut Vec<&'e Scalar>) {
        match *self {
            Expression::Scalar(ref scalar) => scalars.push(scalar),
            Expression::Constant(_) => {}
            Expression::Read(ref updates, ref index) => {
                for (i, v) in updates.iter() {
                    i.collect_scalars_into(scalars);
                    v.collect_scalars_into(scalars);
                }
                index.collect_scalars_into(scalars);
            }
            Expression::Add(ref lhs, ref rhs)
            | Expression::Sub(ref lhs, ref rhs)
            | Expression::Mul(ref lhs, ref rhs)
            | Expression::Divu(ref lhs, ref rhs)
            | Expression::Modu(ref lhs, ref rhs)
            | Expression::Divs(ref lhs, ref rhs)
            | Expression::Mods(ref lhs, ref rhs)
            | Expression::And(ref lhs, ref rhs)
            | Expression::Or(ref lhs, ref rhs)
            | Expression::Xor(ref lhs, ref rhs)
            | Expression::Shl(ref lhs, ref rhs)
            | Expression::Shr(ref lhs, ref rhs)
            | Expression::AShr(ref lhs, ref rhs)
            | Expression::Cmpeq(ref lhs, ref rhs)
            | Expression::Cmpneq(ref lhs, ref rhs)
            | Expression::Cmplts(ref lhs, ref rhs)
            | Expression::Cmpltu(ref lhs, ref rhs) => {
                lhs.collect_scalars_into(scalars);
                rhs.collect_scalars_into(scalars);
            }
            Expression::Zext(_, ref src)
            | Expression::Sext(_, ref src)
            | Expression::Trun(_, ref src) => src.collect_scalars_into(scalars),
            Expression::Ite(ref cond, ref then, ref else_) => {
                cond.collect_scalars_into(scalars);
                then.collect_scalars_into(scalars);
                else_.collect_scalars_into(scalars);
            }
        }
    }

    /// Returns the root arrays of every read in the expression.
    pub fn collect_arrays(&self) -> Vec<&Array> {
        let mut arrays = Vec::new();
        self.collect_arrays_into(&mut arrays);
        arrays
    }

    fn collect_arrays_into<'e>(&'e self, arrays: &mut Vec<&'e Array>) {
        match *self {
            Expression::Scalar(_) | Expression::Constant(_) => {}
            Expression::Read(ref updates, ref index) => {
                arrays.push(updates.root());
                for (i, v) in updates.iter() {
                    i.collect_arrays_into(arrays);
                    v.collect_arrays_into(arrays);
                }
                index.collect_arrays_into(arrays);
            }
            Expression::Add(ref lhs, ref rhs)
            | Expression::Sub(ref lhs, ref rhs)
            | Expression::Mul(ref lhs, ref rhs)
            | Expression::Divu(ref lhs, ref rhs)
            | Expression::Modu(ref lhs, ref rhs)
            | Expression::Divs(ref lhs, ref rhs)
            | Expression::Mods(ref lhs, ref rhs)
            | Expression::And(ref lhs, ref rhs)
            | Expression::Or(ref lhs, ref rhs)
            | Expression::Xor(ref lhs, ref rhs)
            | Expression::Shl(ref lhs, ref rhs)
            | Expression::Shr(ref lhs, ref rhs)
            | Expression::AShr(ref lhs, ref rhs)
            | Expression::Cmpeq(ref lhs, ref rhs)
            | Expression::Cmpneq(ref lhs, ref rhs)
            | Expression::Cmplts(ref lhs, ref rhs)
            | Expression::Cmpltu(ref lhs, ref rhs) => {
                lhs.collect_arrays_into(arrays);
                rhs.collect_arrays_into(arrays);
            }
            Expression::Zext(_, ref src)
            | Expression::Sext(_, ref src)
            | Expression::Trun(_, ref src) => src.collect_arrays_into(arrays),
            Expression::Ite(ref cond, ref then, ref else_) => {
                cond.collect_arrays_into(arrays);
                then.collect_arrays_into(arrays);
                else_.collect_arrays_into(arrays);
            }
        }
    }

    /// Returns every symbolic input this expression depends on.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .collect_scalars()
            .into_iter()
            .map(|scalar| Symbol::Scalar(scalar.clone()))
            .chain(
                self.collect_arrays()
                    .into_iter()
                    .filter(|array| array.is_symbolic())
                    .map(|array| Symbol::Array(array.clone())),
            )
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Create a new expression from a scalar.
    pub fn scalar(scalar: Scalar) -> Expression {
        Expression::Scalar(scalar)
    }

    /// Create a new expression from a constant.
    pub fn constant(constant: Constant) -> Expression {
        Expression::Constant(constant)
    }

    /// The 1-bit constant for `value`.
    pub fn bool(value: bool) -> Expression {
        Expression::Constant(Constant::new_bool(value))
    }

    fn fold<F>(lhs: &Expression, rhs: &Expression, f: F) -> Result<Option<Expression>, Error>
    where
        F: Fn(&Constant, &Constant) -> Result<Constant, Error>,
    {
        Ok(match (lhs.get_constant(), rhs.get_constant()) {
            (Some(l), Some(r)) => Some(f(l, r)?.into()),
            _ => None,
        })
    }

    /// Move a constant operand of a commutative operation to the right.
    fn commute(lhs: Expression, rhs: Expression) -> (Expression, Expression) {
        if lhs.is_constant() && !rhs.is_constant() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        }
    }

    /// Create an addition expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn add(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::add)? {
            return Ok(e);
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        if rhs.get_constant().map(|c| c.is_zero()).unwrap_or(false) {
            return Ok(lhs);
        }
        Ok(Expression::Add(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a subtraction expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn sub(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::sub)? {
            return Ok(e);
        }
        if rhs.get_constant().map(|c| c.is_zero()).unwrap_or(false) {
            return Ok(lhs);
        }
        if lhs == rhs {
            return Ok(expr_const(0, lhs.bits()));
        }
        Ok(Expression::Sub(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a multiplication expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn mul(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::mul)? {
            return Ok(e);
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        if let Some(c) = rhs.get_constant() {
            if c.is_zero() {
                return Ok(rhs);
            }
            if c.is_one() {
                return Ok(lhs);
            }
        }
        Ok(Expression::Mul(Box::new(lhs), Box::new(rhs)))
    }

    /// Create an unsigned division expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn divu(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::divu)? {
            return Ok(e);
        }
        Ok(Expression::Divu(Box::new(lhs), Box::new(rhs)))
    }

    /// Create an unsigned modulus expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn modu(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::modu)? {
            return Ok(e);
        }
        Ok(Expression::Modu(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a signed division expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn divs(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::divs)? {
            return Ok(e);
        }
        Ok(Expression::Divs(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a signed modulus expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn mods(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::mods)? {
            return Ok(e);
        }
        Ok(Expression::Mods(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a binary and expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn and(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::and)? {
            return Ok(e);
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        if let Some(c) = rhs.get_constant() {
            if c.is_zero() {
                return Ok(rhs);
            }
            if c.is_all_ones() {
                return Ok(lhs);
            }
        }
        if lhs == rhs {
            return Ok(lhs);
        }
        Ok(Expression::And(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a binary or expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn or(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::or)? {
            return Ok(e);
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        if let Some(c) = rhs.get_constant() {
            if c.is_zero() {
                return Ok(lhs);
            }
            if c.is_all_ones() {
                return Ok(rhs);
            }
        }
        if lhs == rhs {
            return Ok(lhs);
        }
        Ok(Expression::Or(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a binary xor expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn xor(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::xor)? {
            return Ok(e);
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        if rhs.get_constant().map(|c| c.is_zero()).unwrap_or(false) {
            return Ok(lhs);
        }
        if lhs == rhs {
            return Ok(expr_const(0, lhs.bits()));
        }
        Ok(Expression::Xor(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a logical shift-left expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn shl(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::shl)? {
            return Ok(e);
        }
        if let Some(c) = rhs.get_constant() {
            if c.is_zero() {
                return Ok(lhs);
            }
            if c.value() >= lhs.bits() as u64 {
                return Ok(expr_const(0, lhs.bits()));
            }
        }
        Ok(Expression::Shl(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a logical shift-right expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn shr(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::shr)? {
            return Ok(e);
        }
        if let Some(c) = rhs.get_constant() {
            if c.is_zero() {
                return Ok(lhs);
            }
            if c.value() >= lhs.bits() as u64 {
                return Ok(expr_const(0, lhs.bits()));
            }
        }
        Ok(Expression::Shr(Box::new(lhs), Box::new(rhs)))
    }

    /// Create an arithmetic shift-right expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn ashr(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::ashr)? {
            return Ok(e);
        }
        if rhs.get_constant().map(|c| c.is_zero()).unwrap_or(false) {
            return Ok(lhs);
        }
        Ok(Expression::AShr(Box::new(lhs), Box::new(rhs)))
    }

    /// Create an equals comparison expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn cmpeq(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::cmpeq)? {
            return Ok(e);
        }
        if lhs == rhs {
            return Ok(Expression::bool(true));
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        if lhs.bits() == 1 {
            if rhs.is_true() {
                return Ok(lhs);
            }
            if rhs.is_false() {
                return Expression::not(lhs);
            }
        }
        Ok(Expression::Cmpeq(Box::new(lhs), Box::new(rhs)))
    }

    /// Create an not equals comparison expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn cmpneq(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::cmpneq)? {
            return Ok(e);
        }
        if lhs == rhs {
            return Ok(Expression::bool(false));
        }
        let (lhs, rhs) = Expression::commute(lhs, rhs);
        Ok(Expression::Cmpneq(Box::new(lhs), Box::new(rhs)))
    }

    /// Create an unsigned less-than comparison expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn cmpltu(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::cmpltu)? {
            return Ok(e);
        }
        if lhs == rhs || rhs.get_constant().map(|c| c.is_zero()).unwrap_or(false) {
            return Ok(Expression::bool(false));
        }
        Ok(Expression::Cmpltu(Box::new(lhs), Box::new(rhs)))
    }

    /// Create a signed less-than comparison expression.
    /// # Error
    /// The sort of the lhs and the rhs are not the same.
    pub fn cmplts(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::ensure_sort(&lhs, &rhs)?;
        if let Some(e) = Expression::fold(&lhs, &rhs, Constant::cmplts)? {
            return Ok(e);
        }
        if lhs == rhs {
            return Ok(Expression::bool(false));
        }
        Ok(Expression::Cmplts(Box::new(lhs), Box::new(rhs)))
    }

    /// Unsigned less-than-or-equal, built from `cmpltu`.
    pub fn cmpleu(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::not(Expression::cmpltu(rhs, lhs)?)
    }

    /// Create an expression to zero-extend src to the number of bits specified
    /// in bits.
    /// # Error
    /// src has more bits than bits
    pub fn zext(bits: usize, src: Expression) -> Result<Expression, Error> {
        if src.bits() > bits || src.bits() == 0 || bits > MAX_BITS {
            return Err(Error::Sort);
        }
        if src.bits() == bits {
            return Ok(src);
        }
        if let Some(c) = src.get_constant() {
            return Ok(c.zext(bits)?.into());
        }
        Ok(Expression::Zext(bits, Box::new(src)))
    }

    /// Create an expression to sign-extend src to the number of bits specified
    /// # Error
    /// src has more bits than bits
    pub fn sext(bits: usize, src: Expression) -> Result<Expression, Error> {
        if src.bits() > bits || src.bits() == 0 || bits > MAX_BITS {
            return Err(Error::Sort);
        }
        if src.bits() == bits {
            return Ok(src);
        }
        if let Some(c) = src.get_constant() {
            return Ok(c.sext(bits)?.into());
        }
        Ok(Expression::Sext(bits, Box::new(src)))
    }

    /// Create an expression to truncate the number of bits in src to the number
    /// of bits given.
    /// # Error
    /// src has less bits than bits
    pub fn trun(bits: usize, src: Expression) -> Result<Expression, Error> {
        if src.bits() < bits || bits == 0 {
            return Err(Error::Sort);
        }
        if src.bits() == bits {
            return Ok(src);
        }
        if let Some(c) = src.get_constant() {
            return Ok(c.trun(bits)?.into());
        }
        if let Expression::Zext(_, ref inner) = src {
            if inner.bits() == bits {
                return Ok((**inner).clone());
            }
        }
        Ok(Expression::Trun(bits, Box::new(src)))
    }

    /// Create an if-then-else expression.
    /// # Error
    /// cond is not 1-bit, or then and else_ have different sorts.
    pub fn ite(cond: Expression, then: Expression, else_: Expression) -> Result<Expression, Error> {
        if cond.bits() != 1 {
            return Err(Error::Sort);
        }
        Expression::ensure_sort(&then, &else_)?;
        if let Some(c) = cond.get_constant() {
            return Ok(if c.is_one() { then } else { else_ });
        }
        if then == else_ {
            return Ok(then);
        }
        if then.bits() == 1 {
            if then.is_true() && else_.is_false() {
                return Ok(cond);
            }
            if then.is_false() && else_.is_true() {
                return Expression::not(cond);
            }
        }
        Ok(Expression::Ite(
            Box::new(cond),
            Box::new(then),
            Box::new(else_),
        ))
    }

    /// Read the byte at `index` through `updates`.
    ///
    /// See `UpdateList::read` for the folding applied.
    pub fn read(updates: &UpdateList, index: Expression) -> Result<Expression, Error> {
        updates.read(index)
    }

    /// Bitwise not. For 1-bit expressions this is boolean negation.
    pub fn not(src: Expression) -> Result<Expression, Error> {
        let bits = src.bits();
        if let Some(c) = src.get_constant() {
            return Ok(expr_const(!c.value(), bits));
        }
        let src = match src {
            Expression::Xor(lhs, rhs) => {
                if rhs.get_constant().map(|c| c.is_all_ones()).unwrap_or(false) {
                    return Ok(*lhs);
                }
                Expression::Xor(lhs, rhs)
            }
            Expression::Cmpeq(lhs, rhs) => return Ok(Expression::Cmpneq(lhs, rhs)),
            Expression::Cmpneq(lhs, rhs) => return Ok(Expression::Cmpeq(lhs, rhs)),
            src => src,
        };
        Ok(Expression::Xor(
            Box::new(src),
            Box::new(expr_const(u64::MAX, bits)),
        ))
    }

    /// Boolean conjunction of two 1-bit expressions.
    pub fn bool_and(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        if lhs.bits() != 1 {
            return Err(Error::Sort);
        }
        Expression::and(lhs, rhs)
    }

    /// Boolean disjunction of two 1-bit expressions.
    pub fn bool_or(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        if lhs.bits() != 1 {
            return Err(Error::Sort);
        }
        Expression::or(lhs, rhs)
    }

    /// The conjunction of every expression in `conditions`. Empty is true.
    pub fn conjunction<I>(conditions: I) -> Result<Expression, Error>
    where
        I: IntoIterator<Item = Expression>,
    {
        conditions
            .into_iter()
            .try_fold(Expression::bool(true), Expression::bool_and)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Expression::Scalar(ref s) => s.fmt(f),
            Expression::Constant(ref c) => c.fmt(f),
            Expression::Read(ref updates, ref index) => write!(f, "{}[{}]", updates, index),
            Expression::Add(ref lhs, ref rhs) => write!(f, "({} + {})", lhs, rhs),
            Expression::Sub(ref lhs, ref rhs) => write!(f, "({} - {})", lhs, rhs),
            Expression::Mul(ref lhs, ref rhs) => write!(f, "({} * {})", lhs, rhs),
            Expression::Divu(ref lhs, ref rhs) => write!(f, "({} /u {})", lhs, rhs),
            Expression::Modu(ref lhs, ref rhs) => write!(f, "({} %u {})", lhs, rhs),
            Expression::Divs(ref lhs, ref rhs) => write!(f, "({} /s {})", lhs, rhs),
            Expression::Mods(ref lhs, ref rhs) => write!(f, "({} %s {})", lhs, rhs),
            Expression::And(ref lhs, ref rhs) => write!(f, "({} & {})", lhs, rhs),
            Expression::Or(ref lhs, ref rhs) => write!(f, "({} | {})", lhs, rhs),
            Expression::Xor(ref lhs, ref rhs) => write!(f, "({} ^ {})", lhs, rhs),
            Expression::Shl(ref lhs, ref rhs) => write!(f, "({} << {})", lhs, rhs),
            Expression::Shr(ref lhs, ref rhs) => write!(f, "({} >> {})", lhs, rhs),
            Expression::AShr(ref lhs, ref rhs) => write!(f, "({} >>> {})", lhs, rhs),
            Expression::Cmpeq(ref lhs, ref rhs) => write!(f, "({} == {})", lhs, rhs),
            Expression::Cmpneq(ref lhs, ref rhs) => write!(f, "({} != {})", lhs, rhs),
            Expression::Cmplts(ref lhs, ref rhs) => write!(f, "({} <s {})", lhs, rhs),
            Expression::Cmpltu(ref lhs, ref rhs) => write!(f, "({} <u {})", lhs, rhs),
            Expression::Zext(bits, ref src) => write!(f, "zext.{}({})", bits, src),
            Expression::Sext(bits, ref src) => write!(f, "sext.{}({})", bits, src),
            Expression::Trun(bits, ref src) => write!(f, "trun.{}({})", bits, src),
            Expression::Ite(ref cond, ref then, ref else_) => {
                write!(f, "ite({}, {}, {})", cond, then, else_)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::il::*;

    #[test]
    fn constants_fold() {
        let e = Expression::add(expr_const(1, 32), expr_const(2, 32)).unwrap();
        assert_eq!(e, expr_const(3, 32));
        let e = Expression::cmpltu(expr_const(1, 32), expr_const(2, 32)).unwrap();
        assert!(e.is_true());
    }

    #[test]
    fn sort_checked() {
        assert!(Expression::add(expr_const(1, 32), expr_scalar("x", 8)).is_err());
        assert!(Expression::ite(expr_scalar("c", 8), expr_const(1, 8), expr_const(2, 8)).is_err());
        assert!(Expression::trun(16, expr_scalar("x", 8)).is_err());
    }

    #[test]
    fn identities() {
        let x = expr_scalar("x", 32);
        assert_eq!(Expression::add(x.clone(), expr_const(0, 32)).unwrap(), x);
        assert_eq!(
            Expression::add(expr_const(0, 32), x.clone()).unwrap(),
            x
        );
        assert_eq!(
            Expression::xor(x.clone(), x.clone()).unwrap(),
            expr_const(0, 32)
        );
        assert!(Expression::cmpeq(x.clone(), x.clone()).unwrap().is_true());
        let z = Expression::zext(64, x.clone()).unwrap();
        assert_eq!(Expression::trun(32, z).unwrap(), x);
    }

    #[test]
    fn negation() {
        let x = expr_scalar("x", 32);
        let eq = Expression::cmpeq(x.clone(), expr_const(10, 32)).unwrap();
        let neq = Expression::not(eq.clone()).unwrap();
        assert_eq!(
            neq,
            Expression::cmpneq(x.clone(), expr_const(10, 32)).unwrap()
        );
        assert_eq!(Expression::not(neq).unwrap(), eq);

        let p = expr_scalar("p", 1);
        assert_eq!(Expression::not(Expression::not(p.clone()).unwrap()).unwrap(), p);
    }

    #[test]
    fn ite_folds() {
        let p = expr_scalar("p", 1);
        let x = expr_scalar("x", 8);
        assert_eq!(
            Expression::ite(Expression::bool(true), x.clone(), expr_const(1, 8)).unwrap(),
            x
        );
        assert_eq!(
            Expression::ite(p.clone(), x.clone(), x.clone()).unwrap(),
            x
        );
        assert_eq!(
            Expression::ite(p.clone(), Expression::bool(true), Expression::bool(false)).unwrap(),
            p
        );
    }

    #[test]
    fn symbols() {
        let a = Array::new("a", 4);
        let read = Expression::read(&UpdateList::new(a.clone()), expr_scalar("i", 32)).unwrap();
        let e = Expression::add(Expression::zext(32, read).unwrap(), expr_scalar("x", 32)).unwrap();
        let symbols = e.symbols();
        assert_eq!(symbols.len(), 3);
        assert!(symbols.contains(&Symbol::Array(a)));
        assert!(symbols.contains(&Symbol::Scalar(scalar("x", 32))));
    }
}
