//! An in-process backend which bit-blasts queries into CNF.
//!
//! Every expression is translated into a vector of literals, least
//! significant bit first, with Tseitin-style definitions for each gate.
//! Definitions only ever constrain fresh variables, so they are kept in the
//! SAT solver across queries. The constraints and expression of a query are
//! then passed as assumptions. A path whose constraint set grows by one
//! constraint per fork re-encodes only the new constraint.

use crate::il::{self, Array, Assignment, Expression, Symbol, UpdateList};
use crate::solver::sat::{Lit, SatResult, SatSolver};
use crate::solver::{Query, SolverBackend, SolverFault, SolverResponse, SolverStatistics};
use crate::Error;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Start over with a fresh SAT instance past this many variables.
const MAX_VARIABLES: usize = 4_000_000;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Gate {
    And,
    Xor,
}

/// Translates expressions into clauses over a `SatSolver`.
struct Blaster {
    sat: SatSolver,
    true_lit: Lit,
    gates: FxHashMap<(Gate, Lit, Lit), Lit>,
    expressions: FxHashMap<Expression, Vec<Lit>>,
    scalars: FxHashMap<String, Vec<Lit>>,
    arrays: FxHashMap<String, Vec<Vec<Lit>>>,
}

impl Blaster {
    fn new() -> Blaster {
        let mut sat = SatSolver::new();
        let true_lit = Lit::positive(sat.new_var());
        sat.add_clause(&[true_lit]);
        Blaster {
            sat,
            true_lit,
            gates: FxHashMap::default(),
            expressions: FxHashMap::default(),
            scalars: FxHashMap::default(),
            arrays: FxHashMap::default(),
        }
    }

    fn t(&self) -> Lit {
        self.true_lit
    }

    fn f(&self) -> Lit {
        !self.true_lit
    }

    fn constant_lit(&self, value: bool) -> Lit {
        if value {
            self.t()
        } else {
            self.f()
        }
    }

    fn fresh(&mut self) -> Lit {
        Lit::positive(self.sat.new_var())
    }

    fn and(&mut self, a: Lit, b: Lit) -> Lit {
        if a == self.f() || b == self.f() || a == !b {
            return self.f();
        }
        if a == self.t() || a == b {
            return b;
        }
        if b == self.t() {
            return a;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        if let Some(gate) = self.gates.get(&(Gate::And, a, b)) {
            return *gate;
        }
        let g = self.fresh();
        self.sat.add_clause(&[!g, a]);
        self.sat.add_clause(&[!g, b]);
        self.sat.add_clause(&[g, !a, !b]);
        self.gates.insert((Gate::And, a, b), g);
        g
    }

    fn or(&mut self, a: Lit, b: Lit) -> Lit {
        !self.and(!a, !b)
    }

    fn xor(&mut self, a: Lit, b: Lit) -> Lit {
        if a == self.f() {
            return b;
        }
        if b == self.f() {
            return a;
        }
        if a == self.t() {
            return !b;
        }
        if b == self.t() {
            return !a;
        }
        if a == b {
            return self.f();
        }
        if a == !b {
            return self.t();
        }
        // xor(!a, b) == !xor(a, b)
        let flip = a.is_negative() != b.is_negative();
        let a = if a.is_negative() { !a } else { a };
        let b = if b.is_negative() { !b } else { b };
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let g = match self.gates.get(&(Gate::Xor, a, b)) {
            Some(gate) => *gate,
            None => {
                let g = self.fresh();
                self.sat.add_clause(&[!g, a, b]);
                self.sat.add_clause(&[!g, !a, !b]);
                self.sat.add_clause(&[g, !a, b]);
                self.sat.add_clause(&[g, a, !b]);
                self.gates.insert((Gate::Xor, a, b), g);
                g
            }
        };
        if flip {
            !g
        } else {
            g
        }
    }

    fn ite(&mut self, c: Lit, t: Lit, e: Lit) -> Lit {
        if c == self.t() || t == e {
            return t;
        }
        if c == self.f() {
            return e;
        }
        let then = self.and(c, t);
        let else_ = self.and(!c, e);
        self.or(then, else_)
    }

    fn constant(&self, value: u64, bits: usize) -> Vec<Lit> {
        (0..bits)
            .map(|i| self.constant_lit(i < 64 && (value >> i) & 1 == 1))
            .collect()
    }

    /// The value of `bits` if every literal is constant.
    fn constant_value(&self, bits: &[Lit]) -> Option<u64> {
        let mut value = 0;
        for (i, bit) in bits.iter().enumerate() {
            if *bit == self.t() {
                if i < 64 {
                    value |= 1 << i;
                }
            } else if *bit != self.f() {
                return None;
            }
        }
        Some(value)
    }

    fn not_vec(&self, a: &[Lit]) -> Vec<Lit> {
        a.iter().map(|lit| !*lit).collect()
    }

    fn and_vec(&mut self, a: &[Lit], b: &[Lit]) -> Vec<Lit> {
        a.iter().zip(b).map(|(a, b)| self.and(*a, *b)).collect()
    }

    fn or_vec(&mut self, a: &[Lit], b: &[Lit]) -> Vec<Lit> {
        a.iter().zip(b).map(|(a, b)| self.or(*a, *b)).collect()
    }

    fn xor_vec(&mut self, a: &[Lit], b: &[Lit]) -> Vec<Lit> {
        a.iter().zip(b).map(|(a, b)| self.xor(*a, *b)).collect()
    }

    fn ite_vec(&mut self, c: Lit, t: &[Lit], e: &[Lit]) -> Vec<Lit> {
        t.iter().zip(e).map(|(t, e)| self.ite(c, *t, *e)).collect()
    }

    fn add_with_carry(&mut self, a: &[Lit], b: &[Lit], mut carry: Lit) -> Vec<Lit> {
        let mut sum = Vec::with_capacity(a.len());
        for (a, b) in a.iter().zip(b) {
            let partial = self.xor(*a, *b);
            sum.push(self.xor(partial, carry));
            let generate = self.and(*a, *b);
            let propagate = self.and(partial, carry);
            carry = self.or(generate, propagate);
        }
        sum
    }

    fn add(&mut self, a: &[Lit], b: &[Lit]) -> Vec<Lit> {
        let f = self.f();
        self.add_with_carry(a, b, f)
    }

    fn sub(&mut self, a: &[Lit], b: &[Lit]) -> Vec<Lit> {
        let not_b = self.not_vec(b);
        let t = self.t();
        self.add_with_carry(a, &not_b, t)
    }

    fn neg(&mut self, a: &[Lit]) -> Vec<Lit> {
        let zero = self.constant(0, a.len());
        self.sub(&zero, a)
    }

    fn mul(&mut self, a: &[Lit], b: &[Lit]) -> Vec<Lit> {
        let bits = a.len();
        let mut product = self.constant(0, bits);
        for i in 0..bits {
            if b[i] == self.f() {
                continue;
            }
            let mut partial = self.constant(0, i);
            for j in 0..bits - i {
                let bit = self.and(a[j], b[i]);
                partial.push(bit);
            }
            product = self.add(&product, &partial);
        }
        product
    }

    fn eq(&mut self, a: &[Lit], b: &[Lit]) -> Lit {
        let mut result = self.t();
        for (a, b) in a.iter().zip(b) {
            let differ = self.xor(*a, *b);
            result = self.and(result, !differ);
        }
        result
    }

    fn ult(&mut self, a: &[Lit], b: &[Lit]) -> Lit {
        let mut less = self.f();
        for (a, b) in a.iter().zip(b) {
            let strictly = self.and(!*a, *b);
            let differ = self.xor(*a, *b);
            let carried = self.and(!differ, less);
            less = self.or(strictly, carried);
        }
        less
    }

    fn slt(&mut self, a: &[Lit], b: &[Lit]) -> Lit {
        let mut a = a.to_vec();
        let mut b = b.to_vec();
        if let Some(msb) = a.last_mut() {
            *msb = !*msb;
        }
        if let Some(msb) = b.last_mut() {
            *msb = !*msb;
        }
        self.ult(&a, &b)
    }

    /// Restoring division. A zero divisor yields an all-ones quotient and
    /// the dividend as remainder.
    fn udivrem(&mut self, a: &[Lit], b: &[Lit]) -> (Vec<Lit>, Vec<Lit>) {
        let bits = a.len();
        let f = self.f();
        let mut quotient = vec![f; bits];
        let mut remainder = self.constant(0, bits);
        let mut divisor = b.to_vec();
        divisor.push(f);
        for i in (0..bits).rev() {
            let mut shifted = vec![a[i]];
            shifted.extend_from_slice(&remainder);
            let less = self.ult(&shifted, &divisor);
            let difference = self.sub(&shifted, &divisor);
            let next = self.ite_vec(less, &shifted, &difference);
            remainder = next[..bits].to_vec();
            quotient[i] = !less;
        }
        (quotient, remainder)
    }

    fn sdivrem(&mut self, a: &[Lit], b: &[Lit]) -> (Vec<Lit>, Vec<Lit>) {
        let f = self.f();
        let a_negative = a.last().copied().unwrap_or(f);
        let b_negative = b.last().copied().unwrap_or(f);
        let negated_a = self.neg(a);
        let negated_b = self.neg(b);
        let abs_a = self.ite_vec(a_negative, &negated_a, a);
        let abs_b = self.ite_vec(b_negative, &negated_b, b);
        let (quotient, remainder) = self.udivrem(&abs_a, &abs_b);
        let negated_quotient = self.neg(&quotient);
        let negated_remainder = self.neg(&remainder);
        let signs_differ = self.xor(a_negative, b_negative);
        (
            self.ite_vec(signs_differ, &negated_quotient, &quotient),
            self.ite_vec(a_negative, &negated_remainder, &remainder),
        )
    }

    /// A barrel shifter. `fill` is shifted in, and any shift amount of at
    /// least the width yields all `fill`.
    fn shift(&mut self, a: &[Lit], amount: &[Lit], left: bool, fill: Lit) -> Vec<Lit> {
        let bits = a.len();
        let mut result = a.to_vec();
        let mut overflow = self.f();
        for (stage, bit) in amount.iter().enumerate() {
            let distance = if stage < 63 { 1usize << stage } else { usize::MAX };
            if distance >= bits {
                overflow = self.or(overflow, *bit);
                continue;
            }
            let shifted: Vec<Lit> = (0..bits)
                .map(|i| {
                    if left {
                        if i >= distance {
                            result[i - distance]
                        } else {
                            fill
                        }
                    } else if i + distance < bits {
                        result[i + distance]
                    } else {
                        fill
                    }
                })
                .collect();
            result = self.ite_vec(*bit, &shifted, &result);
        }
        let filled = vec![fill; bits];
        self.ite_vec(overflow, &filled, &result)
    }

    fn scalar(&mut self, name: &str, bits: usize) -> Result<Vec<Lit>, Error> {
        if let Some(lits) = self.scalars.get(name) {
            if lits.len() != bits {
                return Err(Error::Sort);
            }
            return Ok(lits.clone());
        }
        let lits: Vec<Lit> = (0..bits).map(|_| self.fresh()).collect();
        self.scalars.insert(name.to_string(), lits.clone());
        Ok(lits)
    }

    fn array_byte(&mut self, array: &Array, index: u64) -> Result<Vec<Lit>, Error> {
        if let Some(contents) = array.contents() {
            let byte = contents.get(index as usize).copied().unwrap_or(0);
            return Ok(self.constant(byte as u64, 8));
        }
        if !self.arrays.contains_key(array.name()) {
            let bytes: Vec<Vec<Lit>> = (0..array.size())
                .map(|_| (0..8).map(|_| self.fresh()).collect())
                .collect();
            self.arrays.insert(array.name().to_string(), bytes);
        }
        Ok(self
            .arrays
            .get(array.name())
            .and_then(|bytes| bytes.get(index as usize))
            .cloned()
            .unwrap_or_else(|| self.constant(0, 8)))
    }

    fn read(&mut self, updates: &UpdateList, index: &[Lit]) -> Result<Vec<Lit>, Error> {
        let root = updates.root();
        let mut value = match self.constant_value(index) {
            Some(index) => self.array_byte(root, index)?,
            None => {
                let mut value = self.constant(0, 8);
                for i in 0..root.size() {
                    let byte = self.array_byte(root, i)?;
                    let here = self.constant(i, index.len());
                    let hit = self.eq(index, &here);
                    value = self.ite_vec(hit, &byte, &value);
                }
                value
            }
        };
        let writes: Vec<(&Expression, &Expression)> = updates.iter().collect();
        for (write_index, write_value) in writes.into_iter().rev() {
            let write_index = self.encode(write_index)?;
            let write_value = self.encode(write_value)?;
            let hit = self.eq(index, &write_index);
            value = self.ite_vec(hit, &write_value, &value);
        }
        Ok(value)
    }

    fn encode(&mut self, expression: &Expression) -> Result<Vec<Lit>, Error> {
        if let Some(lits) = self.expressions.get(expression) {
            return Ok(lits.clone());
        }
        let lits = match *expression {
            Expression::Scalar(ref scalar) => self.scalar(scalar.name(), scalar.bits())?,
            Expression::Constant(ref constant) => self.constant(constant.value(), constant.bits()),
            Expression::Read(ref updates, ref index) => {
                let index = self.encode(index)?;
                self.read(updates, &index)?
            }
            Expression::Add(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.add(&lhs, &rhs)
            }
            Expression::Sub(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.sub(&lhs, &rhs)
            }
            Expression::Mul(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.mul(&lhs, &rhs)
            }
            Expression::Divu(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.udivrem(&lhs, &rhs).0
            }
            Expression::Modu(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.udivrem(&lhs, &rhs).1
            }
            Expression::Divs(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.sdivrem(&lhs, &rhs).0
            }
            Expression::Mods(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.sdivrem(&lhs, &rhs).1
            }
            Expression::And(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.and_vec(&lhs, &rhs)
            }
            Expression::Or(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.or_vec(&lhs, &rhs)
            }
            Expression::Xor(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                self.xor_vec(&lhs, &rhs)
            }
            Expression::Shl(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                let f = self.f();
                self.shift(&lhs, &rhs, true, f)
            }
            Expression::Shr(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                let f = self.f();
                self.shift(&lhs, &rhs, false, f)
            }
            Expression::AShr(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                let sign = lhs.last().copied().unwrap_or_else(|| self.f());
                self.shift(&lhs, &rhs, false, sign)
            }
            Expression::Cmpeq(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                vec![self.eq(&lhs, &rhs)]
            }
            Expression::Cmpneq(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                vec![!self.eq(&lhs, &rhs)]
            }
            Expression::Cmpltu(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                vec![self.ult(&lhs, &rhs)]
            }
            Expression::Cmplts(ref lhs, ref rhs) => {
                let (lhs, rhs) = (self.encode(lhs)?, self.encode(rhs)?);
                vec![self.slt(&lhs, &rhs)]
            }
            Expression::Zext(bits, ref src) => {
                let mut src = self.encode(src)?;
                let f = self.f();
                src.resize(bits, f);
                src
            }
            Expression::Sext(bits, ref src) => {
                let mut src = self.encode(src)?;
                let sign = src.last().copied().unwrap_or_else(|| self.f());
                src.resize(bits, sign);
                src
            }
            Expression::Trun(bits, ref src) => {
                let mut src = self.encode(src)?;
                src.truncate(bits);
                src
            }
            Expression::Ite(ref cond, ref then, ref else_) => {
                let cond = self.encode(cond)?;
                let (then, else_) = (self.encode(then)?, self.encode(else_)?);
                self.ite_vec(cond[0], &then, &else_)
            }
        };
        if lits.len() != expression.bits() {
            return Err(Error::Sort);
        }
        self.expressions.insert(expression.clone(), lits.clone());
        Ok(lits)
    }

    fn encode_bool(&mut self, expression: &Expression) -> Result<Lit, Error> {
        let lits = self.encode(expression)?;
        match lits.as_slice() {
            [lit] => Ok(*lit),
            _ => Err(Error::Sort),
        }
    }

    fn value_of(&self, lits: &[Lit]) -> u64 {
        lits.iter()
            .enumerate()
            .filter(|(i, lit)| *i < 64 && self.sat.model_value(**lit))
            .fold(0, |value, (i, _)| value | 1 << i)
    }

    /// Read the model of the last satisfiable solve for `symbols`.
    fn model(&self, symbols: &[Symbol]) -> Assignment {
        let mut assignment = Assignment::new();
        for symbol in symbols {
            match *symbol {
                Symbol::Scalar(ref scalar) => {
                    if let Some(lits) = self.scalars.get(scalar.name()) {
                        assignment.set_scalar(
                            scalar.name(),
                            il::const_(self.value_of(lits), scalar.bits()),
                        );
                    }
                }
                Symbol::Array(ref array) => {
                    if let Some(bytes) = self.arrays.get(array.name()) {
                        let bytes = bytes.iter().map(|byte| self.value_of(byte) as u8).collect();
                        assignment.set_array(array.name(), bytes);
                    }
                }
            }
        }
        assignment
    }
}

/// The in-process bit-blasting backend.
pub struct BitblastSolver {
    blaster: Mutex<Blaster>,
    queries: AtomicU64,
}

impl BitblastSolver {
    pub fn new() -> BitblastSolver {
        BitblastSolver {
            blaster: Mutex::new(Blaster::new()),
            queries: AtomicU64::new(0),
        }
    }
}

impl Default for BitblastSolver {
    fn default() -> BitblastSolver {
        BitblastSolver::new()
    }
}

impl SolverBackend for BitblastSolver {
    fn name(&self) -> String {
        "bitblast".to_string()
    }

    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        query.ensure_boolean()?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        let mut blaster = self
            .blaster
            .lock()
            .map_err(|_| SolverFault::Unavailable("bit-blaster lock poisoned".to_string()))?;

        if blaster.sat.num_vars() > MAX_VARIABLES || !blaster.sat.is_ok() {
            debug!(
                "resetting bit-blaster after {} variables",
                blaster.sat.num_vars()
            );
            *blaster = Blaster::new();
        }

        let mut assumptions = Vec::with_capacity(query.constraints().len() + 1);
        for expression in query.expressions() {
            let lit = blaster.encode_bool(expression)?;
            if lit == blaster.f() {
                return Ok(SolverResponse::Unsat);
            }
            if lit != blaster.t() {
                assumptions.push(lit);
            }
        }
        assumptions.sort();
        assumptions.dedup();

        let result = blaster.sat.solve(&assumptions, deadline);
        trace!(
            "bitblast: {} assumptions, {} variables, {} clauses, {:?}",
            assumptions.len(),
            blaster.sat.num_vars(),
            blaster.sat.num_clauses(),
            result
        );
        Ok(match result {
            SatResult::Sat => SolverResponse::Sat(blaster.model(&query.symbols())),
            SatResult::Unsat => SolverResponse::Unsat,
            SatResult::Unknown => SolverResponse::Unknown,
        })
    }

    fn statistics(&self) -> SolverStatistics {
        SolverStatistics {
            core_queries: self.queries.load(Ordering::Relaxed),
            ..SolverStatistics::default()
        }
    }
}
