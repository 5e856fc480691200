//! An external SMT solver, driven over SMT-LIB2 on its standard streams.
//!
//! The solver process is started on the first query and kept alive. Path
//! constraints are asserted one scope each, so consecutive queries along the
//! same path only pop back to the longest common prefix of their constraints
//! and push what is new.

use crate::il::{self, Assignment, Expression, Symbol, UpdateList, ARRAY_INDEX_BITS};
use crate::solver::{Query, SolverBackend, SolverFault, SolverResponse, SolverStatistics};
use crate::state::chain_fingerprint;
use crate::Error;
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// The `:timeout` which stands for no timeout.
const NO_TIMEOUT: u64 = u32::MAX as u64;

fn constant_to_smtlib2(value: u64, bits: usize) -> String {
    if bits % 4 == 0 {
        format!("#x{:01$x}", value, bits / 4)
    } else {
        format!("#b{:01$b}", value, bits)
    }
}

fn quote(name: &str) -> String {
    format!("|{}|", name.replace(['|', '\\'], "_"))
}

fn declaration(symbol: &Symbol) -> String {
    match *symbol {
        Symbol::Scalar(ref scalar) => format!(
            "(declare-fun {} () (_ BitVec {}))",
            quote(scalar.name()),
            scalar.bits()
        ),
        Symbol::Array(ref array) => format!(
            "(declare-fun {} () (Array (_ BitVec {}) (_ BitVec 8)))",
            quote(array.name()),
            ARRAY_INDEX_BITS
        ),
    }
}

fn read_to_smtlib2(updates: &UpdateList, index: &Expression) -> String {
    let index = expression_to_smtlib2(index);
    let root = updates.root();
    let mut value = match root.contents() {
        Some(contents) => {
            let mut array = format!(
                "((as const (Array (_ BitVec {}) (_ BitVec 8))) #x00)",
                ARRAY_INDEX_BITS
            );
            for (offset, byte) in contents.iter().enumerate().filter(|(_, byte)| **byte != 0) {
                array = format!(
                    "(store {} {} {})",
                    array,
                    constant_to_smtlib2(offset as u64, ARRAY_INDEX_BITS),
                    constant_to_smtlib2(*byte as u64, 8)
                );
            }
            format!("(select {} {})", array, index)
        }
        // Bytes past the end of a symbolic array read as zero.
        None if root.size() <= il::mask(ARRAY_INDEX_BITS) => format!(
            "(ite (bvult {} {}) (select {} {}) #x00)",
            index,
            constant_to_smtlib2(root.size(), ARRAY_INDEX_BITS),
            quote(root.name()),
            index
        ),
        None => format!("(select {} {})", quote(root.name()), index),
    };
    let writes: Vec<(&Expression, &Expression)> = updates.iter().collect();
    for (write_index, write_value) in writes.into_iter().rev() {
        value = format!(
            "(ite (= {} {}) {} {})",
            index,
            expression_to_smtlib2(write_index),
            expression_to_smtlib2(write_value),
            value
        );
    }
    value
}

/// Convert an expression to its `smtlib2` equivalent.
pub fn expression_to_smtlib2(expression: &Expression) -> String {
    let binary = |op: &str, lhs: &Expression, rhs: &Expression| {
        format!(
            "({} {} {})",
            op,
            expression_to_smtlib2(lhs),
            expression_to_smtlib2(rhs)
        )
    };
    let predicate = |op: &str, lhs: &Expression, rhs: &Expression| {
        format!("(ite {} #b1 #b0)", binary(op, lhs, rhs))
    };
    match *expression {
        Expression::Constant(ref c) => constant_to_smtlib2(c.value(), c.bits()),
        Expression::Scalar(ref s) => quote(s.name()),
        Expression::Read(ref updates, ref index) => read_to_smtlib2(updates, index),
        Expression::Add(ref lhs, ref rhs) => binary("bvadd", lhs, rhs),
        Expression::Sub(ref lhs, ref rhs) => binary("bvsub", lhs, rhs),
        Expression::Mul(ref lhs, ref rhs) => binary("bvmul", lhs, rhs),
        Expression::Divu(ref lhs, ref rhs) => binary("bvudiv", lhs, rhs),
        Expression::Modu(ref lhs, ref rhs) => binary("bvurem", lhs, rhs),
        Expression::Divs(ref lhs, ref rhs) => binary("bvsdiv", lhs, rhs),
        Expression::Mods(ref lhs, ref rhs) => binary("bvsrem", lhs, rhs),
        Expression::And(ref lhs, ref rhs) => binary("bvand", lhs, rhs),
        Expression::Or(ref lhs, ref rhs) => binary("bvor", lhs, rhs),
        Expression::Xor(ref lhs, ref rhs) => binary("bvxor", lhs, rhs),
        Expression::Shl(ref lhs, ref rhs) => binary("bvshl", lhs, rhs),
        Expression::Shr(ref lhs, ref rhs) => binary("bvlshr", lhs, rhs),
        Expression::AShr(ref lhs, ref rhs) => binary("bvashr", lhs, rhs),
        Expression::Cmpeq(ref lhs, ref rhs) => predicate("=", lhs, rhs),
        Expression::Cmpneq(ref lhs, ref rhs) => predicate("distinct", lhs, rhs),
        Expression::Cmplts(ref lhs, ref rhs) => predicate("bvslt", lhs, rhs),
        Expression::Cmpltu(ref lhs, ref rhs) => predicate("bvult", lhs, rhs),
        Expression::Zext(bits, ref src) if bits == src.bits() => expression_to_smtlib2(src),
        Expression::Zext(bits, ref src) => format!(
            "(concat (_ bv0 {}) {})",
            bits - src.bits(),
            expression_to_smtlib2(src)
        ),
        Expression::Sext(bits, ref src) => format!(
            "((_ sign_extend {}) {})",
            bits - src.bits(),
            expression_to_smtlib2(src)
        ),
        Expression::Trun(bits, ref src) => {
            format!("((_ extract {} 0) {})", bits - 1, expression_to_smtlib2(src))
        }
        Expression::Ite(ref cond, ref then, ref else_) => format!(
            "(ite (= #b1 {}) {} {})",
            expression_to_smtlib2(cond),
            expression_to_smtlib2(then),
            expression_to_smtlib2(else_)
        ),
    }
}

/// An s-expression read back from the solver.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Sexp::Atom(ref atom) => write!(f, "{}", atom),
            Sexp::List(ref list) => {
                write!(f, "(")?;
                for (i, sexp) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", sexp)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Split `text` into tokens, or `None` if a quoted token is still open.
fn tokenize(text: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => tokens.push(c.to_string()),
            c if c.is_whitespace() => {}
            '|' | '"' => {
                let mut token = c.to_string();
                loop {
                    let next = chars.next()?;
                    token.push(next);
                    if next == c {
                        break;
                    }
                }
                tokens.push(token);
            }
            c => {
                let mut token = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    token.push(next);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }
    Some(tokens)
}

fn parse_tokens(tokens: &[String], position: &mut usize) -> Result<Option<Sexp>, Error> {
    let token = match tokens.get(*position) {
        Some(token) => token,
        None => return Ok(None),
    };
    *position += 1;
    match token.as_str() {
        "(" => {
            let mut list = Vec::new();
            loop {
                match tokens.get(*position).map(|token| token.as_str()) {
                    None => return Ok(None),
                    Some(")") => {
                        *position += 1;
                        return Ok(Some(Sexp::List(list)));
                    }
                    Some(_) => match parse_tokens(tokens, position)? {
                        Some(sexp) => list.push(sexp),
                        None => return Ok(None),
                    },
                }
            }
        }
        ")" => Err(SolverFault::Protocol("unbalanced ')' from solver".to_string()).into()),
        atom => Ok(Some(Sexp::Atom(atom.to_string()))),
    }
}

/// Parse the first s-expression of `text`, or `None` if it is incomplete.
fn parse(text: &str) -> Result<Option<Sexp>, Error> {
    let tokens = match tokenize(text) {
        Some(tokens) => tokens,
        None => return Ok(None),
    };
    parse_tokens(&tokens, &mut 0)
}

/// The value of a bit-vector literal.
fn parse_value(sexp: &Sexp) -> Result<u64, Error> {
    match *sexp {
        Sexp::Atom(ref atom) if atom.starts_with("#x") => Ok(u64::from_str_radix(&atom[2..], 16)?),
        Sexp::Atom(ref atom) if atom.starts_with("#b") => Ok(u64::from_str_radix(&atom[2..], 2)?),
        Sexp::List(ref list) if list.len() == 3 && list[0] == Sexp::Atom("_".to_string()) => {
            match list[1] {
                Sexp::Atom(ref bv) if bv.starts_with("bv") => Ok(bv[2..].parse::<u64>()?),
                _ => Err(SolverFault::Protocol(format!("not a bit-vector value: {}", sexp)).into()),
            }
        }
        _ => Err(SolverFault::Protocol(format!("not a bit-vector value: {}", sexp)).into()),
    }
}

fn broken(error: std::io::Error) -> Error {
    SolverFault::Unavailable(format!("lost the solver process: {}", error)).into()
}

/// A running solver process and the scopes asserted in it.
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// The fingerprint of the constraints up to each open scope.
    scopes: Vec<u64>,
    /// The scope each declared symbol was declared in.
    declared: FxHashMap<String, usize>,
    timeout_ms: u64,
}

impl Session {
    fn spawn(program: &str, args: &[String]) -> Result<Session, Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SolverFault::Unavailable(format!("could not start {}: {}", program, e)))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                return Err(SolverFault::Unavailable(format!(
                    "no standard streams for {}",
                    program
                ))
                .into());
            }
        };
        debug!("started solver process {} {:?}", program, args);

        let mut session = Session {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            scopes: Vec::new(),
            declared: FxHashMap::default(),
            timeout_ms: NO_TIMEOUT,
        };
        session.send("(set-option :produce-models true)")?;
        session.send("(set-logic QF_AUFBV)")?;
        Ok(session)
    }

    fn send(&mut self, command: &str) -> Result<(), Error> {
        trace!("smtlib2 <- {}", command);
        writeln!(self.stdin, "{}", command).map_err(broken)
    }

    fn receive(&mut self) -> Result<Sexp, Error> {
        self.stdin.flush().map_err(broken)?;
        let mut text = String::new();
        loop {
            if self.stdout.read_line(&mut text).map_err(broken)? == 0 {
                return Err(SolverFault::Unavailable("solver closed its output".to_string()).into());
            }
            if let Some(sexp) = parse(&text)? {
                trace!("smtlib2 -> {}", sexp);
                if let Sexp::List(ref list) = sexp {
                    if list.first() == Some(&Sexp::Atom("error".to_string())) {
                        return Err(SolverFault::Protocol(sexp.to_string()).into());
                    }
                }
                return Ok(sexp);
            }
        }
    }

    /// Close scopes until only `level` remain open.
    fn pop_to(&mut self, level: usize) -> Result<(), Error> {
        if self.scopes.len() > level {
            self.send(&format!("(pop {})", self.scopes.len() - level))?;
            self.scopes.truncate(level);
            self.declared.retain(|_, declared| *declared <= level);
        }
        Ok(())
    }

    /// Open a scope asserting `expression`, declaring the symbols it needs.
    fn push(&mut self, fingerprint: u64, expression: &Expression) -> Result<(), Error> {
        self.send("(push 1)")?;
        self.scopes.push(fingerprint);
        let level = self.scopes.len();
        for symbol in expression.symbols() {
            if !self.declared.contains_key(symbol.name()) {
                self.send(&declaration(&symbol))?;
                self.declared.insert(symbol.name().to_string(), level);
            }
        }
        self.send(&format!(
            "(assert (= #b1 {}))",
            expression_to_smtlib2(expression)
        ))
    }

    fn model(&mut self, symbols: &[Symbol]) -> Result<Assignment, Error> {
        let mut terms = Vec::new();
        for symbol in symbols {
            match *symbol {
                Symbol::Scalar(ref scalar) => terms.push(quote(scalar.name())),
                Symbol::Array(ref array) => {
                    for offset in 0..array.size() {
                        terms.push(format!(
                            "(select {} {})",
                            quote(array.name()),
                            constant_to_smtlib2(offset, ARRAY_INDEX_BITS)
                        ));
                    }
                }
            }
        }

        let mut values = Vec::with_capacity(terms.len());
        if !terms.is_empty() {
            self.send(&format!("(get-value ({}))", terms.join(" ")))?;
            match self.receive()? {
                Sexp::List(pairs) if pairs.len() == terms.len() => {
                    for pair in pairs {
                        match pair {
                            Sexp::List(ref pair) if pair.len() == 2 => {
                                values.push(parse_value(&pair[1])?)
                            }
                            pair => {
                                return Err(SolverFault::Protocol(format!(
                                    "malformed model entry: {}",
                                    pair
                                ))
                                .into())
                            }
                        }
                    }
                }
                sexp => {
                    return Err(SolverFault::Protocol(format!("malformed model: {}", sexp)).into())
                }
            }
        }

        let mut values = values.into_iter();
        let mut assignment = Assignment::new();
        for symbol in symbols {
            match *symbol {
                Symbol::Scalar(ref scalar) => assignment.set_scalar(
                    scalar.name(),
                    il::const_(values.next().unwrap_or(0), scalar.bits()),
                ),
                Symbol::Array(ref array) => {
                    let bytes = (0..array.size())
                        .map(|_| values.next().unwrap_or(0) as u8)
                        .collect();
                    assignment.set_array(array.name(), bytes);
                }
            }
        }
        Ok(assignment)
    }

    fn check(&mut self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        let mut fingerprints = Vec::with_capacity(query.constraints().len());
        let mut fingerprint = 0;
        for constraint in query.constraints() {
            fingerprint = chain_fingerprint(fingerprint, constraint);
            fingerprints.push(fingerprint);
        }

        let common = self
            .scopes
            .iter()
            .zip(fingerprints.iter())
            .take_while(|(open, wanted)| open == wanted)
            .count();
        self.pop_to(common)?;
        for (constraint, fingerprint) in query
            .constraints()
            .iter()
            .zip(fingerprints.iter())
            .skip(common)
        {
            self.push(*fingerprint, constraint)?;
        }

        let timeout_ms = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(SolverResponse::Unknown);
                }
                ((deadline - now).as_millis() as u64).clamp(1, NO_TIMEOUT)
            }
            None => NO_TIMEOUT,
        };
        if timeout_ms != self.timeout_ms {
            self.send(&format!("(set-option :timeout {})", timeout_ms))?;
            self.timeout_ms = timeout_ms;
        }

        let level = self.scopes.len();
        self.push(
            chain_fingerprint(fingerprint, query.expression()),
            query.expression(),
        )?;
        self.send("(check-sat)")?;
        let response = match self.receive()? {
            Sexp::Atom(ref answer) if answer == "sat" => {
                SolverResponse::Sat(self.model(&query.symbols())?)
            }
            Sexp::Atom(ref answer) if answer == "unsat" => SolverResponse::Unsat,
            Sexp::Atom(ref answer) if answer == "unknown" => SolverResponse::Unknown,
            sexp => {
                return Err(SolverFault::Protocol(format!(
                    "unexpected answer to check-sat: {}",
                    sexp
                ))
                .into())
            }
        };
        self.pop_to(level)?;
        Ok(response)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A solver process speaking SMT-LIB2, such as `z3 -in`.
pub struct Smtlib2Solver {
    program: String,
    args: Vec<String>,
    session: Mutex<Option<Session>>,
    queries: AtomicU64,
}

impl Smtlib2Solver {
    /// A backend running `command`, a program followed by its arguments.
    /// The process is started on the first query.
    pub fn new(command: &str) -> Result<Smtlib2Solver, Error> {
        let mut words = command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Config("empty solver command".to_string()))?;
        Ok(Smtlib2Solver {
            program: program.to_string(),
            args: words.map(|word| word.to_string()).collect(),
            session: Mutex::new(None),
            queries: AtomicU64::new(0),
        })
    }
}

impl SolverBackend for Smtlib2Solver {
    fn name(&self) -> String {
        format!("smtlib2({})", self.program)
    }

    fn check(&self, query: &Query, deadline: Option<Instant>) -> Result<SolverResponse, Error> {
        query.ensure_boolean()?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        let mut guard = self
            .session
            .lock()
            .map_err(|_| SolverFault::Unavailable("solver session lock poisoned".to_string()))?;
        let mut session = match guard.take() {
            Some(session) => session,
            None => Session::spawn(&self.program, &self.args)?,
        };
        match session.check(query, deadline) {
            Ok(response) => {
                *guard = Some(session);
                Ok(response)
            }
            Err(error) => {
                // The session is in an unknown state, so it is dropped and
                // the next query starts a fresh process.
                warn!("{}: {}", self.name(), error);
                Err(error)
            }
        }
    }

    fn statistics(&self) -> SolverStatistics {
        SolverStatistics {
            core_queries: self.queries.load(Ordering::Relaxed),
            ..SolverStatistics::default()
        }
    }
}

#[cfg(test)]
mod smtlib2_tests {
    use super::{parse, parse_value, Sexp};
    use crate::il::*;
    use crate::solver::*;
    use crate::Error;

    #[test]
    fn print_expressions() {
        let x = expr_scalar("x", 32);
        let e = Expression::cmpltu(x.clone(), expr_const(10, 32)).unwrap();
        assert_eq!(
            expression_to_smtlib2(&e),
            "(ite (bvult |x| #x0000000a) #b1 #b0)"
        );

        let e = Expression::cmpneq(x.clone(), expr_const(1, 32)).unwrap();
        assert_eq!(
            expression_to_smtlib2(&e),
            "(ite (distinct |x| #x00000001) #b1 #b0)"
        );

        let e = Expression::zext(64, x.clone()).unwrap();
        assert_eq!(
            expression_to_smtlib2(&e),
            "(concat (_ bv0 32) |x|)"
        );

        let e = Expression::trun(3, x).unwrap();
        assert_eq!(expression_to_smtlib2(&e), "((_ extract 2 0) |x|)");

        assert_eq!(expression_to_smtlib2(&expr_const(5, 3)), "#b101");
    }

    #[test]
    fn print_symbolic_reads() {
        let updates = UpdateList::new(Array::new("buf", 4));
        let e = updates.read(expr_scalar("i", 32)).unwrap();
        assert_eq!(
            expression_to_smtlib2(&e),
            "(ite (bvult |i| #x00000004) (select |buf| |i|) #x00)"
        );
    }

    #[test]
    fn parse_responses() {
        assert_eq!(parse("sat\n").unwrap(), Some(Sexp::Atom("sat".to_string())));
        assert_eq!(parse("((|x| #x0000").unwrap(), None);
        assert_eq!(parse("").unwrap(), None);

        let model = parse("((|x| #x0000000a)\n (|y| (_ bv7 8)) (|b| #b1))").unwrap().unwrap();
        let values: Vec<u64> = match model {
            Sexp::List(pairs) => pairs
                .iter()
                .map(|pair| match pair {
                    Sexp::List(pair) => parse_value(&pair[1]).unwrap(),
                    _ => panic!("expected a pair"),
                })
                .collect(),
            _ => panic!("expected a list"),
        };
        assert_eq!(values, vec![10, 7, 1]);

        assert!(parse(")").is_err());
        assert!(parse_value(&Sexp::Atom("true".to_string())).is_err());
    }

    #[test]
    fn missing_binary_is_unavailable() {
        assert!(Smtlib2Solver::new("   ").is_err());

        let solver = Smtlib2Solver::new("harrier-no-such-solver -in").unwrap();
        let query = Query::from_constraints(vec![], expr_const(1, 1));
        match solver.check(&query, None) {
            Err(Error::Solver(SolverFault::Unavailable(_))) => {}
            other => panic!("expected an unavailable solver, got {:?}", other),
        }
    }

    #[test]
    #[ignore = "needs z3 on the PATH"]
    fn z3_session() {
        let solver = Smtlib2Solver::new("z3 -in").unwrap();
        let x = expr_scalar("x", 32);
        let a = Expression::cmpltu(x.clone(), expr_const(10, 32)).unwrap();
        let b = Expression::cmpltu(expr_const(5, 32), x.clone()).unwrap();

        let query = Query::from_constraints(vec![&a], b.clone());
        match solver.check(&query, None).unwrap() {
            SolverResponse::Sat(model) => {
                let x = model.scalar("x").unwrap().value();
                assert!(x > 5 && x < 10);
            }
            response => panic!("expected sat, got {:?}", response),
        }

        let c = Expression::cmpeq(x, expr_const(3, 32)).unwrap();
        let query = Query::from_constraints(vec![&a, &b], c);
        assert_eq!(solver.check(&query, None).unwrap(), SolverResponse::Unsat);
    }
}
