//! A conflict-driven clause-learning SAT solver.
//!
//! Two watched literals per clause, first-UIP learning with local
//! minimization, VSIDS branching with phase saving, Luby restarts, and solving
//! under assumptions. Clauses are only ever added, so a solver can be reused
//! across many calls with different assumptions. Learnt clauses are implied
//! by the clause database alone and stay valid between calls.

use std::fmt;
use std::ops::Not;
use std::time::Instant;

/// A propositional variable.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Var(u32);

impl Var {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A variable or its negation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Lit(u32);

impl Lit {
    pub fn new(var: Var, negative: bool) -> Lit {
        Lit(var.0 << 1 | negative as u32)
    }

    pub fn positive(var: Var) -> Lit {
        Lit::new(var, false)
    }

    pub fn var(self) -> Var {
        Var(self.0 >> 1)
    }

    pub fn is_negative(self) -> bool {
        self.0 & 1 == 1
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl Not for Lit {
    type Output = Lit;

    fn not(self) -> Lit {
        Lit(self.0 ^ 1)
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-{}", self.var().0)
        } else {
            write!(f, "{}", self.var().0)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// The deadline passed.
    Unknown,
}

#[derive(Debug)]
struct Clause {
    lits: Vec<Lit>,
    learnt: bool,
    deleted: bool,
    activity: f64,
}

/// A binary max-heap of variables ordered by activity.
#[derive(Debug, Default)]
struct VarOrder {
    heap: Vec<Var>,
    positions: Vec<Option<usize>>,
}

impl VarOrder {
    fn grow(&mut self) {
        self.positions.push(None);
    }

    fn contains(&self, var: Var) -> bool {
        self.positions[var.index()].is_some()
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn insert(&mut self, var: Var, activity: &[f64]) {
        if self.contains(var) {
            return;
        }
        self.positions[var.index()] = Some(self.heap.len());
        self.heap.push(var);
        self.sift_up(self.heap.len() - 1, activity);
    }

    /// Restore the heap after the activity of `var` increased.
    fn increased(&mut self, var: Var, activity: &[f64]) {
        if let Some(position) = self.positions[var.index()] {
            self.sift_up(position, activity);
        }
    }

    fn pop(&mut self, activity: &[f64]) -> Option<Var> {
        let top = *self.heap.first()?;
        let last = self.heap.len() - 1;
        self.swap(0, last);
        self.heap.pop();
        self.positions[top.index()] = None;
        if !self.heap.is_empty() {
            self.sift_down(0, activity);
        }
        Some(top)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions[self.heap[a].index()] = Some(a);
        self.positions[self.heap[b].index()] = Some(b);
    }

    fn sift_up(&mut self, mut position: usize, activity: &[f64]) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if activity[self.heap[position].index()] <= activity[self.heap[parent].index()] {
                break;
            }
            self.swap(position, parent);
            position = parent;
        }
    }

    fn sift_down(&mut self, mut position: usize, activity: &[f64]) {
        loop {
            let left = position * 2 + 1;
            let right = left + 1;
            let mut largest = position;
            if left < self.heap.len()
                && activity[self.heap[left].index()] > activity[self.heap[largest].index()]
            {
                largest = left;
            }
            if right < self.heap.len()
                && activity[self.heap[right].index()] > activity[self.heap[largest].index()]
            {
                largest = right;
            }
            if largest == position {
                break;
            }
            self.swap(position, largest);
            position = largest;
        }
    }
}

fn value_of(assigns: &[Option<bool>], lit: Lit) -> Option<bool> {
    assigns[lit.var().index()].map(|value| value != lit.is_negative())
}

/// The Luby restart sequence: 1, 1, 2, 1, 1, 2, 4, ...
fn luby(mut index: u64) -> u64 {
    let mut size = 1;
    let mut sequence = 0;
    while size < index + 1 {
        sequence += 1;
        size = 2 * size + 1;
    }
    while size - 1 != index {
        size = (size - 1) >> 1;
        sequence -= 1;
        index %= size;
    }
    1 << sequence
}

const RESTART_BASE: u64 = 100;
const VAR_DECAY: f64 = 0.95;
const CLAUSE_DECAY: f64 = 0.999;

#[derive(Debug)]
pub struct SatSolver {
    clauses: Vec<Clause>,
    free_clauses: Vec<usize>,
    watches: Vec<Vec<usize>>,
    assigns: Vec<Option<bool>>,
    level: Vec<usize>,
    reason: Vec<Option<usize>>,
    trail: Vec<Lit>,
    trail_lim: Vec<usize>,
    qhead: usize,
    activity: Vec<f64>,
    var_inc: f64,
    clause_inc: f64,
    order: VarOrder,
    polarity: Vec<bool>,
    seen: Vec<bool>,
    model: Vec<bool>,
    ok: bool,
    learnts: usize,
    max_learnts: f64,
    conflicts: u64,
    decisions: u64,
}

impl Default for SatSolver {
    fn default() -> SatSolver {
        SatSolver::new()
    }
}

impl SatSolver {
    pub fn new() -> SatSolver {
        SatSolver {
            clauses: Vec::new(),
            free_clauses: Vec::new(),
            watches: Vec::new(),
            assigns: Vec::new(),
            level: Vec::new(),
            reason: Vec::new(),
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            activity: Vec::new(),
            var_inc: 1.0,
            clause_inc: 1.0,
            order: VarOrder::default(),
            polarity: Vec::new(),
            seen: Vec::new(),
            model: Vec::new(),
            ok: true,
            learnts: 0,
            max_learnts: 2000.0,
            conflicts: 0,
            decisions: 0,
        }
    }

    pub fn num_vars(&self) -> usize {
        self.assigns.len()
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len() - self.free_clauses.len()
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }

    pub fn decisions(&self) -> u64 {
        self.decisions
    }

    /// False once the clauses are known to be unsatisfiable without any
    /// assumptions.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn new_var(&mut self) -> Var {
        let var = Var(self.assigns.len() as u32);
        self.assigns.push(None);
        self.level.push(0);
        self.reason.push(None);
        self.activity.push(0.0);
        self.polarity.push(false);
        self.seen.push(false);
        self.watches.push(Vec::new());
        self.watches.push(Vec::new());
        self.order.grow();
        self.order.insert(var, &self.activity);
        var
    }

    /// The value of `lit` in the last satisfying assignment.
    pub fn model_value(&self, lit: Lit) -> bool {
        self.model
            .get(lit.var().index())
            .map(|value| *value != lit.is_negative())
            .unwrap_or(false)
    }

    fn decision_level(&self) -> usize {
        self.trail_lim.len()
    }

    fn value(&self, lit: Lit) -> Option<bool> {
        value_of(&self.assigns, lit)
    }

    fn enqueue(&mut self, lit: Lit, reason: Option<usize>) {
        let var = lit.var().index();
        self.assigns[var] = Some(!lit.is_negative());
        self.level[var] = self.decision_level();
        self.reason[var] = reason;
        self.trail.push(lit);
    }

    /// Add a clause. Must be called between solves.
    ///
    /// Returns false if the clause database became unsatisfiable.
    pub fn add_clause(&mut self, lits: &[Lit]) -> bool {
        if !self.ok {
            return false;
        }
        self.cancel_until(0);

        let mut lits = lits.to_vec();
        lits.sort();
        lits.dedup();
        let mut kept = Vec::with_capacity(lits.len());
        for (i, lit) in lits.iter().enumerate() {
            if i > 0 && lits[i - 1] == !*lit {
                return true;
            }
            match self.value(*lit) {
                Some(true) => return true,
                Some(false) => {}
                None => kept.push(*lit),
            }
        }

        match kept.len() {
            0 => {
                self.ok = false;
            }
            1 => {
                self.enqueue(kept[0], None);
                self.ok = self.propagate().is_none();
            }
            _ => {
                self.attach(kept, false);
            }
        }
        self.ok
    }

    fn attach(&mut self, lits: Vec<Lit>, learnt: bool) -> usize {
        let watch0 = (!lits[0]).index();
        let watch1 = (!lits[1]).index();
        let clause = Clause {
            lits,
            learnt,
            deleted: false,
            activity: 0.0,
        };
        let cref = match self.free_clauses.pop() {
            Some(cref) => {
                self.clauses[cref] = clause;
                cref
            }
            None => {
                self.clauses.push(clause);
                self.clauses.len() - 1
            }
        };
        self.watches[watch0].push(cref);
        self.watches[watch1].push(cref);
        if learnt {
            self.learnts += 1;
        }
        cref
    }

    /// Unit propagation. Returns a conflicting clause, if any.
    fn propagate(&mut self) -> Option<usize> {
        let mut conflict = None;
        while self.qhead < self.trail.len() && conflict.is_none() {
            let p = self.trail[self.qhead];
            self.qhead += 1;
            let false_lit = !p;
            let mut watchers = std::mem::take(&mut self.watches[p.index()]);

            let mut i = 0;
            let mut j = 0;
            while i < watchers.len() {
                let cref = watchers[i];
                i += 1;
                if self.clauses[cref].deleted {
                    continue;
                }
                {
                    let lits = &mut self.clauses[cref].lits;
                    if lits[0] == false_lit {
                        lits.swap(0, 1);
                    }
                }
                let first = self.clauses[cref].lits[0];
                if value_of(&self.assigns, first) == Some(true) {
                    watchers[j] = cref;
                    j += 1;
                    continue;
                }

                let mut moved = false;
                let len = self.clauses[cref].lits.len();
                for k in 2..len {
                    let candidate = self.clauses[cref].lits[k];
                    if value_of(&self.assigns, candidate) != Some(false) {
                        self.clauses[cref].lits.swap(1, k);
                        self.watches[(!candidate).index()].push(cref);
                        moved = true;
                        break;
                    }
                }
                if moved {
                    continue;
                }

                watchers[j] = cref;
                j += 1;
                if value_of(&self.assigns, first) == Some(false) {
                    conflict = Some(cref);
                    while i < watchers.len() {
                        watchers[j] = watchers[i];
                        j += 1;
                        i += 1;
                    }
                } else {
                    self.enqueue(first, Some(cref));
                }
            }
            watchers.truncate(j);
            self.watches[p.index()] = watchers;
        }
        if conflict.is_some() {
            self.qhead = self.trail.len();
        }
        conflict
    }

    fn bump_var(&mut self, var: Var) {
        self.activity[var.index()] += self.var_inc;
        if self.activity[var.index()] > 1e100 {
            for activity in self.activity.iter_mut() {
                *activity *= 1e-100;
            }
            self.var_inc *= 1e-100;
        }
        self.order.increased(var, &self.activity);
    }

    fn bump_clause(&mut self, cref: usize) {
        self.clauses[cref].activity += self.clause_inc;
        if self.clauses[cref].activity > 1e20 {
            for clause in self.clauses.iter_mut().filter(|clause| clause.learnt) {
                clause.activity *= 1e-20;
            }
            self.clause_inc *= 1e-20;
        }
    }

    /// First-UIP conflict analysis. Returns the learnt clause, asserting
    /// literal first, and the level to backtrack to.
    fn analyze(&mut self, conflict: usize) -> (Vec<Lit>, usize) {
        let mut learnt: Vec<Lit> = vec![Lit(0)];
        let mut pending = 0;
        let mut p: Option<Lit> = None;
        let mut index = self.trail.len();
        let mut cref = Some(conflict);

        loop {
            let current = match cref {
                Some(current) => current,
                None => break,
            };
            if self.clauses[current].learnt {
                self.bump_clause(current);
            }
            let skip = if p.is_some() { 1 } else { 0 };
            let lits: Vec<Lit> = self.clauses[current].lits[skip..].to_vec();
            for q in lits {
                let var = q.var();
                if !self.seen[var.index()] && self.level[var.index()] > 0 {
                    self.bump_var(var);
                    self.seen[var.index()] = true;
                    if self.level[var.index()] >= self.decision_level() {
                        pending += 1;
                    } else {
                        learnt.push(q);
                    }
                }
            }

            while index > 0 {
                index -= 1;
                if self.seen[self.trail[index].var().index()] {
                    break;
                }
            }
            let next = self.trail[index];
            p = Some(next);
            cref = self.reason[next.var().index()];
            self.seen[next.var().index()] = false;
            pending -= 1;
            if pending == 0 {
                break;
            }
        }
        if let Some(p) = p {
            learnt[0] = !p;
        }

        // Drop literals implied by the rest of the clause.
        let mut minimized = vec![learnt[0]];
        for lit in &learnt[1..] {
            let redundant = match self.reason[lit.var().index()] {
                None => false,
                Some(reason) => self.clauses[reason].lits[1..].iter().all(|other| {
                    self.seen[other.var().index()] || self.level[other.var().index()] == 0
                }),
            };
            if !redundant {
                minimized.push(*lit);
            }
        }
        for lit in &learnt {
            self.seen[lit.var().index()] = false;
        }

        let mut backtrack = 0;
        if minimized.len() > 1 {
            let mut highest = 1;
            for i in 2..minimized.len() {
                if self.level[minimized[i].var().index()] > self.level[minimized[highest].var().index()] {
                    highest = i;
                }
            }
            minimized.swap(1, highest);
            backtrack = self.level[minimized[1].var().index()];
        }
        (minimized, backtrack)
    }

    fn cancel_until(&mut self, level: usize) {
        if self.decision_level() <= level {
            return;
        }
        let start = self.trail_lim[level];
        for i in (start..self.trail.len()).rev() {
            let lit = self.trail[i];
            let var = lit.var();
            self.assigns[var.index()] = None;
            self.reason[var.index()] = None;
            self.polarity[var.index()] = !lit.is_negative();
            self.order.insert(var, &self.activity);
        }
        self.trail.truncate(start);
        self.trail_lim.truncate(level);
        self.qhead = self.trail.len();
    }

    fn pick_branch(&mut self) -> Option<Lit> {
        while !self.order.is_empty() {
            let var = self.order.pop(&self.activity)?;
            if self.assigns[var.index()].is_none() {
                return Some(Lit::new(var, !self.polarity[var.index()]));
            }
        }
        None
    }

    fn locked(&self, cref: usize) -> bool {
        let first = self.clauses[cref].lits[0];
        self.reason[first.var().index()] == Some(cref) && self.value(first) == Some(true)
    }

    /// Delete the less active half of the learnt clauses.
    fn reduce_learnts(&mut self) {
        let mut candidates: Vec<usize> = (0..self.clauses.len())
            .filter(|&cref| {
                let clause = &self.clauses[cref];
                clause.learnt && !clause.deleted && clause.lits.len() > 2
            })
            .filter(|&cref| !self.locked(cref))
            .collect();
        candidates.sort_by(|a, b| {
            self.clauses[*a]
                .activity
                .partial_cmp(&self.clauses[*b].activity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let remove = candidates.len() / 2;
        for &cref in &candidates[..remove] {
            self.clauses[cref].deleted = true;
            self.clauses[cref].lits = Vec::new();
            self.learnts -= 1;
        }
        let clauses = &self.clauses;
        for watchers in self.watches.iter_mut() {
            watchers.retain(|cref| !clauses[*cref].deleted);
        }
        self.free_clauses.extend(&candidates[..remove]);
        self.max_learnts *= 1.1;
    }

    fn search(&mut self, budget: u64, assumptions: &[Lit], deadline: Option<Instant>) -> Option<SatResult> {
        let mut conflicts = 0;
        loop {
            if let Some(conflict) = self.propagate() {
                self.conflicts += 1;
                conflicts += 1;
                if self.decision_level() == 0 {
                    self.ok = false;
                    return Some(SatResult::Unsat);
                }
                let (learnt, backtrack) = self.analyze(conflict);
                self.cancel_until(backtrack);
                if learnt.len() == 1 {
                    self.enqueue(learnt[0], None);
                } else {
                    let asserting = learnt[0];
                    let cref = self.attach(learnt, true);
                    self.bump_clause(cref);
                    self.enqueue(asserting, Some(cref));
                }
                self.var_inc /= VAR_DECAY;
                self.clause_inc /= CLAUSE_DECAY;

                if self.conflicts % 256 == 0 {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Some(SatResult::Unknown);
                        }
                    }
                }
                continue;
            }

            if conflicts >= budget {
                self.cancel_until(0);
                return None;
            }
            if self.learnts as f64 >= self.max_learnts + self.trail.len() as f64 {
                self.reduce_learnts();
            }

            let mut next = None;
            while self.decision_level() < assumptions.len() {
                let assumption = assumptions[self.decision_level()];
                match self.value(assumption) {
                    Some(true) => self.trail_lim.push(self.trail.len()),
                    Some(false) => return Some(SatResult::Unsat),
                    None => {
                        next = Some(assumption);
                        break;
                    }
                }
            }
            let next = match next {
                Some(next) => next,
                None => match self.pick_branch() {
                    Some(next) => {
                        self.decisions += 1;
                        next
                    }
                    None => {
                        self.model = self
                            .assigns
                            .iter()
                            .map(|value| value.unwrap_or(false))
                            .collect();
                        return Some(SatResult::Sat);
                    }
                },
            };
            self.trail_lim.push(self.trail.len());
            self.enqueue(next, None);
        }
    }

    /// Solve under `assumptions`. Gives up with `Unknown` once `deadline`
    /// has passed.
    pub fn solve(&mut self, assumptions: &[Lit], deadline: Option<Instant>) -> SatResult {
        if !self.ok {
            return SatResult::Unsat;
        }
        self.cancel_until(0);
        if self.propagate().is_some() {
            self.ok = false;
            return SatResult::Unsat;
        }
        self.max_learnts = self.max_learnts.max(self.num_clauses() as f64 / 3.0);

        let mut restart = 0;
        let result = loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break SatResult::Unknown;
                }
            }
            match self.search(luby(restart) * RESTART_BASE, assumptions, deadline) {
                Some(result) => break result,
                None => restart += 1,
            }
        };
        self.cancel_until(0);
        result
    }
}

#[cfg(test)]
mod sat_tests {
    use super::*;

    fn vars(solver: &mut SatSolver, n: usize) -> Vec<Lit> {
        (0..n).map(|_| Lit::positive(solver.new_var())).collect()
    }

    #[test]
    fn luby_sequence() {
        let sequence: Vec<u64> = (0..7).map(luby).collect();
        assert_eq!(sequence, vec![1, 1, 2, 1, 1, 2, 4]);
    }

    #[test]
    fn simple_sat() {
        let mut solver = SatSolver::new();
        let v = vars(&mut solver, 3);
        solver.add_clause(&[v[0], v[1]]);
        solver.add_clause(&[!v[0], v[2]]);
        solver.add_clause(&[!v[1], v[2]]);
        solver.add_clause(&[!v[2], !v[0]]);
        assert_eq!(solver.solve(&[], None), SatResult::Sat);
        assert!(!solver.model_value(v[0]));
        assert!(solver.model_value(v[1]));
        assert!(solver.model_value(v[2]));
    }

    #[test]
    fn assumptions_do_not_stick() {
        let mut solver = SatSolver::new();
        let v = vars(&mut solver, 2);
        solver.add_clause(&[v[0], v[1]]);
        assert_eq!(solver.solve(&[!v[0], !v[1]], None), SatResult::Unsat);
        assert_eq!(solver.solve(&[!v[0]], None), SatResult::Sat);
        assert!(solver.model_value(v[1]));
        assert!(solver.is_ok());
    }

    /// Pigeons into holes, one more pigeon than holes.
    #[test]
    fn pigeonhole_is_unsat() {
        let holes = 5;
        let pigeons = holes + 1;
        let mut solver = SatSolver::new();
        let p: Vec<Vec<Lit>> = (0..pigeons).map(|_| vars(&mut solver, holes)).collect();
        for pigeon in &p {
            solver.add_clause(pigeon);
        }
        for hole in 0..holes {
            for a in 0..pigeons {
                for b in a + 1..pigeons {
                    solver.add_clause(&[!p[a][hole], !p[b][hole]]);
                }
            }
        }
        assert_eq!(solver.solve(&[], None), SatResult::Unsat);
        assert!(!solver.is_ok());
    }

    #[test]
    fn empty_clause_is_unsat() {
        let mut solver = SatSolver::new();
        let v = vars(&mut solver, 1);
        assert!(solver.add_clause(&[v[0]]));
        assert!(!solver.add_clause(&[!v[0]]));
        assert_eq!(solver.solve(&[], None), SatResult::Unsat);
    }
}
