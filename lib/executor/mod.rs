//! The exploration loop.
//!
//! An `Executor` owns every live state of a run. Each step it asks the
//! searcher for a state, has the `Interpreter` execute one instruction of
//! it, and carries out what the instruction asks for: forking on branches,
//! resolving memory accesses, opening and closing merge regions, and ending
//! paths. Terminated paths become `TestCase`s.
//!
//! ```ignore
//! let mut executor = Executor::new(Config::default())?;
//! let mut state = executor.new_state(entry);
//! state.call(entry, None);
//! executor.add_state(state);
//! let mut test_cases = TestCaseCollector::new();
//! let summary = executor.run(&mut interpreter, &mut test_cases)?;
//! ```

mod fork;
mod interpreter;
mod memory;
mod merge;
mod statistics;
mod test_case;

pub(crate) use self::fork::Branches;
pub use self::interpreter::*;
pub use self::memory::{resolve, Resolution, ResolvedObject, MAX_ALLOCATION, MAX_SYMBOLIC_CAPACITY};
pub use self::statistics::*;
pub use self::test_case::*;
pub use crate::error::Budget;

use self::merge::MergeRegions;
use crate::config::{Config, Policy};
use crate::memory::{AddressSpace, Allocator};
use crate::searcher::{searcher_for_config, SearchView, Searcher};
use crate::solver::Solver;
use crate::state::{ExecutionState, MergeTag, StateId, TerminationReason};
use crate::{Error, RC};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Approximate bytes held by a state beyond its memory objects.
const STATE_OVERHEAD: u64 = 512;

/// How a run ended.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub statistics: StatisticsSnapshot,
    /// The global budget which stopped the run, if one did.
    pub exhausted: Option<Budget>,
    pub searcher: String,
    pub solver: String,
    pub elapsed: Duration,
}

/// The changes one step makes to the set of live states.
#[derive(Debug, Default)]
pub(crate) struct Step {
    live: Vec<ExecutionState>,
    added: Vec<StateId>,
    removed: Vec<StateId>,
}

impl Step {
    /// `state` continues.
    pub(crate) fn keep(&mut self, state: ExecutionState) {
        self.live.push(state);
    }

    /// A state was forked during this step.
    pub(crate) fn create(&mut self, id: StateId) {
        self.added.push(id);
    }

    /// A state stopped running. A state created during this step is simply
    /// never reported.
    pub(crate) fn remove(&mut self, id: StateId) {
        match self.added.iter().position(|added| *added == id) {
            Some(position) => {
                self.added.remove(position);
            }
            None => self.removed.push(id),
        }
    }

    /// A waiting state runs again.
    pub(crate) fn resume(&mut self, state: ExecutionState) {
        let id = state.id();
        match self.removed.iter().position(|removed| *removed == id) {
            Some(position) => {
                self.removed.remove(position);
            }
            None => self.added.push(id),
        }
        self.live.push(state);
    }

    pub(crate) fn live_len(&self) -> usize {
        self.live.len()
    }
}

/// Drives the exploration of a program.
pub struct Executor {
    config: Config,
    solver: Solver,
    searcher: Box<dyn Searcher>,
    allocator: RC<Allocator>,
    states: BTreeMap<StateId, ExecutionState>,
    merges: MergeRegions,
    instruction_counts: FxHashMap<u64, u64>,
    terminated: Vec<(ExecutionState, TerminationReason)>,
    statistics: RC<Statistics>,
    rng: ChaCha8Rng,
    next_state_id: StateId,
    steps: u64,
    started: Option<Instant>,
}

impl Executor {
    /// Create an executor with the solver stack, searcher, and allocator the
    /// configuration asks for.
    pub fn new(config: Config) -> Result<Executor, Error> {
        config.validate()?;
        let solver = Solver::from_config(&config)?;
        let searcher = searcher_for_config(&config);
        let allocator = RC::new(Allocator::new(config.layout, config.alignment, config.seed)?);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Executor {
            config,
            solver,
            searcher,
            allocator,
            states: BTreeMap::new(),
            merges: MergeRegions::default(),
            instruction_counts: FxHashMap::default(),
            terminated: Vec::new(),
            statistics: RC::new(Statistics::new()),
            rng,
            next_state_id: 1,
            steps: 0,
            started: None,
        })
    }

    /// Replace the solver stack.
    pub fn with_solver(mut self, solver: Solver) -> Executor {
        self.solver = solver;
        self
    }

    /// Replace the searcher. States already added are handed to it.
    pub fn with_searcher(mut self, searcher: Box<dyn Searcher>) -> Executor {
        self.searcher = searcher;
        let ids: Vec<StateId> = self.states.keys().copied().collect();
        let view = SearchView::new(&self.states, &self.instruction_counts);
        self.searcher.update(&view, None, &ids, &[]);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn searcher(&self) -> &dyn Searcher {
        self.searcher.as_ref()
    }

    pub fn allocator(&self) -> &RC<Allocator> {
        &self.allocator
    }

    fn next_state_id(&mut self) -> StateId {
        let id = self.next_state_id;
        self.next_state_id += 1;
        id
    }

    /// A fresh state at `pc` with an empty address space. The state is
    /// given its id when it is added.
    pub fn new_state(&self, pc: u64) -> ExecutionState {
        let space = AddressSpace::new(self.allocator.clone(), self.config.endian);
        ExecutionState::new(0, pc, space)
    }

    /// Schedule a root state. Returns the id it was given.
    pub fn add_state(&mut self, mut state: ExecutionState) -> StateId {
        let id = self.next_state_id();
        state.set_id(id);
        self.states.insert(id, state);
        let view = SearchView::new(&self.states, &self.instruction_counts);
        self.searcher.update(&view, None, &[id], &[]);
        self.statistics.set_states_live(self.live_states());
        id
    }

    /// A scheduled state.
    pub fn state(&self, id: StateId) -> Option<&ExecutionState> {
        self.states.get(&id)
    }

    /// Scheduled states, by id. States waiting at the close of a merge
    /// region are not included.
    pub fn states(&self) -> impl Iterator<Item = &ExecutionState> {
        self.states.values()
    }

    /// Every state which has not terminated.
    pub fn live_states(&self) -> usize {
        self.states.len() + self.merges.waiting_len()
    }

    /// How many times any state executed the instruction at `pc`.
    pub fn instruction_count(&self, pc: u64) -> u64 {
        self.instruction_counts.get(&pc).copied().unwrap_or(0)
    }

    /// Counters shared with the executor, readable while it runs.
    pub fn statistics_handle(&self) -> RC<Statistics> {
        self.statistics.clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.record_solver(&self.solver.statistics());
        self.statistics.snapshot()
    }

    /// Explore until no state is left or a global budget stops the run.
    pub fn run(
        &mut self,
        interpreter: &mut dyn Interpreter,
        sink: &mut dyn TestCaseSink,
    ) -> Result<RunSummary, Error> {
        let started = Instant::now();
        self.started = Some(started);
        info!(
            "exploring {} states with {}, solver {}",
            self.live_states(),
            self.searcher.name(),
            self.solver.backend().name()
        );

        let mut exhausted = None;
        loop {
            self.emit_test_cases(sink)?;
            match self.check_budgets() {
                Ok(()) => {}
                Err(Error::ResourceExhausted(budget)) => {
                    if self.exhaust(budget)? {
                        exhausted = Some(budget);
                        break;
                    }
                    continue;
                }
                Err(error) => return Err(error),
            }
            if !self.step(interpreter)? {
                break;
            }
        }
        self.emit_test_cases(sink)?;

        let summary = RunSummary {
            statistics: self.statistics(),
            exhausted,
            searcher: self.searcher.name(),
            solver: self.solver.backend().name(),
            elapsed: started.elapsed(),
        };
        info!("done after {:?}: {}", summary.elapsed, summary.statistics);
        Ok(summary)
    }

    /// Execute one instruction of the state the searcher picks. Returns
    /// false when there is no state left to run.
    ///
    /// Terminated states are held until the next `run` emits them.
    pub fn step(&mut self, interpreter: &mut dyn Interpreter) -> Result<bool, Error> {
        let id = {
            let view = SearchView::new(&self.states, &self.instruction_counts);
            match self.searcher.select_state(&view) {
                Some(id) => id,
                None => return Ok(false),
            }
        };
        let mut state = self.states.remove(&id).ok_or_else(|| {
            Error::InternalInconsistency(format!(
                "{} selected state {}, which is not live",
                self.searcher.name(),
                id
            ))
        })?;
        self.steps += 1;

        if let Some(limit) = self.config.max_instructions_per_state {
            if state.instructions() >= limit {
                debug!("state {} used its {} instructions", id, limit);
                let mut step = Step::default();
                self.terminate(
                    state,
                    TerminationReason::Pruned(Budget::StateInstructions),
                    &mut step,
                )?;
                self.commit(Some(id), step);
                return Ok(true);
            }
        }

        let pc = state.pc();
        let count = self.instruction_counts.entry(pc).or_insert(0);
        *count += 1;
        state.record_instruction(*count == 1);
        self.statistics.record_instruction();

        let outcome = interpreter.step(&mut state).map_err(|error| {
            error.chain(Error::Custom(format!(
                "interpreter failed in state {} at 0x{:x}",
                id, pc
            )))
        })?;

        let mut step = Step::default();
        match outcome {
            StepOutcome::Continue => step.keep(state),
            StepOutcome::Branch {
                condition,
                on_true,
                on_false,
            } => self.execute_branch(state, condition, on_true, on_false, &mut step)?,
            StepOutcome::Assert { condition, error } => {
                self.execute_assert(state, condition, error, &mut step)?
            }
            StepOutcome::Assume { condition } => self.execute_assume(state, condition, &mut step)?,
            StepOutcome::Memory(access) => self.execute_memory(state, access, &mut step)?,
            StepOutcome::Allocate {
                size,
                name,
                flags,
                destination,
            } => self.execute_allocate(state, size, name, flags, destination, &mut step)?,
            StepOutcome::Free { pointer } => self.execute_free(state, pointer, &mut step)?,
            StepOutcome::MergeOpen => self.execute_merge_open(state, &mut step),
            StepOutcome::MergeClose => self.execute_merge_close(state, &mut step)?,
            StepOutcome::Terminate(reason) => self.terminate(state, reason, &mut step)?,
        }
        self.commit(Some(id), step);
        Ok(true)
    }

    /// Return the live states of a step to the executor and tell the
    /// searcher what changed.
    fn commit(&mut self, current: Option<StateId>, step: Step) {
        for state in step.live {
            self.states.insert(state.id(), state);
        }
        let view = SearchView::new(&self.states, &self.instruction_counts);
        self.searcher
            .update(&view, current, &step.added, &step.removed);
        self.statistics.set_states_live(self.live_states());
    }

    /// End a path. Its test case is produced the next time test cases are
    /// emitted.
    pub(crate) fn terminate(
        &mut self,
        state: ExecutionState,
        reason: TerminationReason,
        step: &mut Step,
    ) -> Result<(), Error> {
        debug!(
            "state {} terminated at 0x{:x}: {}",
            state.id(),
            state.pc(),
            reason
        );
        step.remove(state.id());
        if let MergeTag::InMerge { id: region, .. } = state.merge_tag() {
            if let Some(waiting) = self.merges.leave(region, state.id()) {
                self.resume_merged(region, waiting, step)?;
            }
        }
        self.statistics.record_termination(&reason);
        self.terminated.push((state, reason));
        Ok(())
    }

    /// Terminate a live state because it exhausted `budget`.
    pub fn prune(&mut self, id: StateId, budget: Budget) -> Result<(), Error> {
        let state = match self.states.remove(&id) {
            Some(state) => state,
            None => self
                .merges
                .take_waiting(id)
                .ok_or(Error::UnknownState(id))?,
        };
        let mut step = Step::default();
        self.terminate(state, TerminationReason::Pruned(budget), &mut step)?;
        self.commit(None, step);
        Ok(())
    }

    /// Test cases for every path terminated since the last call.
    fn emit_test_cases(&mut self, sink: &mut dyn TestCaseSink) -> Result<(), Error> {
        for (mut state, reason) in std::mem::take(&mut self.terminated) {
            if !self.config.emit_test_cases
                || (self.config.emit_on_error_only && !reason.is_error())
            {
                continue;
            }
            let inputs = self.solver.get_initial_values(&mut state)?;
            let complete = inputs.is_some()
                && state.unknown_queries() == 0
                && matches!(reason, TerminationReason::Exit | TerminationReason::Error(_));
            let test_case = TestCase {
                path: state.id(),
                reason,
                inputs: inputs.unwrap_or_default(),
                complete,
            };
            sink.emit(&test_case)?;
            self.statistics.record_test_case();
        }
        Ok(())
    }

    /// Bytes held by live states, counting shared objects once.
    pub fn memory_usage(&self) -> u64 {
        let mut seen = FxHashSet::default();
        self.states
            .values()
            .chain(self.merges.waiting())
            .map(|state| STATE_OVERHEAD + state.address_space().unshared_bytes(&mut seen))
            .sum()
    }

    /// Fails with `Error::ResourceExhausted` if a global budget is spent.
    fn check_budgets(&self) -> Result<(), Error> {
        if let Some(max) = self.config.max_instructions {
            if self.statistics.instructions() >= max {
                return Err(Error::ResourceExhausted(Budget::Instructions));
            }
        }
        if let (Some(max), Some(started)) = (self.config.max_time(), self.started) {
            if started.elapsed() >= max {
                return Err(Error::ResourceExhausted(Budget::Time));
            }
        }
        if let Some(max) = self.config.max_memory_bytes {
            if self.steps % self.config.memory_check_interval == 0 && self.memory_usage() > max {
                return Err(Error::ResourceExhausted(Budget::Memory));
            }
        }
        Ok(())
    }

    /// Apply the exhaustion policy. Returns true if the run is over.
    fn exhaust(&mut self, budget: Budget) -> Result<bool, Error> {
        match (self.config.exhaustion_policy, budget) {
            (Policy::Continue, Budget::Memory) => {
                self.shed_memory()?;
                Ok(false)
            }
            (Policy::Continue, _) => {
                warn!("exhausted the {}, pruning {} states", budget, self.live_states());
                for state in self.drain_states() {
                    self.statistics.record_termination(&TerminationReason::Pruned(budget));
                    self.terminated.push((state, TerminationReason::Pruned(budget)));
                }
                Ok(true)
            }
            (Policy::Stop, _) => {
                warn!("exhausted the {}, halting with {} live states", budget, self.live_states());
                let states = self.drain_states();
                if self.config.dump_states_on_halt {
                    let reason = TerminationReason::Early(format!("exhausted the {}", budget));
                    for state in states {
                        self.statistics.record_termination(&reason);
                        self.terminated.push((state, reason.clone()));
                    }
                }
                Ok(true)
            }
        }
    }

    /// Remove every live state.
    fn drain_states(&mut self) -> Vec<ExecutionState> {
        let states = std::mem::take(&mut self.states);
        let ids: Vec<StateId> = states.keys().copied().collect();
        let view = SearchView::new(&self.states, &self.instruction_counts);
        self.searcher.update(&view, None, &[], &ids);
        let mut drained: Vec<ExecutionState> = states.into_values().collect();
        drained.extend(self.merges.drain());
        self.statistics.set_states_live(0);
        drained
    }

    /// Prune the largest states until live states fit the memory budget.
    fn shed_memory(&mut self) -> Result<(), Error> {
        let max = match self.config.max_memory_bytes {
            Some(max) => max,
            None => return Ok(()),
        };
        while self.memory_usage() > max {
            let largest = self
                .states
                .values()
                .chain(self.merges.waiting())
                .map(|state| {
                    let mut seen = FxHashSet::default();
                    (state.address_space().unshared_bytes(&mut seen), state.id())
                })
                .max();
            match largest {
                Some((bytes, id)) => {
                    warn!("pruning state {} holding {} bytes", id, bytes);
                    self.prune(id, Budget::Memory)?;
                }
                None => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_created_and_ended_in_one_step_are_never_reported() {
        let mut step = Step::default();
        step.create(2);
        step.create(3);
        step.remove(3);
        step.remove(1);
        assert_eq!(step.added, vec![2]);
        assert_eq!(step.removed, vec![1]);
    }

    #[test]
    fn resumed_states_are_reported_once() {
        let space = AddressSpace::new(RC::new(Allocator::deterministic()), Default::default());
        let mut step = Step::default();
        // paused and resumed in the same step
        step.remove(1);
        step.resume(ExecutionState::new(1, 0, space.clone()));
        // paused in an earlier step
        step.resume(ExecutionState::new(4, 0, space));
        assert!(step.removed.is_empty());
        assert_eq!(step.added, vec![4]);
        assert_eq!(step.live_len(), 2);
    }

    #[test]
    fn executor_from_config() {
        let config = Config::from_json_str(r#"{"search_strategy": "dfs", "seed": 7}"#).unwrap();
        let mut executor = Executor::new(config).unwrap();
        let state = executor.new_state(0x400000);
        let id = executor.add_state(state);
        assert_eq!(executor.state(id).unwrap().id(), id);
        assert_eq!(executor.live_states(), 1);
        assert_eq!(executor.searcher().name(), "dfs");

        executor.prune(id, Budget::Time).unwrap();
        assert_eq!(executor.live_states(), 0);
        assert!(executor.searcher().is_empty());
        assert!(matches!(
            executor.prune(id, Budget::Time),
            Err(Error::UnknownState(_))
        ));
    }
}
