//! Merge regions.
//!
//! A region opens when a state reaches a merge-open marker outside of any
//! region. Every state forked inside the region belongs to it. States which
//! reach the closing marker wait there, and once no state of the region is
//! still running the waiting states are merged wherever they are compatible.

use crate::executor::{Executor, Step};
use crate::state::{ExecutionState, MergeId, MergeTag, StateId};
use crate::Error;
use log::{debug, warn};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct MergeRegion {
    /// States of the region which have not reached the close.
    running: FxHashSet<StateId>,
    /// States waiting at the close.
    waiting: Vec<ExecutionState>,
}

#[derive(Debug, Default)]
pub(crate) struct MergeRegions {
    regions: BTreeMap<MergeId, MergeRegion>,
    next_id: MergeId,
}

impl MergeRegions {
    /// Open a new region with `state` as its only member.
    fn open(&mut self, state: StateId) -> MergeId {
        let id = self.next_id;
        self.next_id += 1;
        let mut region = MergeRegion::default();
        region.running.insert(state);
        self.regions.insert(id, region);
        id
    }

    /// Add a freshly forked state to a region.
    pub(crate) fn join(&mut self, region: MergeId, state: StateId) -> Result<(), Error> {
        self.regions
            .get_mut(&region)
            .ok_or_else(|| Error::InternalInconsistency(format!("no merge region {}", region)))?
            .running
            .insert(state);
        Ok(())
    }

    /// Park `state` at the close of its region. Returns the waiting states
    /// if it was the last running one.
    fn close(
        &mut self,
        region: MergeId,
        state: ExecutionState,
    ) -> Result<Option<Vec<ExecutionState>>, Error> {
        let entry = self
            .regions
            .get_mut(&region)
            .ok_or_else(|| Error::InternalInconsistency(format!("no merge region {}", region)))?;
        entry.running.remove(&state.id());
        entry.waiting.push(state);
        Ok(self.take_if_done(region))
    }

    /// A running state of `region` terminated. Returns the waiting states if
    /// it was the last running one.
    pub(crate) fn leave(&mut self, region: MergeId, state: StateId) -> Option<Vec<ExecutionState>> {
        let entry = self.regions.get_mut(&region)?;
        entry.running.remove(&state);
        self.take_if_done(region)
    }

    fn take_if_done(&mut self, region: MergeId) -> Option<Vec<ExecutionState>> {
        let done = self
            .regions
            .get(&region)
            .map(|entry| entry.running.is_empty())
            .unwrap_or(false);
        if !done {
            return None;
        }
        self.regions.remove(&region).map(|entry| entry.waiting)
    }

    /// Remove a waiting state.
    pub(crate) fn take_waiting(&mut self, id: StateId) -> Option<ExecutionState> {
        let mut found = None;
        for (region, entry) in self.regions.iter_mut() {
            if let Some(position) = entry.waiting.iter().position(|state| state.id() == id) {
                found = Some((*region, entry.waiting.remove(position)));
                break;
            }
        }
        let (region, state) = found?;
        let empty = self
            .regions
            .get(&region)
            .map(|entry| entry.running.is_empty() && entry.waiting.is_empty())
            .unwrap_or(false);
        if empty {
            self.regions.remove(&region);
        }
        Some(state)
    }

    pub(crate) fn waiting(&self) -> impl Iterator<Item = &ExecutionState> {
        self.regions.values().flat_map(|entry| entry.waiting.iter())
    }

    pub(crate) fn waiting_len(&self) -> usize {
        self.regions.values().map(|entry| entry.waiting.len()).sum()
    }

    /// Remove every region, returning the waiting states.
    pub(crate) fn drain(&mut self) -> Vec<ExecutionState> {
        let regions = std::mem::take(&mut self.regions);
        regions
            .into_values()
            .flat_map(|entry| entry.waiting)
            .collect()
    }
}

/// Merge every compatible pair. Returns the surviving states and the number
/// of states absorbed.
fn merge_states(states: Vec<ExecutionState>) -> Result<(Vec<ExecutionState>, u64), Error> {
    let mut survivors: Vec<ExecutionState> = Vec::with_capacity(states.len());
    let mut absorbed = 0;
    for mut state in states {
        state.set_merge_tag(MergeTag::NotInMerge);
        let mut merged = false;
        for survivor in survivors.iter_mut() {
            if survivor.merge(&state)? {
                merged = true;
                absorbed += 1;
                break;
            }
        }
        if !merged {
            survivors.push(state);
        }
    }
    Ok((survivors, absorbed))
}

impl Executor {
    pub(crate) fn execute_merge_open(&mut self, mut state: ExecutionState, step: &mut Step) {
        if self.config.merge_enabled {
            match state.merge_tag() {
                MergeTag::NotInMerge => {
                    let region = self.merges.open(state.id());
                    debug!("state {} opened merge region {}", state.id(), region);
                    state.set_merge_tag(MergeTag::InMerge {
                        id: region,
                        nested: 0,
                    });
                }
                MergeTag::InMerge { id, nested } => state.set_merge_tag(MergeTag::InMerge {
                    id,
                    nested: nested + 1,
                }),
            }
        }
        step.keep(state);
    }

    pub(crate) fn execute_merge_close(
        &mut self,
        mut state: ExecutionState,
        step: &mut Step,
    ) -> Result<(), Error> {
        if !self.config.merge_enabled {
            step.keep(state);
            return Ok(());
        }
        match state.merge_tag() {
            MergeTag::NotInMerge => {
                warn!(
                    "state {} closed a merge region at 0x{:x} it never opened",
                    state.id(),
                    state.pc()
                );
                self.statistics.record_malformed_merge();
                step.keep(state);
            }
            MergeTag::InMerge { id, nested } if nested > 0 => {
                state.set_merge_tag(MergeTag::InMerge {
                    id,
                    nested: nested - 1,
                });
                step.keep(state);
            }
            MergeTag::InMerge { id, .. } => {
                step.remove(state.id());
                if let Some(waiting) = self.merges.close(id, state)? {
                    self.resume_merged(id, waiting, step)?;
                }
            }
        }
        Ok(())
    }

    /// Merge the states which waited at the close of `region` and send the
    /// survivors back to the searcher.
    pub(crate) fn resume_merged(
        &mut self,
        region: MergeId,
        waiting: Vec<ExecutionState>,
        step: &mut Step,
    ) -> Result<(), Error> {
        let count = waiting.len();
        let (survivors, absorbed) = merge_states(waiting)?;
        debug!(
            "merge region {} closed: {} states merged into {}",
            region,
            count,
            survivors.len()
        );
        self.statistics.record_merges(absorbed);
        for state in survivors {
            step.resume(state);
        }
        Ok(())
    }
}
