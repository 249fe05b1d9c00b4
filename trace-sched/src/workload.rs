/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Workload specifications handed to [`Scheduler::new`].
//!
//! A workload is a named group of inputs (one per traced thread or shard)
//! sharing default modifiers:
//!
//! ```text
//! WorkloadSpec ─┬─ InputSpec (tid 51, source)   ◄─ ThreadModifiers { tids: [51], priority: 2 }
//!               ├─ InputSpec (tid 52, source)
//!               └─ only_threads / only_shards / output_limit / times_of_interest
//! ```
//!
//! [`Scheduler::new`]: crate::scheduler::Scheduler::new

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;

use crate::source::RecordSource;

// ── Regions of interest ───────────────────────────────────────────────────────

/// Inclusive instruction range `[start, stop]`, 1-based.  `stop == 0` means
/// "to the end of the input".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Region {
    pub start: u64,
    #[serde(default)]
    pub stop: u64,
}

impl Region {
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }

    pub fn is_open_ended(&self) -> bool {
        self.stop == 0
    }

    /// Returns `true` if the 1-based instruction ordinal lies past this
    /// region.
    pub fn ends_before(&self, instr: u64) -> bool {
        !self.is_open_ended() && instr > self.stop
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{}, end]", self.start)
        } else {
            write!(f, "[{}, {}]", self.start, self.stop)
        }
    }
}

/// Why a region list was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionProblem {
    /// `start` is 0 (ordinals are 1-based).
    ZeroStart { index: usize },
    /// `stop` is before `start`.
    Inverted { index: usize },
    /// An open-ended region is followed by another region.
    OpenEndedNotLast { index: usize },
    /// Region `index` starts at or before the end of the previous one.
    Overlap { index: usize },
}

impl fmt::Display for RegionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionProblem::ZeroStart { index } => {
                write!(f, "region #{index} starts at 0 (ordinals are 1-based)")
            }
            RegionProblem::Inverted { index } => write!(f, "region #{index} stops before it starts"),
            RegionProblem::OpenEndedNotLast { index } => {
                write!(f, "open-ended region #{index} is not the last region")
            }
            RegionProblem::Overlap { index } => {
                write!(f, "region #{index} overlaps or precedes the previous region")
            }
        }
    }
}

/// Check that `regions` are 1-based, strictly increasing and
/// non-overlapping.
pub fn validate_regions(regions: &[Region]) -> Result<(), RegionProblem> {
    for (index, r) in regions.iter().enumerate() {
        if r.start == 0 {
            return Err(RegionProblem::ZeroStart { index });
        }
        if !r.is_open_ended() && r.stop < r.start {
            return Err(RegionProblem::Inverted { index });
        }
        if index > 0 {
            let prev = regions[index - 1];
            if prev.is_open_ended() {
                return Err(RegionProblem::OpenEndedNotLast { index: index - 1 });
            }
            if r.start <= prev.stop {
                return Err(RegionProblem::Overlap { index });
            }
        }
    }
    Ok(())
}

/// Timestamp range `[start, stop]` converted to instruction regions through
/// the as-traced map.  `stop == 0` means "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    #[serde(default)]
    pub stop: u64,
}

// ── Modifiers ─────────────────────────────────────────────────────────────────

/// Per-thread overrides applied to the inputs of one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ThreadModifiers {
    /// Threads the modifier applies to.  Empty = every input of the workload.
    pub tids: Vec<i64>,
    /// Higher wins.  Default 0.
    pub priority: i32,
    /// Outputs the inputs may run on.  Empty = unrestricted.
    pub output_binding: BTreeSet<usize>,
    pub regions_of_interest: Vec<Region>,
}

impl ThreadModifiers {
    pub fn applies_to(&self, tid: i64) -> bool {
        self.tids.is_empty() || self.tids.contains(&tid)
    }
}

// ── Inputs and workloads ──────────────────────────────────────────────────────

/// One pre-opened input stream.
pub struct InputSpec<R> {
    pub tid: i64,
    pub pid: i64,
    pub source: Box<dyn RecordSource<R>>,
}

impl<R> InputSpec<R> {
    pub fn new(tid: i64, pid: i64, source: impl RecordSource<R> + 'static) -> Self {
        Self {
            tid,
            pid,
            source: Box::new(source),
        }
    }
}

impl<R> fmt::Debug for InputSpec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSpec")
            .field("tid", &self.tid)
            .field("pid", &self.pid)
            .field("source", &self.source.name())
            .finish()
    }
}

/// A named group of inputs with shared defaults.
#[derive(Debug)]
pub struct WorkloadSpec<R> {
    pub name: String,
    pub inputs: Vec<InputSpec<R>>,
    /// Keep only these tids.  Empty = keep all.
    pub only_threads: BTreeSet<i64>,
    /// Keep only these shard ordinals (index within `inputs`).  Empty = keep all.
    pub only_shards: BTreeSet<usize>,
    /// Maximum number of outputs this workload may occupy at once.
    pub output_limit: Option<usize>,
    /// Applied in order; later modifiers override earlier ones.
    pub modifiers: Vec<ThreadModifiers>,
    pub times_of_interest: Vec<TimeRange>,
}

impl<R> WorkloadSpec<R> {
    pub fn new(name: impl Into<String>, inputs: Vec<InputSpec<R>>) -> Self {
        Self {
            name: name.into(),
            inputs,
            only_threads: BTreeSet::new(),
            only_shards: BTreeSet::new(),
            output_limit: None,
            modifiers: Vec::new(),
            times_of_interest: Vec::new(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: ThreadModifiers) -> Self {
        self.modifiers.push(modifiers);
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = Some(limit);
        self
    }

    /// Returns `true` if the shard / thread filters keep this input.
    pub fn keeps(&self, shard: usize, tid: i64) -> bool {
        (self.only_shards.is_empty() || self.only_shards.contains(&shard))
            && (self.only_threads.is_empty() || self.only_threads.contains(&tid))
    }

    /// Effective `(priority, binding, regions)` for `tid`.
    pub fn resolve_modifiers(&self, tid: i64) -> (i32, BTreeSet<usize>, Vec<Region>) {
        let mut priority = 0;
        let mut binding = BTreeSet::new();
        let mut regions = Vec::new();
        for m in self.modifiers.iter().filter(|m| m.applies_to(tid)) {
            priority = m.priority;
            if !m.output_binding.is_empty() {
                binding = m.output_binding.clone();
            }
            if !m.regions_of_interest.is_empty() {
                regions = m.regions_of_interest.clone();
            }
        }
        (priority, binding, regions)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
