/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The trace scheduler: decides, for every pull from every output, which
//! input feeds the next record.
//!
//! # Structure
//!
//! ```text
//! Scheduler<R>
//!  ├─ outputs: Mutex<OutputState>   one per output, owned by its worker
//!  ├─ core:    Mutex<SchedCore>     ready queues, input states, replay cursors
//!  └─ inputs:  Mutex<InputStream>   record side of each input
//!
//! lock order: output → core → input        (schedule sink lock is a leaf)
//! ```
//!
//! The core lock is only taken when an output changes input (or an input
//! wakes another); records themselves flow under the output and input locks,
//! which are uncontended because an input runs on at most one output.
//!
//! # Policies
//!
//! | [`MappingPolicy`] | Who decides |
//! |---|---|
//! | `AnyOutput`  | dynamic scheduler: priorities, quanta, migration, stealing |
//! | `Consistent` | dynamic scheduler with input *i* pinned to output *i mod N* |
//! | `AsRecorded` | as-traced cpu map, one output per traced cpu |
//! | `Replay`     | a previously recorded schedule |

pub mod error;
pub mod stats;

mod dynamic;
mod input;
mod output;
mod quantum;
mod queue;
mod recorder;
mod replay;
mod speculation;
mod state;

pub use error::{InitError, Pull, StreamError};
pub use output::OutputStream;
pub use stats::OutputStats;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{MappingPolicy, SchedulerOptions};
use crate::inject::KernelTemplates;
use crate::record::TraceRecord;
use crate::schedule::{
    AsTracedMap, ScheduleHeader, ScheduleSink, ScheduleSource, SCHEDULE_FORMAT_VERSION,
};
use crate::workload::{validate_regions, WorkloadSpec};

use input::{InputShared, InputStream};
use output::OutputState;
use replay::{ReplayPlan, ReplayUnit};
use state::{InputSched, SchedCore};

// ── Construction inputs ───────────────────────────────────────────────────────

/// Optional collaborators of a scheduler.
pub struct Attachments<R> {
    /// Receives every scheduling decision as it closes.
    pub record_schedule: Option<Box<dyn ScheduleSink>>,
    /// Required by [`MappingPolicy::Replay`].
    pub replay_schedule: Option<Box<dyn ScheduleSource>>,
    /// Required by [`MappingPolicy::AsRecorded`] and by `times_of_interest`.
    pub as_traced: Option<AsTracedMap>,
    pub kernel_templates: KernelTemplates<R>,
}

impl<R> Default for Attachments<R> {
    fn default() -> Self {
        Self {
            record_schedule: None,
            replay_schedule: None,
            as_traced: None,
            kernel_templates: KernelTemplates::default(),
        }
    }
}

impl<R> Attachments<R> {
    /// Record every scheduling decision into `sink`.
    pub fn recording(mut self, sink: impl ScheduleSink + 'static) -> Self {
        self.record_schedule = Some(Box::new(sink));
        self
    }

    /// Drive a [`MappingPolicy::Replay`] run from a recorded schedule.
    pub fn replaying(mut self, source: impl ScheduleSource + 'static) -> Self {
        self.replay_schedule = Some(Box::new(source));
        self
    }

    /// Attach the as-traced cpu map used by [`MappingPolicy::AsRecorded`]
    /// and by workloads with `times_of_interest`.
    pub fn as_traced(mut self, map: AsTracedMap) -> Self {
        self.as_traced = Some(map);
        self
    }

    /// Splice these kernel sequences on context switches and syscalls.
    pub fn kernel_templates(mut self, templates: KernelTemplates<R>) -> Self {
        self.kernel_templates = templates;
        self
    }
}

/// Who an input is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputIdentity {
    pub workload: usize,
    pub tid: i64,
    pub pid: i64,
    /// Index of the input within its workload's input list.
    pub shard: usize,
}

#[derive(Debug)]
struct InputInfo {
    identity: InputIdentity,
    name: String,
    /// Identifiers written into presented records.
    presented_tid: i64,
    presented_pid: i64,
}

fn workload_scoped_id(workload: usize, id: i64) -> i64 {
    ((workload as i64) << 32) | (id & 0xffff_ffff)
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

pub struct Scheduler<R: TraceRecord> {
    options: SchedulerOptions,
    infos: Vec<InputInfo>,
    workload_names: Vec<String>,
    inputs: Vec<Mutex<InputStream<R>>>,
    shared: Vec<Arc<InputShared>>,
    outputs: Vec<Mutex<OutputState<R>>>,
    core: Mutex<SchedCore>,
    templates: KernelTemplates<R>,
    sink: Option<Mutex<Box<dyn ScheduleSink>>>,
    /// Value written into cpu-id markers, per output.
    output_cpus: Vec<u64>,
    /// Rewrite timestamp / cpu-id markers to virtual values.
    virtual_markers: bool,
    /// Earliest first timestamp over all inputs; origin of virtual time.
    virtual_base: u64,
    /// Scheduler-wide simulated time: the largest time any output has
    /// reached.  Block deadlines, last-run times and rebalance periods are
    /// all measured against it.
    clock: AtomicU64,
    exited: AtomicBool,
}

impl<R: TraceRecord> Scheduler<R> {
    /// Build a scheduler over `workloads` feeding `output_count` outputs.
    ///
    /// # Errors
    /// Any [`InitError`]; no output can be used after a failed construction.
    pub fn new(
        workloads: Vec<WorkloadSpec<R>>,
        output_count: usize,
        options: SchedulerOptions,
        attachments: Attachments<R>,
    ) -> Result<Self, InitError> {
        options.validate().map_err(InitError::InvalidParameter)?;
        if output_count == 0 {
            return Err(InitError::InvalidParameter("output count must be > 0".into()));
        }
        let Attachments {
            record_schedule,
            replay_schedule,
            as_traced,
            kernel_templates,
        } = attachments;
        let policy = options.mapping;
        if policy == MappingPolicy::AsRecorded && record_schedule.is_some() {
            return Err(InitError::NotImplemented(
                "recording a schedule under as-recorded mapping".into(),
            ));
        }

        // ── Inputs ────────────────────────────────────────────────────────────
        let remap_ids = options.virtualize_markers && policy.is_virtual() && workloads.len() > 1;
        let mut infos = Vec::new();
        let mut streams = Vec::new();
        let mut scheds = Vec::new();
        let mut shared = Vec::new();
        let mut output_limits = Vec::new();
        let mut workload_names = Vec::new();

        for (w, mut wl) in workloads.into_iter().enumerate() {
            if wl.output_limit == Some(0) {
                return Err(InitError::InvalidParameter(format!(
                    "workload '{}' has an output limit of 0",
                    wl.name
                )));
            }
            output_limits.push(if policy == MappingPolicy::Replay {
                None
            } else {
                wl.output_limit
            });
            workload_names.push(wl.name.clone());

            for (shard, spec) in std::mem::take(&mut wl.inputs).into_iter().enumerate() {
                if !wl.keeps(shard, spec.tid) {
                    debug!(workload = %wl.name, shard, tid = spec.tid, "input filtered out");
                    continue;
                }
                let index = streams.len();
                let (mut priority, mut binding, mut regions) = wl.resolve_modifiers(spec.tid);

                if !wl.times_of_interest.is_empty() {
                    let map = as_traced.as_ref().ok_or_else(|| {
                        InitError::InvalidParameter(
                            "times_of_interest requires an as-traced map".into(),
                        )
                    })?;
                    if !regions.is_empty() {
                        return Err(InitError::InvalidParameter(format!(
                            "tid {} has both regions_of_interest and times_of_interest",
                            spec.tid
                        )));
                    }
                    regions = map.regions_for(spec.tid, &wl.times_of_interest);
                }
                validate_regions(&regions).map_err(|problem| InitError::RegionInvalid {
                    input: index,
                    tid: spec.tid,
                    problem,
                })?;

                match policy {
                    MappingPolicy::Replay => {
                        priority = 0;
                        binding.clear();
                        regions.clear();
                    }
                    MappingPolicy::Consistent => {
                        binding = BTreeSet::from([index % output_count]);
                    }
                    _ => {
                        if let Some(bad) = binding.iter().find(|&&o| o >= output_count) {
                            warn!(tid = spec.tid, output = bad, "binding names a nonexistent output");
                        }
                    }
                }

                let (presented_tid, presented_pid) = if remap_ids {
                    (workload_scoped_id(w, spec.tid), workload_scoped_id(w, spec.pid))
                } else {
                    (spec.tid, spec.pid)
                };
                let cell = Arc::new(InputShared::default());
                let stream = InputStream::new(
                    index,
                    spec.tid,
                    spec.pid,
                    spec.source,
                    regions,
                    Arc::clone(&cell),
                );
                infos.push(InputInfo {
                    identity: InputIdentity {
                        workload: w,
                        tid: spec.tid,
                        pid: spec.pid,
                        shard,
                    },
                    name: stream.name().to_string(),
                    presented_tid,
                    presented_pid,
                });
                streams.push(Mutex::new(stream));
                scheds.push(InputSched::new(w, spec.tid, priority, binding));
                shared.push(cell);
            }
        }
        if streams.is_empty() {
            return Err(InitError::InvalidParameter("no inputs to schedule".into()));
        }
        let input_count = streams.len();

        if options.read_inputs_in_init {
            for s in &streams {
                s.lock()
                    .read_ahead_to_timestamp()
                    .map_err(|e| InitError::FileReadFailed(e.to_string()))?;
            }
        }
        let virtual_base = shared
            .iter()
            .map(|s| s.timestamp())
            .filter(|&t| t > 0)
            .min()
            .unwrap_or(0);

        // ── Policy ────────────────────────────────────────────────────────────
        let mut output_cpus: Vec<u64> = (0..output_count as u64).collect();
        let replay = match policy {
            MappingPolicy::Replay => {
                let Some(mut source) = replay_schedule else {
                    return Err(InitError::InvalidParameter(
                        "replay mapping requires a recorded schedule".into(),
                    ));
                };
                let recorded = source
                    .load()
                    .map_err(|e| InitError::FileReadFailed(format!("recorded schedule: {e}")))?;
                if recorded.header.output_count as usize != output_count
                    || recorded.header.input_count as usize != input_count
                {
                    return Err(InitError::InvalidParameter(format!(
                        "recorded schedule has {} outputs / {} inputs, run has {} / {}",
                        recorded.header.output_count,
                        recorded.header.input_count,
                        output_count,
                        input_count
                    )));
                }
                info!(entries = recorded.entry_count(), "Replaying recorded schedule");
                Some(ReplayPlan::new(
                    ReplayUnit::Records,
                    recorded.per_output,
                    input_count,
                    false,
                ))
            }
            MappingPolicy::AsRecorded => {
                let map = as_traced.as_ref().ok_or_else(|| {
                    InitError::InvalidParameter("as-recorded mapping requires an as-traced map".into())
                })?;
                if map.cpu_count() != output_count {
                    return Err(InitError::InvalidParameter(format!(
                        "as-traced map has {} cpus, run has {} outputs",
                        map.cpu_count(),
                        output_count
                    )));
                }
                let mut input_of = HashMap::new();
                for (i, info) in infos.iter().enumerate() {
                    input_of.entry(info.identity.tid).or_insert(i);
                }
                output_cpus = map.cpu_ids();
                Some(ReplayPlan::new(
                    ReplayUnit::Instructions,
                    map.to_segments(&input_of),
                    input_count,
                    options.dependency_timestamps,
                ))
            }
            MappingPolicy::AnyOutput | MappingPolicy::Consistent => None,
        };

        let dynamic = replay.is_none();
        let mut core = SchedCore::new(
            &options,
            scheds,
            shared.clone(),
            output_limits,
            output_count,
            replay,
        );
        if dynamic {
            for i in 0..input_count {
                core.place_initial(i);
            }
        }

        // ── Recording ─────────────────────────────────────────────────────────
        let sink = match record_schedule {
            Some(mut sink) => {
                sink.begin(&ScheduleHeader {
                    version: SCHEDULE_FORMAT_VERSION,
                    output_count: output_count as u32,
                    input_count: input_count as u32,
                })
                .map_err(|e| InitError::FileWriteFailed(e.to_string()))?;
                Some(Mutex::new(sink))
            }
            None => None,
        };

        if !kernel_templates.is_empty() {
            debug!("kernel templates attached");
        }
        info!(
            inputs = input_count,
            outputs = output_count,
            mapping = ?policy,
            recording = sink.is_some(),
            "Scheduler initialised"
        );

        Ok(Self {
            virtual_markers: options.virtualize_markers && policy.is_virtual(),
            options,
            infos,
            workload_names,
            inputs: streams,
            shared,
            outputs: (0..output_count)
                .map(|o| Mutex::new(OutputState::new(o)))
                .collect(),
            core: Mutex::new(core),
            templates: kernel_templates,
            sink,
            output_cpus,
            virtual_base,
            clock: AtomicU64::new(0),
            exited: AtomicBool::new(false),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// Options the scheduler was built with.
    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Number of outputs, fixed at construction.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Number of inputs that survived workload filtering.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Handle for driving output `ordinal`.
    pub fn output(&self, ordinal: usize) -> Option<OutputStream<'_, R>> {
        (ordinal < self.outputs.len()).then(|| OutputStream::new(self, ordinal))
    }

    /// Handles for every output, in ordinal order.
    pub fn outputs(&self) -> impl Iterator<Item = OutputStream<'_, R>> + '_ {
        (0..self.outputs.len()).map(move |o| OutputStream::new(self, o))
    }

    /// Workload, thread and shard of `input`, as traced (not remapped).
    pub fn input_identity(&self, input: usize) -> Option<InputIdentity> {
        self.infos.get(input).map(|i| i.identity)
    }

    /// Name of the record source behind `input`, for logs.
    pub fn input_name(&self, input: usize) -> Option<&str> {
        self.infos.get(input).map(|i| i.name.as_str())
    }

    /// Name given to workload ordinal `workload`.
    pub fn workload_name(&self, workload: usize) -> Option<&str> {
        self.workload_names.get(workload).map(String::as_str)
    }

    /// Input currently assigned to each output.  An input never appears
    /// twice.
    pub fn assignments(&self) -> Vec<Option<usize>> {
        self.outputs.iter().map(|o| o.lock().running_input()).collect()
    }

    /// Push every closed schedule entry to durable storage.
    ///
    /// # Errors
    /// `StreamError::RecordFailed` if the sink cannot flush.
    pub fn flush_schedule(&self) -> Result<(), StreamError> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        sink.lock()
            .flush()
            .map_err(|e| StreamError::RecordFailed(e.to_string()))
    }

    /// Current scheduler-wide simulated time.
    pub fn current_time(&self) -> u64 {
        self.clock.load(std::sync::atomic::Ordering::Acquire)
    }

    fn is_dynamic(&self) -> bool {
        matches!(
            self.options.mapping,
            MappingPolicy::AnyOutput | MappingPolicy::Consistent
        )
    }
}

#[cfg(test)]
mod tests;
