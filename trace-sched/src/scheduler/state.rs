/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cross-output scheduling state, guarded by the scheduler-wide lock.
//!
//! ```text
//!            enqueue               take
//!  Blocked ──────────►  Ready  ───────────►  Running(out)
//!  Unscheduled ◄─┐        ▲                      │
//!                │        └──── release ◄────────┤
//!                └──────── unschedule / block ◄──┤
//!                                    Eof ◄───────┘
//! ```
//!
//! Everything here is bookkeeping only: no record is read while the lock is
//! held.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::input::InputShared;
use super::queue::ReadyQueues;
use super::quantum::LastRun;
use super::replay::ReplayPlan;
use crate::config::{MappingPolicy, SchedulerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputState {
    Ready,
    Running(usize),
    /// Off every output until the modelled syscall completes.
    Blocked { until: u64 },
    /// Removed by the trace itself; `None` = until woken.
    Unscheduled { until: Option<u64> },
    Eof,
}

#[derive(Debug)]
pub(crate) struct InputSched {
    pub workload: usize,
    pub tid: i64,
    pub priority: i32,
    pub binding: BTreeSet<usize>,
    pub state: InputState,
    pub last_run: Option<LastRun>,
    /// A wake-up arrived while the input was still runnable.
    pub skip_next_unschedule: bool,
}

impl InputSched {
    pub fn new(workload: usize, tid: i64, priority: i32, binding: BTreeSet<usize>) -> Self {
        Self {
            workload,
            tid,
            priority,
            binding,
            state: InputState::Ready,
            last_run: None,
            skip_next_unschedule: false,
        }
    }

    pub fn allows(&self, output: usize) -> bool {
        self.binding.is_empty() || self.binding.contains(&output)
    }
}

pub(crate) struct SchedCore {
    pub policy: MappingPolicy,
    pub inputs: Vec<InputSched>,
    pub shared: Vec<Arc<InputShared>>,
    pub queues: ReadyQueues,
    shared_queue: bool,
    /// `(wake time, input)` for blocked and timed-unscheduled inputs.
    sleepers: BTreeSet<(u64, usize)>,
    by_tid: HashMap<(usize, i64), usize>,
    pub live: usize,
    total: usize,
    running_per_workload: Vec<usize>,
    output_limits: Vec<Option<usize>>,
    pub active: Vec<bool>,
    next_rebalance: u64,
    pub exited_early: bool,
    pub rng: ChaCha8Rng,
    pub replay: Option<ReplayPlan>,
}

impl SchedCore {
    pub fn new(
        opts: &SchedulerOptions,
        inputs: Vec<InputSched>,
        shared: Vec<Arc<InputShared>>,
        output_limits: Vec<Option<usize>>,
        output_count: usize,
        replay: Option<ReplayPlan>,
    ) -> Self {
        let shared_queue = opts.shared_ready_queue && opts.mapping == MappingPolicy::AnyOutput;
        let queue_count = if shared_queue { 1 } else { output_count };
        let mut by_tid = HashMap::new();
        for (i, inp) in inputs.iter().enumerate() {
            by_tid.entry((inp.workload, inp.tid)).or_insert(i);
        }
        let total = inputs.len();
        Self {
            policy: opts.mapping,
            queues: ReadyQueues::new(queue_count, total, opts.dependency_timestamps),
            shared_queue,
            sleepers: BTreeSet::new(),
            by_tid,
            live: total,
            total,
            running_per_workload: vec![0; output_limits.len()],
            output_limits,
            active: vec![true; output_count],
            next_rebalance: opts.scale_us(opts.rebalance_period_us),
            exited_early: false,
            rng: ChaCha8Rng::seed_from_u64(opts.rng_seed),
            replay,
            inputs,
            shared,
        }
    }

    pub fn output_count(&self) -> usize {
        self.active.len()
    }

    pub fn timestamp_of(&self, input: usize) -> u64 {
        self.shared[input].timestamp()
    }

    pub fn input_by_tid(&self, workload: usize, tid: i64) -> Option<usize> {
        self.by_tid.get(&(workload, tid)).copied()
    }

    // ── Queue placement ───────────────────────────────────────────────────────

    pub fn queue_for(&self, output: usize) -> usize {
        if self.shared_queue {
            0
        } else {
            output
        }
    }

    pub fn has_active_allowed(&self, input: usize) -> bool {
        let inp = &self.inputs[input];
        (0..self.output_count()).any(|o| self.active[o] && inp.allows(o))
    }

    /// Queue an input should wait in, preferring `preferred`.
    fn home_queue(&self, input: usize, preferred: Option<usize>) -> usize {
        if self.shared_queue {
            return 0;
        }
        let n = self.output_count();
        let inp = &self.inputs[input];
        if let Some(p) = preferred.filter(|&p| p < n && self.active[p] && inp.allows(p)) {
            return p;
        }
        let least_loaded = (0..n)
            .filter(|&o| self.active[o] && inp.allows(o))
            .min_by_key(|&o| (self.queues.len(o), o));
        if let Some(o) = least_loaded {
            return o;
        }
        // No active output may run it: park it where it would belong.
        preferred
            .filter(|&p| p < n && inp.allows(p))
            .or_else(|| inp.binding.iter().copied().find(|&o| o < n))
            .unwrap_or(0)
    }

    pub fn enqueue(&mut self, input: usize, preferred: Option<usize>) {
        let queue = self.home_queue(input, preferred);
        let ts = self.timestamp_of(input);
        let inp = &mut self.inputs[input];
        inp.state = InputState::Ready;
        self.queues.push(input, queue, inp.priority, ts);
    }

    /// Initial placement: round-robin over allowed outputs.
    pub fn place_initial(&mut self, input: usize) {
        let n = self.output_count();
        self.enqueue(input, Some(input % n));
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    pub fn under_output_limit(&self, input: usize) -> bool {
        let w = self.inputs[input].workload;
        self.output_limits[w].map_or(true, |limit| self.running_per_workload[w] < limit)
    }

    pub fn take(&mut self, input: usize, output: usize) {
        self.queues.remove(input);
        let inp = &mut self.inputs[input];
        inp.state = InputState::Running(output);
        self.running_per_workload[inp.workload] += 1;
    }

    pub fn release(&mut self, input: usize, output: usize, now: u64) {
        let inp = &mut self.inputs[input];
        inp.last_run = Some(LastRun {
            output,
            end_time: now,
        });
        let w = inp.workload;
        self.running_per_workload[w] = self.running_per_workload[w].saturating_sub(1);
    }

    pub fn block(&mut self, input: usize, until: u64) {
        self.inputs[input].state = InputState::Blocked { until };
        self.sleepers.insert((until, input));
    }

    /// Returns `false` if a pending wake-up cancelled the unschedule and
    /// the input was queued instead.
    pub fn unschedule(&mut self, input: usize, until: Option<u64>, preferred: usize) -> bool {
        if std::mem::take(&mut self.inputs[input].skip_next_unschedule) {
            debug!(input, "unschedule cancelled by earlier wake-up");
            self.enqueue(input, Some(preferred));
            return false;
        }
        self.inputs[input].state = InputState::Unscheduled { until };
        if let Some(t) = until {
            self.sleepers.insert((t, input));
        }
        true
    }

    /// Wake an unscheduled input.  A runnable target remembers the wake-up
    /// so that its next unschedule is a no-op.
    pub fn wake(&mut self, input: usize) -> bool {
        match self.inputs[input].state {
            InputState::Unscheduled { until } => {
                if let Some(t) = until {
                    self.sleepers.remove(&(t, input));
                }
                let preferred = self.inputs[input].last_run.map(|l| l.output);
                self.enqueue(input, preferred);
                debug!(input, "input woken");
                true
            }
            InputState::Ready | InputState::Running(_) => {
                self.inputs[input].skip_next_unschedule = true;
                false
            }
            InputState::Blocked { .. } | InputState::Eof => false,
        }
    }

    /// Move every sleeper whose time has come back to a ready queue.
    pub fn wake_expired(&mut self, now: u64) {
        while let Some(&(until, input)) = self.sleepers.first() {
            if until > now {
                break;
            }
            self.sleepers.pop_first();
            let preferred = self.inputs[input].last_run.map(|l| l.output);
            self.enqueue(input, preferred);
        }
    }

    /// If every live input is unscheduled nothing can ever wake them: wake
    /// all of them.  Returns `true` if anything was woken.
    pub fn wake_all_if_stuck(&mut self) -> bool {
        let stuck = self.live > 0
            && self.inputs.iter().all(|i| {
                matches!(i.state, InputState::Unscheduled { .. } | InputState::Eof)
            });
        if !stuck {
            return false;
        }
        let sleeping: Vec<usize> = (0..self.inputs.len())
            .filter(|&i| matches!(self.inputs[i].state, InputState::Unscheduled { .. }))
            .collect();
        info!(count = sleeping.len(), "every live input is unscheduled, waking all");
        for input in sleeping {
            self.wake(input);
        }
        true
    }

    /// Record end of input.  Returns `true` if this triggers early exit.
    pub fn mark_eof(&mut self, input: usize, opts: &SchedulerOptions) -> bool {
        if self.inputs[input].state == InputState::Eof {
            return false;
        }
        self.inputs[input].state = InputState::Eof;
        self.queues.remove(input);
        self.live = self.live.saturating_sub(1);
        debug!(input, live = self.live, total = self.total, "input at EOF");

        let early = self.policy == MappingPolicy::AnyOutput
            && self.live > 0
            && (self.live as f64 / self.total as f64) <= opts.exit_if_fraction_inputs_left;
        if early && !self.exited_early {
            self.exited_early = true;
            info!(
                live = self.live,
                total = self.total,
                fraction = opts.exit_if_fraction_inputs_left,
                "few inputs left, ending run early"
            );
        }
        early
    }

    /// `true` while some unfinished input could still run on `output`.
    pub fn has_work_for(&self, output: usize) -> bool {
        self.inputs
            .iter()
            .any(|i| i.state != InputState::Eof && i.allows(output))
    }

    /// Ready input that no active output may run.
    pub fn stranded_input(&self) -> Option<usize> {
        self.queues
            .all_inputs()
            .find(|&i| !self.has_active_allowed(i))
    }

    // ── Load balancing ────────────────────────────────────────────────────────

    pub fn maybe_rebalance(&mut self, opts: &SchedulerOptions, now: u64) {
        if self.shared_queue || self.policy != MappingPolicy::AnyOutput || now < self.next_rebalance
        {
            return;
        }
        self.next_rebalance = now.saturating_add(opts.scale_us(opts.rebalance_period_us).max(1));
        let inputs = &self.inputs;
        self.queues
            .rebalance(&self.active, |input, queue| inputs[input].allows(queue));
    }

    /// Output `output` went inactive: hand its queue to the others.
    pub fn drain_output(&mut self, output: usize) {
        if self.shared_queue {
            return;
        }
        let inputs = &self.inputs;
        let moved = self
            .queues
            .drain_queue(output, &self.active, |input, queue| inputs[input].allows(queue));
        debug!(output, moved, "inactive output queue redistributed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
