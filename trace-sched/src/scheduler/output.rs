/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! What one worker sees when it drives an output.
//!
//! A pull is answered from the first source that has something, in order:
//!
//! ```text
//! pending RecordFailed ─► inactive? Idle ─► speculation frame ─► unread record
//!   ─► early exit? Eof ─► injected kernel records ─► running input
//!                                                      │ (none / must leave)
//!                                                      ▼
//!                                    switch: retire input, choose the next
//! ```
//!
//! Only `switch` takes the scheduler-wide lock; the record path holds the
//! output lock and, briefly, the running input's lock.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use tracing::{debug, info, trace, warn};

use super::dynamic::{self, Selection};
use super::error::{Pull, StreamError};
use super::input::{Fetched, SkipNote, SwitchRequest};
use super::quantum::{block_duration, unschedule_deadline, Quantum};
use super::recorder::EntryLog;
use super::replay::{ReplayStep, ReplayUnit};
use super::speculation::{SpecStack, SpecStep};
use super::state::{InputState, SchedCore};
use super::stats::OutputStats;
use super::Scheduler;
use crate::config::{MappingPolicy, QuantumUnit};
use crate::inject::SwitchKind;
use crate::record::{MarkerKind, TraceHeader, TraceRecord};
use crate::schedule::{ScheduleEntry, TO_END};

// ── Per-output state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Delivered<R> {
    record: R,
    synthetic: bool,
}

/// Why the running input leaves at the next pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leave {
    Preempted,
    Switch(SwitchRequest),
    Eof,
    ReplayDone,
}

#[derive(Debug, Clone, Copy)]
struct Running {
    input: usize,
    quantum: Quantum,
    /// Replay: segment end, in the replay unit.
    replay_end: Option<u64>,
}

pub(crate) struct OutputState<R> {
    ordinal: usize,
    active: bool,
    running: Option<Running>,
    leave: Option<Leave>,
    /// Input whose records this output presented most recently.
    last_input: Option<usize>,
    /// Simulated time of this output's latest pull.
    time: u64,
    /// Active pulls served without a caller-supplied time.
    ticks: u64,
    injected: VecDeque<R>,
    pushback: Option<Delivered<R>>,
    last: Option<Delivered<R>>,
    speculation: SpecStack<Delivered<R>>,
    first_timestamp: u64,
    last_timestamp: u64,
    log: EntryLog,
    pending_error: Option<StreamError>,
    record_failed: bool,
    stats: OutputStats,
}

impl<R: TraceRecord> OutputState<R> {
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            active: true,
            running: None,
            leave: None,
            last_input: None,
            time: 0,
            ticks: 0,
            injected: VecDeque::new(),
            pushback: None,
            last: None,
            speculation: SpecStack::default(),
            first_timestamp: 0,
            last_timestamp: 0,
            log: EntryLog::new(ordinal),
            pending_error: None,
            record_failed: false,
            stats: OutputStats::default(),
        }
    }

    pub fn running_input(&self) -> Option<usize> {
        self.running.map(|r| r.input)
    }

    fn hand_out(&mut self, record: R, synthetic: bool) -> Pull<R> {
        self.stats.records += 1;
        if synthetic {
            self.stats.synthetic_records += 1;
        } else if record.is_instruction() {
            self.stats.instructions += 1;
        }
        self.last = Some(Delivered {
            record: record.clone(),
            synthetic,
        });
        Pull::Record(record)
    }

    /// Present a record a second time (unread, queued across speculation).
    fn hand_out_again(&mut self, d: Delivered<R>) -> Pull<R> {
        self.stats.records += 1;
        let record = d.record.clone();
        self.last = Some(d);
        Pull::Record(record)
    }

    fn is_last_synthetic(&self) -> bool {
        self.last.as_ref().is_some_and(|d| d.synthetic)
    }
}

/// Result of one scheduling decision.
enum Switched<R> {
    Running,
    /// Something changed underneath (a replayed skip); decide again.
    Retry,
    Status(Pull<R>),
}

enum Choice<R> {
    Run {
        input: usize,
        replay_end: Option<u64>,
        stolen: bool,
    },
    Skip {
        input: usize,
        to: u64,
        boundary: bool,
    },
    Status(Pull<R>),
}

// ── Scheduler: record path ────────────────────────────────────────────────────

impl<R: TraceRecord> Scheduler<R> {
    fn replay_unit(&self) -> Option<ReplayUnit> {
        match self.options.mapping {
            MappingPolicy::Replay => Some(ReplayUnit::Records),
            MappingPolicy::AsRecorded => Some(ReplayUnit::Instructions),
            MappingPolicy::AnyOutput | MappingPolicy::Consistent => None,
        }
    }

    fn pull(&self, ordinal: usize, time: Option<u64>) -> Result<Pull<R>, StreamError> {
        let mut guard = self.outputs[ordinal].lock();
        let out = &mut *guard;
        let now = match time {
            Some(t) => {
                self.clock.fetch_max(t, Ordering::AcqRel);
                t
            }
            None => {
                // an inactive output does not move time forward
                if out.active {
                    out.ticks += 1;
                    self.clock.fetch_max(out.ticks, Ordering::AcqRel).max(out.ticks)
                } else {
                    self.clock.load(Ordering::Acquire)
                }
            }
        };
        out.time = out.time.max(now);

        if let Some(err) = out.pending_error.take() {
            return Err(err);
        }
        if !out.active {
            out.stats.idle_calls += 1;
            return Ok(Pull::Idle);
        }
        if let Some(step) = out.speculation.next() {
            return Ok(match step {
                SpecStep::Pending(d) => out.hand_out_again(d),
                SpecStep::Synthetic { pc } => {
                    let (tid, pid) = self.current_ids(out);
                    out.hand_out(R::instruction(pc, tid, pid), true)
                }
            });
        }
        if let Some(d) = out.pushback.take() {
            return Ok(out.hand_out_again(d));
        }
        if self.exited.load(Ordering::Acquire) {
            self.stop_on_exit(out);
            return Ok(Pull::Eof);
        }
        if let Some(rec) = out.injected.pop_front() {
            out.stats.injected_records += 1;
            return Ok(out.hand_out(rec, true));
        }

        loop {
            if out.running.is_none() || out.leave.is_some() {
                match self.switch(out)? {
                    Switched::Running => {}
                    Switched::Retry => continue,
                    Switched::Status(p) => return Ok(p),
                }
                if let Some(rec) = out.injected.pop_front() {
                    out.stats.injected_records += 1;
                    return Ok(out.hand_out(rec, true));
                }
            }
            let Some(run) = out.running else {
                continue;
            };
            let input = run.input;
            let mut stream = self.inputs[input].lock();

            if let Some(end) = run.replay_end {
                let done = match self.replay_unit() {
                    Some(ReplayUnit::Instructions) => stream.reached_instruction(end)?,
                    _ => stream.reached_record(end),
                };
                if done {
                    trace!(output = ordinal, input, end, "replayed segment complete");
                    out.leave = Some(Leave::ReplayDone);
                    continue;
                }
            }
            if self.is_dynamic()
                && run.quantum.expired(&self.options, out.time)
                && stream.next_is_instruction()?
            {
                trace!(output = ordinal, input, "quantum expired");
                out.leave = Some(Leave::Preempted);
                continue;
            }

            let fetched = stream.next_element(&self.options)?;
            let notes = stream.take_skip_notes();
            drop(stream);
            if !notes.is_empty() {
                self.record_skips(out, input, &notes);
            }

            match fetched {
                Fetched::Record {
                    element,
                    wake,
                    syscall,
                } => {
                    if !element.synthetic && element.record.is_instruction() {
                        if let Some(r) = out.running.as_mut() {
                            r.quantum.note_instruction();
                        }
                    }
                    if let Some(tid) = wake {
                        self.wake_tid(input, tid);
                    }
                    let record = self.present(out, input, element.record);
                    if let Some(number) = syscall {
                        let info = &self.infos[input];
                        if let Some(seq) = self.templates.syscall_sequence(
                            number,
                            info.presented_tid,
                            info.presented_pid,
                        ) {
                            trace!(output = ordinal, number, len = seq.len(), "syscall template");
                            out.injected.extend(seq);
                        }
                    }
                    return Ok(out.hand_out(record, element.synthetic));
                }
                // replayed policies follow the plan, not the trace's requests
                Fetched::Switch(req) if self.is_dynamic() => out.leave = Some(Leave::Switch(req)),
                Fetched::Switch(_) => {}
                Fetched::Eof => out.leave = Some(Leave::Eof),
            }
        }
    }

    /// Identifiers for synthetic speculative instructions.
    fn current_ids(&self, out: &OutputState<R>) -> (i64, i64) {
        if let Some(run) = out.running {
            let info = &self.infos[run.input];
            return (info.presented_tid, info.presented_pid);
        }
        out.last
            .as_ref()
            .map_or((-1, -1), |d| (d.record.tid(), d.record.pid()))
    }

    /// Rewrite identifiers and markers for presentation on `out`.
    fn present(&self, out: &mut OutputState<R>, input: usize, mut record: R) -> R {
        let info = &self.infos[input];
        if info.presented_tid != info.identity.tid || info.presented_pid != info.identity.pid {
            record.set_ids(info.presented_tid, info.presented_pid);
        }
        match record.marker_info() {
            Some((MarkerKind::Timestamp, value)) => {
                let shown = if self.virtual_markers {
                    let mut v = self.virtual_base + out.time / self.options.time_units_per_us;
                    if out.last_timestamp > 0 {
                        v = v.max(out.last_timestamp + 1);
                    }
                    record.set_marker_value(v);
                    v
                } else {
                    value
                };
                if out.first_timestamp == 0 {
                    out.first_timestamp = shown;
                }
                out.last_timestamp = shown;
            }
            Some((MarkerKind::CpuId, _))
                if self.virtual_markers || self.options.mapping == MappingPolicy::AsRecorded =>
            {
                record.set_marker_value(self.output_cpus[out.ordinal]);
            }
            _ => {}
        }
        record
    }

    fn wake_tid(&self, input: usize, tid: i64) {
        if !self.is_dynamic() {
            return;
        }
        let workload = self.infos[input].identity.workload;
        let mut core = self.core.lock();
        match core.input_by_tid(workload, tid) {
            Some(target) => {
                core.wake(target);
            }
            None => debug!(input, tid, "wake-up names an unknown thread"),
        }
    }

    // ── Recording ─────────────────────────────────────────────────────────────

    fn record_skips(&self, out: &mut OutputState<R>, input: usize, notes: &[SkipNote]) {
        let shared = &self.shared[input];
        let mut closed = Vec::new();
        for note in notes {
            closed.extend(out.log.close(note.from));
            closed.push(out.log.skip(input, shared.next_seq(), note.to, note.boundary));
            let resume = if note.to == TO_END { note.from } else { note.to };
            out.log
                .open_run(input, shared.next_seq(), resume, shared.timestamp());
        }
        self.write_entries(out, closed);
    }

    /// Append closed entries to the sink.  The first failure is reported on
    /// the output's next pull; later entries of this output are dropped.
    fn write_entries(&self, out: &mut OutputState<R>, entries: Vec<ScheduleEntry>) {
        let Some(sink) = &self.sink else {
            return;
        };
        if entries.is_empty() || out.record_failed {
            return;
        }
        let mut sink = sink.lock();
        for entry in &entries {
            if let Err(e) = sink.append(entry) {
                warn!(output = out.ordinal, error = %e, "schedule recording failed, scheduling continues");
                out.record_failed = true;
                out.pending_error = Some(StreamError::RecordFailed(e.to_string()));
                return;
            }
        }
    }

    // ── Switching ─────────────────────────────────────────────────────────────

    fn switch(&self, out: &mut OutputState<R>) -> Result<Switched<R>, StreamError> {
        let o = out.ordinal;
        let now = out.time;
        let mut guard = self.core.lock();
        let core = &mut *guard;

        let mut direct = None;
        let mut requeued = None;
        let left = out.running.take().map(|run| run.input);
        if let Some(input) = left {
            core.release(input, o, now);
            match out.leave.take() {
                Some(Leave::Preempted) | None => {
                    out.stats.preemptions += 1;
                    core.enqueue(input, Some(o));
                    requeued = Some(input);
                }
                Some(Leave::Switch(req)) => {
                    direct = self.retire_switched(core, o, input, req, now);
                    if direct.is_none() {
                        out.stats.blocking_switches += 1;
                    }
                }
                Some(Leave::Eof) => {
                    if core.mark_eof(input, &self.options) {
                        self.exited.store(true, Ordering::Release);
                    }
                    if let Some(plan) = core.replay.as_mut() {
                        plan.finish(o);
                    }
                }
                Some(Leave::ReplayDone) => {
                    core.inputs[input].state = InputState::Ready;
                    if let Some(plan) = core.replay.as_mut() {
                        plan.finish(o);
                    }
                }
            }
        }

        let choice = if core.replay.is_some() {
            self.replay_choice(core, o)?
        } else {
            match dynamic::select(core, &self.options, o, now, direct)? {
                Selection::Picked { input, stolen } => Choice::Run {
                    input,
                    replay_end: None,
                    stolen,
                },
                Selection::Wait => Choice::Status(Pull::Wait),
                Selection::Idle => Choice::Status(Pull::Idle),
                Selection::Eof => Choice::Status(Pull::Eof),
            }
        };

        // The entry of the input that left stays open only if it runs on.
        let continuing = matches!(choice, Choice::Run { input, .. } if requeued == Some(input));
        let stays_idle = matches!(choice, Choice::Status(Pull::Idle)) && out.log.is_idle();
        let mut closed = Vec::new();
        if !continuing && !stays_idle {
            let end = left.map_or(0, |i| self.shared[i].record_ordinal());
            closed.extend(out.log.close(end));
        }

        let status = match choice {
            Choice::Run {
                input,
                replay_end,
                stolen,
            } => {
                if core.inputs[input]
                    .last_run
                    .is_some_and(|l| l.output != o)
                {
                    out.stats.migrations += 1;
                }
                if stolen {
                    out.stats.steals += 1;
                }
                if direct == Some(input) {
                    out.stats.direct_switches += 1;
                }
                core.take(input, o);
                if continuing {
                    trace!(output = o, input, "input keeps its output");
                } else {
                    self.begin_run(out, core, input);
                }
                out.running = Some(Running {
                    input,
                    quantum: Quantum::start(now),
                    replay_end,
                });
                Switched::Running
            }
            Choice::Skip {
                input,
                to,
                boundary,
            } => {
                drop(guard);
                self.write_entries(out, closed);
                self.inputs[input].lock().skip_to_record(to, boundary)?;
                debug!(output = o, input, to, boundary, "replayed region skip");
                return Ok(Switched::Retry);
            }
            Choice::Status(p) => {
                match p {
                    Pull::Idle => {
                        out.log.open_idle(now);
                        out.stats.idle_calls += 1;
                    }
                    Pull::Wait => out.stats.wait_calls += 1,
                    Pull::Eof if left.is_some() => debug!(output = o, "output at EOF"),
                    _ => {}
                }
                Switched::Status(p)
            }
        };
        drop(guard);
        self.write_entries(out, closed);
        Ok(status)
    }

    /// Bookkeeping for an input newly placed on `out`.
    fn begin_run(&self, out: &mut OutputState<R>, core: &SchedCore, input: usize) {
        let shared = &self.shared[input];
        out.log.open_run(
            input,
            shared.next_seq(),
            shared.record_ordinal(),
            core.timestamp_of(input),
        );
        if let Some(prev) = out.last_input.filter(|&p| p != input) {
            out.stats.switches += 1;
            let kind = SwitchKind::between(
                self.infos[prev].identity.pid,
                self.infos[input].identity.pid,
            );
            let info = &self.infos[input];
            if let Some(seq) =
                self.templates
                    .switch_sequence(kind, info.presented_tid, info.presented_pid)
            {
                trace!(output = out.ordinal, ?kind, len = seq.len(), "context switch template");
                out.injected.extend(seq);
            }
        }
        debug!(output = out.ordinal, input, tid = self.infos[input].identity.tid, "input assigned");
        out.last_input = Some(input);
    }

    /// Take `input` off the ready set as the trace requested.  Returns the
    /// direct-switch target, if any.
    fn retire_switched(
        &self,
        core: &mut SchedCore,
        output: usize,
        input: usize,
        req: SwitchRequest,
        now: u64,
    ) -> Option<usize> {
        let opts = &self.options;
        match req {
            SwitchRequest::Block { latency_us } => {
                let until = now.saturating_add(block_duration(opts, latency_us));
                debug!(output, input, latency_us, until, "input blocked");
                core.block(input, until);
                None
            }
            SwitchRequest::Unschedule { timeout_us } => {
                let until = unschedule_deadline(opts, timeout_us, now);
                if core.unschedule(input, until, output) {
                    debug!(output, input, ?until, "input unscheduled");
                }
                None
            }
            SwitchRequest::DirectSwitch {
                target_tid,
                timeout_us,
            } => {
                let target = core.input_by_tid(core.inputs[input].workload, target_tid);
                if target.is_none() {
                    warn!(output, input, target_tid, "direct switch target not found");
                }
                core.unschedule(input, unschedule_deadline(opts, timeout_us, now), output);
                target
            }
        }
    }

    fn replay_choice(&self, core: &mut SchedCore, o: usize) -> Result<Choice<R>, StreamError> {
        let inputs = &core.inputs;
        let Some(plan) = core.replay.as_mut() else {
            return Ok(Choice::Status(Pull::Eof));
        };
        let step = plan.next(o, |i| {
            matches!(inputs[i].state, InputState::Running(x) if x != o)
        });
        Ok(match step {
            ReplayStep::Run { input, start, end } => {
                if plan.unit == ReplayUnit::Records {
                    let at = self.shared[input].record_ordinal();
                    if at != start {
                        return Err(StreamError::Invalid(format!(
                            "replay expects input {input} at record {start}, found {at}"
                        )));
                    }
                }
                Choice::Run {
                    input,
                    replay_end: (end != TO_END).then_some(end),
                    stolen: false,
                }
            }
            ReplayStep::Skip {
                input,
                to,
                boundary,
            } => Choice::Skip {
                input,
                to,
                boundary,
            },
            ReplayStep::Idle => Choice::Status(Pull::Idle),
            ReplayStep::Wait => Choice::Status(Pull::Wait),
            ReplayStep::Eof => Choice::Status(Pull::Eof),
        })
    }

    /// Early exit: give up the running input and close the log.
    fn stop_on_exit(&self, out: &mut OutputState<R>) {
        let left = out.running.take().map(|r| r.input);
        if let Some(input) = left {
            self.core.lock().release(input, out.ordinal, out.time);
        }
        out.leave = None;
        out.injected.clear();
        let end = left.map_or(0, |i| self.shared[i].record_ordinal());
        let closed: Vec<ScheduleEntry> = out.log.close(end).into_iter().collect();
        self.write_entries(out, closed);
    }

    fn set_active(&self, o: usize, active: bool) -> Result<(), StreamError> {
        if !self.is_dynamic() {
            return Err(StreamError::NotImplemented(format!(
                "set_active under {:?} mapping",
                self.options.mapping
            )));
        }
        let mut guard = self.outputs[o].lock();
        let out = &mut *guard;
        if out.active == active {
            return Ok(());
        }
        out.active = active;
        let mut closed = Vec::new();
        {
            let mut core = self.core.lock();
            core.active[o] = active;
            if !active {
                let left = out.running.take().map(|r| r.input);
                if let Some(input) = left {
                    core.release(input, o, out.time);
                    core.enqueue(input, None);
                }
                core.drain_output(o);
                let end = left.map_or(0, |i| self.shared[i].record_ordinal());
                closed.extend(out.log.close(end));
                out.leave = None;
                out.injected.clear();
            }
        }
        info!(output = o, active, "output activity changed");
        self.write_entries(out, closed);
        Ok(())
    }
}

// ── OutputStream ──────────────────────────────────────────────────────────────

/// Handle through which one worker drives one output.
///
/// Handles are cheap; any number may exist, but each output is meant to be
/// pulled by a single worker at a time.
pub struct OutputStream<'a, R: TraceRecord> {
    sched: &'a Scheduler<R>,
    ordinal: usize,
}

impl<'a, R: TraceRecord> OutputStream<'a, R> {
    pub(crate) fn new(sched: &'a Scheduler<R>, ordinal: usize) -> Self {
        Self { sched, ordinal }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Next record at the scheduler-wide clock.
    ///
    /// Each active output counts its own pulls; the clock is the largest of
    /// those counts, so time advances with the busiest output and is the
    /// same for every cross-output comparison.
    ///
    /// # Errors
    /// `StreamError::NotImplemented` when quanta are time-based under a
    /// dynamic mapping; use [`next_record_at`](Self::next_record_at).
    pub fn next_record(&self) -> Result<Pull<R>, StreamError> {
        if self.sched.options.quantum_unit == QuantumUnit::Time && self.sched.is_dynamic() {
            return Err(StreamError::NotImplemented(
                "time-based quanta require next_record_at".into(),
            ));
        }
        self.sched.pull(self.ordinal, None)
    }

    /// Next record at simulated time `time` (in time units).
    pub fn next_record_at(&self, time: u64) -> Result<Pull<R>, StreamError> {
        self.sched.pull(self.ordinal, Some(time))
    }

    /// Present the last record again on the next pull.
    pub fn unread_last_record(&self) -> Result<(), StreamError> {
        let mut out = self.sched.outputs[self.ordinal].lock();
        if out.speculation.is_active() {
            return Err(StreamError::Invalid("cannot unread during speculation".into()));
        }
        if out.pushback.is_some() {
            return Err(StreamError::Invalid("last record already unread".into()));
        }
        let Some(last) = out.last.clone() else {
            return Err(StreamError::Invalid("no record to unread".into()));
        };
        out.pushback = Some(last);
        Ok(())
    }

    /// Divert this output to synthetic instructions starting at `addr`.
    ///
    /// With `queue_current_record` the last record is presented again once
    /// the matching [`stop_speculation`](Self::stop_speculation) resumes the
    /// real stream.
    pub fn start_speculation(&self, addr: u64, queue_current_record: bool) -> Result<(), StreamError> {
        let mut out = self.sched.outputs[self.ordinal].lock();
        let queued = if queue_current_record {
            if out.pushback.is_some() {
                return Err(StreamError::Invalid(
                    "cannot queue the current record right after unread".into(),
                ));
            }
            let Some(last) = out.last.clone() else {
                return Err(StreamError::Invalid("no current record to queue".into()));
            };
            Some(last)
        } else {
            None
        };
        out.speculation.start(addr, queued);
        debug!(output = self.ordinal, addr, depth = out.speculation.depth(), "speculation started");
        Ok(())
    }

    pub fn stop_speculation(&self) -> Result<(), StreamError> {
        let mut out = self.sched.outputs[self.ordinal].lock();
        match out.speculation.stop() {
            Err(()) => Err(StreamError::Invalid(
                "stop_speculation without a matching start".into(),
            )),
            Ok(queued) => {
                if let Some(d) = queued {
                    out.pushback = Some(d);
                }
                debug!(output = self.ordinal, depth = out.speculation.depth(), "speculation stopped");
                Ok(())
            }
        }
    }

    /// Activate or deactivate the output.  Deactivation hands the running
    /// input and the ready queue to the other outputs; the output answers
    /// `Idle` until reactivated.
    pub fn set_active(&self, active: bool) -> Result<(), StreamError> {
        self.sched.set_active(self.ordinal, active)
    }

    pub fn is_active(&self) -> bool {
        self.sched.outputs[self.ordinal].lock().active
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// Input currently assigned to this output.
    pub fn input_ordinal(&self) -> Option<usize> {
        self.sched.outputs[self.ordinal].lock().running_input()
    }

    pub fn workload_ordinal(&self) -> Option<usize> {
        self.input_ordinal()
            .map(|i| self.sched.infos[i].identity.workload)
    }

    /// Thread id of the running input as presented.
    pub fn tid(&self) -> Option<i64> {
        self.input_ordinal().map(|i| self.sched.infos[i].presented_tid)
    }

    pub fn shard_ordinal(&self) -> Option<usize> {
        self.input_ordinal().map(|i| self.sched.infos[i].identity.shard)
    }

    /// Records consumed by the running input, or presented by this output
    /// when ordinals are not input-local.
    pub fn record_ordinal(&self) -> u64 {
        let out = self.sched.outputs[self.ordinal].lock();
        if self.sched.options.local_ordinals {
            out.running_input()
                .map_or(0, |i| self.sched.shared[i].record_ordinal())
        } else {
            out.stats.records
        }
    }

    pub fn instruction_ordinal(&self) -> u64 {
        let out = self.sched.outputs[self.ordinal].lock();
        if self.sched.options.local_ordinals {
            out.running_input()
                .map_or(0, |i| self.sched.shared[i].instr_ordinal())
        } else {
            out.stats.instructions
        }
    }

    /// First timestamp presented on this output; 0 if none yet.
    pub fn first_timestamp(&self) -> u64 {
        self.sched.outputs[self.ordinal].lock().first_timestamp
    }

    pub fn last_timestamp(&self) -> u64 {
        self.sched.outputs[self.ordinal].lock().last_timestamp
    }

    /// Header of the running input's trace.
    pub fn header(&self) -> TraceHeader {
        match self.input_ordinal() {
            Some(i) => self.sched.inputs[i].lock().header(),
            None => TraceHeader::default(),
        }
    }

    pub fn is_record_synthetic(&self) -> bool {
        self.sched.outputs[self.ordinal].lock().is_last_synthetic()
    }

    /// Cpu id presented in this output's cpu-id markers.
    pub fn cpuid(&self) -> u64 {
        self.sched.output_cpus[self.ordinal]
    }

    pub fn stats(&self) -> OutputStats {
        self.sched.outputs[self.ordinal].lock().stats
    }
}
