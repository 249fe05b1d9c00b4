/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Record-side state of one input.
//!
//! [`InputStream`] wraps the input's [`RecordSource`] with everything that
//! is decided by looking at the records themselves:
//!
//! | Concern | Handled here |
//! |---|---|
//! | read-ahead / push-back | `queue` in front of the source |
//! | ordinals | record and instruction counters, published through [`InputShared`] |
//! | regions of interest | skip to the next region, synthetic boundary / timestamp / cpu records |
//! | syscalls | latency and annotation tracking, turned into a [`SwitchRequest`] at completion |
//! | header | learned from header markers |
//!
//! Which output runs the input, and when, is decided elsewhere; this module
//! never takes the scheduler-wide lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::error::StreamError;
use crate::config::SchedulerOptions;
use crate::record::{MarkerKind, TraceHeader, TraceRecord};
use crate::schedule::TO_END;
use crate::source::RecordSource;
use crate::workload::Region;

// ── Lock-free view ────────────────────────────────────────────────────────────

/// Counters readable without the input's lock.
#[derive(Debug, Default)]
pub(crate) struct InputShared {
    timestamp: AtomicU64,
    record_ordinal: AtomicU64,
    instr_ordinal: AtomicU64,
    seq: AtomicU32,
}

impl InputShared {
    /// Latest known timestamp (delivered or read ahead); 0 if none.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub fn record_ordinal(&self) -> u64 {
        self.record_ordinal.load(Ordering::Acquire)
    }

    pub fn instr_ordinal(&self) -> u64 {
        self.instr_ordinal.load(Ordering::Acquire)
    }

    /// Sequence number for the next recorded entry of this input.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::AcqRel)
    }
}

// ── Fetch results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct Element<R> {
    pub record: R,
    pub synthetic: bool,
}

impl<R> Element<R> {
    fn real(record: R) -> Self {
        Self {
            record,
            synthetic: false,
        }
    }

    fn synthetic(record: R) -> Self {
        Self {
            record,
            synthetic: true,
        }
    }
}

/// Why the input must leave its output before the next record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwitchRequest {
    Block { latency_us: u64 },
    Unschedule { timeout_us: Option<u64> },
    DirectSwitch { target_tid: i64, timeout_us: Option<u64> },
}

#[derive(Debug)]
pub(crate) enum Fetched<R> {
    Record {
        element: Element<R>,
        /// Tid named by a `SyscallSchedule` marker.
        wake: Option<i64>,
        /// Syscall number of a `Syscall` marker.
        syscall: Option<u64>,
    },
    /// The record stays queued; it is delivered when the input runs again.
    Switch(SwitchRequest),
    Eof,
}

/// A region skip, in record ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SkipNote {
    pub from: u64,
    /// [`TO_END`] when the input ends after its last region.
    pub to: u64,
    pub boundary: bool,
}

#[derive(Debug, Default)]
struct SyscallState {
    number: Option<u64>,
    pre_timestamp: u64,
    maybe_blocking: bool,
    timeout_us: Option<u64>,
    unschedule: bool,
    direct_target: Option<i64>,
}

// ── InputStream ───────────────────────────────────────────────────────────────

pub(crate) struct InputStream<R> {
    index: usize,
    tid: i64,
    pid: i64,
    source: Box<dyn RecordSource<R>>,
    source_done: bool,
    /// Delivered before anything else is read from the source.
    queue: VecDeque<Element<R>>,
    /// No more reads; EOF once `queue` drains.
    finished: bool,

    regions: Vec<Region>,
    region: usize,
    started: bool,
    windows: u64,
    skip_notes: Vec<SkipNote>,

    record_ordinal: u64,
    instr_ordinal: u64,
    last_timestamp: u64,
    header: TraceHeader,
    syscall: Option<SyscallState>,

    shared: Arc<InputShared>,
}

impl<R: TraceRecord> InputStream<R> {
    pub fn new(
        index: usize,
        tid: i64,
        pid: i64,
        source: Box<dyn RecordSource<R>>,
        regions: Vec<Region>,
        shared: Arc<InputShared>,
    ) -> Self {
        Self {
            index,
            tid,
            pid,
            source,
            source_done: false,
            queue: VecDeque::new(),
            finished: false,
            regions,
            region: 0,
            started: false,
            windows: 0,
            skip_notes: Vec::new(),
            record_ordinal: 0,
            instr_ordinal: 0,
            last_timestamp: 0,
            header: TraceHeader::default(),
            syscall: None,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn header(&self) -> TraceHeader {
        self.header
    }

    pub fn take_skip_notes(&mut self) -> Vec<SkipNote> {
        std::mem::take(&mut self.skip_notes)
    }

    // ── Source access ─────────────────────────────────────────────────────────

    fn read_source(&mut self) -> Result<Option<R>, StreamError> {
        if self.source_done {
            return Ok(None);
        }
        match self.source.read_next() {
            Ok(Some(r)) => Ok(Some(r)),
            Ok(None) => {
                self.source_done = true;
                Ok(None)
            }
            Err(e) => Err(StreamError::ReadFailed {
                input: self.index,
                detail: e.to_string(),
            }),
        }
    }

    /// Next element without any processing; `None` at end of input.
    fn pop_raw(&mut self) -> Result<Option<Element<R>>, StreamError> {
        if let Some(e) = self.queue.pop_front() {
            return Ok(Some(e));
        }
        if self.finished {
            return Ok(None);
        }
        Ok(self.read_source()?.map(Element::real))
    }

    /// Read up to and including the first timestamp so the input can be
    /// ordered before it ever runs.
    pub fn read_ahead_to_timestamp(&mut self) -> Result<(), StreamError> {
        while let Some(rec) = self.read_source()? {
            let ts = match rec.marker_info() {
                Some((MarkerKind::Timestamp, v)) => Some(v),
                _ => None,
            };
            self.queue.push_back(Element::real(rec));
            if let Some(ts) = ts {
                self.shared.timestamp.store(ts, Ordering::Release);
                break;
            }
        }
        trace!(input = self.index, queued = self.queue.len(), "read ahead");
        Ok(())
    }

    /// Returns `true` if the next element is a real instruction, i.e. the
    /// input sits on an instruction boundary.
    pub fn next_is_instruction(&mut self) -> Result<bool, StreamError> {
        if self.queue.is_empty() && !self.finished {
            if let Some(rec) = self.read_source()? {
                self.queue.push_back(Element::real(rec));
            }
        }
        Ok(self
            .queue
            .front()
            .is_some_and(|e| !e.synthetic && e.record.is_instruction()))
    }

    /// Replay: the input has consumed `end` records and no synthetic record
    /// produced before that point is still pending.
    pub fn reached_record(&self, end: u64) -> bool {
        self.record_ordinal >= end && !self.queue.front().is_some_and(|e| e.synthetic)
    }

    /// As-traced replay: `end` instructions retired and the next record
    /// starts a new instruction.
    pub fn reached_instruction(&mut self, end: u64) -> Result<bool, StreamError> {
        if self.instr_ordinal < end {
            return Ok(false);
        }
        self.next_is_instruction()
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    fn publish(&self) {
        self.shared
            .record_ordinal
            .store(self.record_ordinal, Ordering::Release);
        self.shared
            .instr_ordinal
            .store(self.instr_ordinal, Ordering::Release);
    }

    fn note_timestamp(&mut self, ts: u64) {
        self.last_timestamp = ts;
        self.shared.timestamp.store(ts, Ordering::Release);
    }

    fn account(&mut self, element: &Element<R>) {
        if let Some((MarkerKind::Timestamp, v)) = element.record.marker_info() {
            self.note_timestamp(v);
        }
        if !element.synthetic {
            self.record_ordinal += 1;
            if element.record.is_instruction() {
                self.instr_ordinal += 1;
            }
            self.publish();
        }
    }

    fn syscall_state(&mut self) -> &mut SyscallState {
        let pre = self.last_timestamp;
        self.syscall.get_or_insert_with(|| SyscallState {
            pre_timestamp: pre,
            ..Default::default()
        })
    }

    /// Decide what the syscall in flight (if any) means for scheduling now
    /// that it has completed.
    fn complete_syscall(
        &mut self,
        post_timestamp: Option<u64>,
        opts: &SchedulerOptions,
    ) -> Option<SwitchRequest> {
        let st = self.syscall.take()?;
        if opts.honor_direct_switches {
            if let Some(target_tid) = st.direct_target {
                return Some(SwitchRequest::DirectSwitch {
                    target_tid,
                    timeout_us: st.timeout_us,
                });
            }
            if st.unschedule {
                return Some(SwitchRequest::Unschedule {
                    timeout_us: st.timeout_us,
                });
            }
        }
        st.number?;
        let latency_us = match post_timestamp {
            Some(post) if st.pre_timestamp > 0 => post.saturating_sub(st.pre_timestamp),
            _ => 0,
        };
        let blocks = (st.maybe_blocking && latency_us >= opts.blocking_switch_threshold_us)
            || latency_us >= opts.syscall_switch_threshold_us;
        if blocks {
            debug!(
                input = self.index,
                syscall = ?st.number,
                latency_us,
                maybe_blocking = st.maybe_blocking,
                "syscall blocks"
            );
            Some(SwitchRequest::Block { latency_us })
        } else {
            None
        }
    }

    /// Next record for the output running this input.
    pub fn next_element(&mut self, opts: &SchedulerOptions) -> Result<Fetched<R>, StreamError> {
        loop {
            let Some(element) = self.pop_raw()? else {
                self.finished = true;
                if self.syscall.take().is_some() {
                    trace!(input = self.index, "input ended inside a syscall");
                }
                return Ok(Fetched::Eof);
            };
            if element.synthetic {
                self.account(&element);
                return Ok(Fetched::Record {
                    element,
                    wake: None,
                    syscall: None,
                });
            }

            if !self.started {
                self.started = true;
                if let Some(first) = self.regions.first().copied() {
                    if first.start > 1 {
                        self.queue.push_front(element);
                        self.skip_to_instruction(first.start, false)?;
                        continue;
                    }
                }
            }

            let record = element.record;
            let mut wake = None;
            let mut syscall = None;

            if record.is_instruction() {
                let ends_region = self
                    .regions
                    .get(self.region)
                    .is_some_and(|r| r.ends_before(self.instr_ordinal + 1));
                if ends_region {
                    self.queue.push_front(Element::real(record));
                    self.region += 1;
                    match self.regions.get(self.region).copied() {
                        Some(next) => self.skip_to_instruction(next.start, true)?,
                        None => {
                            let at = self.record_ordinal;
                            self.end_input();
                            self.skip_notes.push(SkipNote {
                                from: at,
                                to: TO_END,
                                boundary: false,
                            });
                            debug!(input = self.index, at, "past last region of interest");
                        }
                    }
                    continue;
                }
                if let Some(req) = self.complete_syscall(None, opts) {
                    self.queue.push_front(Element::real(record));
                    return Ok(Fetched::Switch(req));
                }
            } else if let Some((kind, value)) = record.marker_info() {
                match kind {
                    MarkerKind::Timestamp => {
                        if let Some(req) = self.complete_syscall(Some(value), opts) {
                            self.queue.push_front(Element::real(record));
                            return Ok(Fetched::Switch(req));
                        }
                    }
                    MarkerKind::Syscall => {
                        let pre = self.last_timestamp;
                        let st = self.syscall_state();
                        st.number = Some(value);
                        st.pre_timestamp = pre;
                        syscall = Some(value);
                    }
                    MarkerKind::MaybeBlockingSyscall => self.syscall_state().maybe_blocking = true,
                    MarkerKind::SyscallArgTimeout => self.syscall_state().timeout_us = Some(value),
                    MarkerKind::SyscallUnschedule => self.syscall_state().unschedule = true,
                    MarkerKind::DirectThreadSwitch => {
                        self.syscall_state().direct_target = Some(value as i64)
                    }
                    MarkerKind::SyscallSchedule => wake = Some(value as i64),
                    _ => {
                        self.header.observe(kind, value);
                    }
                }
            }

            let element = Element::real(record);
            self.account(&element);
            return Ok(Fetched::Record {
                element,
                wake,
                syscall,
            });
        }
    }

    // ── Skipping ──────────────────────────────────────────────────────────────

    /// Discard one skipped record, remembering the latest timestamp / cpu.
    fn consume_skipped(&mut self, rec: &R, last_ts: &mut Option<u64>, last_cpu: &mut Option<u64>) {
        match rec.marker_info() {
            Some((MarkerKind::Timestamp, v)) => *last_ts = Some(v),
            Some((MarkerKind::CpuId, v)) => *last_cpu = Some(v),
            Some((kind, v)) => {
                self.header.observe(kind, v);
            }
            None => {}
        }
        self.record_ordinal += 1;
        if rec.is_instruction() {
            self.instr_ordinal += 1;
        }
    }

    /// Queue the synthetic records presented right after a skip, in order:
    /// boundary marker, timestamp, cpu id.
    fn reemit(&mut self, boundary: bool, last_ts: Option<u64>, last_cpu: Option<u64>) {
        if let Some(cpu) = last_cpu {
            self.queue.push_front(Element::synthetic(R::marker(
                MarkerKind::CpuId,
                cpu,
                self.tid,
                self.pid,
            )));
        }
        if let Some(ts) = last_ts {
            self.note_timestamp(ts);
            self.queue.push_front(Element::synthetic(R::marker(
                MarkerKind::Timestamp,
                ts,
                self.tid,
                self.pid,
            )));
        }
        if boundary {
            self.windows += 1;
            self.queue.push_front(Element::synthetic(R::marker(
                MarkerKind::WindowId,
                self.windows,
                self.tid,
                self.pid,
            )));
        }
        self.publish();
    }

    /// Discard records until the next instruction delivered is the
    /// 1-based instruction `target`.
    fn skip_to_instruction(&mut self, target: u64, boundary: bool) -> Result<(), StreamError> {
        if target <= self.instr_ordinal {
            return Err(StreamError::RegionInvalid {
                input: self.index,
                detail: format!(
                    "region start {target} already passed at instruction {}",
                    self.instr_ordinal
                ),
            });
        }
        let from = self.record_ordinal;
        let (mut last_ts, mut last_cpu) = (None, None);
        self.syscall = None;
        loop {
            let Some(element) = self.pop_raw()? else {
                // input ends before the region starts
                self.skip_notes.push(SkipNote {
                    from,
                    to: self.record_ordinal,
                    boundary: false,
                });
                self.publish();
                debug!(input = self.index, target, "input ended before region start");
                return Ok(());
            };
            if element.synthetic {
                continue;
            }
            if element.record.is_instruction() && self.instr_ordinal + 1 == target {
                self.queue.push_front(element);
                break;
            }
            self.consume_skipped(&element.record, &mut last_ts, &mut last_cpu);
        }
        self.skip_notes.push(SkipNote {
            from,
            to: self.record_ordinal,
            boundary,
        });
        debug!(
            input = self.index,
            from,
            to = self.record_ordinal,
            instr = self.instr_ordinal,
            "skipped to region"
        );
        self.reemit(boundary, last_ts, last_cpu);
        Ok(())
    }

    /// Replay a recorded skip: discard up to record ordinal `to`.
    pub fn skip_to_record(&mut self, to: u64, boundary: bool) -> Result<(), StreamError> {
        if to == TO_END {
            self.end_input();
            return Ok(());
        }
        if to < self.record_ordinal {
            return Err(StreamError::Invalid(format!(
                "input {} replay skip to record {to} but already at {}",
                self.index, self.record_ordinal
            )));
        }
        let (mut last_ts, mut last_cpu) = (None, None);
        self.syscall = None;
        while self.record_ordinal < to {
            let Some(element) = self.pop_raw()? else {
                break;
            };
            if element.synthetic {
                continue;
            }
            self.consume_skipped(&element.record, &mut last_ts, &mut last_cpu);
        }
        self.reemit(boundary, last_ts, last_cpu);
        Ok(())
    }

    /// Stop reading: the only thing left is a synthetic thread exit.
    fn end_input(&mut self) {
        self.queue.clear();
        self.queue
            .push_back(Element::synthetic(R::thread_exit(self.tid, self.pid)));
        self.finished = true;
        self.syscall = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
