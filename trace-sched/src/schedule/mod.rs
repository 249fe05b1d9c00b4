/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Persisted schedules: the unit of deterministic replay.
//!
//! A recorded schedule is, per output, the ordered list of decisions the
//! scheduler took:
//!
//! | Kind | Meaning | `start` / `end` |
//! |---|---|---|
//! | `Run`  | input ran on the output | input record ordinals `[start, end)` |
//! | `Idle` | the output had no work | unused |
//! | `Skip` | region skip inside a run | `end` = record ordinal after the skip (`u64::MAX` = to end of input) |
//!
//! `input_seq` numbers the entries of one input across all outputs, so the
//! replayer knows which output takes an input next without relying on wall
//! time.
//!
//! Entries are protobuf messages (derived with `prost`, no `.proto` build
//! step).  [`ProstScheduleWriter`] / [`ProstScheduleReader`] persist them as a
//! length-delimited stream; [`MemorySchedule`] keeps them in memory.

pub mod as_traced;
pub mod file;

pub use as_traced::{AsTracedMap, CpuEntry};
pub use file::{ProstScheduleReader, ProstScheduleWriter};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Version written into every [`ScheduleHeader`].
pub const SCHEDULE_FORMAT_VERSION: u32 = 1;

/// `end` / `Skip.end` value meaning "to the end of the input".
pub const TO_END: u64 = u64::MAX;

// ── Wire messages ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EntryKind {
    Run = 0,
    Idle = 1,
    Skip = 2,
}

/// First message of every persisted schedule.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ScheduleHeader {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(uint32, tag = "2")]
    pub output_count: u32,
    #[prost(uint32, tag = "3")]
    pub input_count: u32,
}

/// One scheduling decision.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ScheduleEntry {
    #[prost(uint32, tag = "1")]
    pub output: u32,
    #[prost(enumeration = "EntryKind", tag = "2")]
    pub kind: i32,
    #[prost(uint64, tag = "3")]
    pub input: u64,
    #[prost(uint32, tag = "4")]
    pub input_seq: u32,
    #[prost(uint64, tag = "5")]
    pub start: u64,
    #[prost(uint64, tag = "6")]
    pub end: u64,
    /// Output time at which the entry opened.  Used for ordering in
    /// as-recorded mode; informational otherwise.
    #[prost(uint64, tag = "7")]
    pub timestamp: u64,
    /// `Skip` only: a region boundary marker was presented after the skip.
    #[prost(bool, tag = "8")]
    pub boundary: bool,
}

impl ScheduleEntry {
    pub fn run(output: usize, input: usize, input_seq: u32, start: u64, timestamp: u64) -> Self {
        let mut e = Self {
            output: output as u32,
            input: input as u64,
            input_seq,
            start,
            end: TO_END,
            timestamp,
            ..Default::default()
        };
        e.set_kind(EntryKind::Run);
        e
    }

    pub fn idle(output: usize, timestamp: u64) -> Self {
        let mut e = Self {
            output: output as u32,
            timestamp,
            ..Default::default()
        };
        e.set_kind(EntryKind::Idle);
        e
    }

    pub fn skip(output: usize, input: usize, input_seq: u32, to: u64, boundary: bool) -> Self {
        let mut e = Self {
            output: output as u32,
            input: input as u64,
            input_seq,
            end: to,
            boundary,
            ..Default::default()
        };
        e.set_kind(EntryKind::Skip);
        e
    }

    pub fn input_index(&self) -> usize {
        self.input as usize
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("schedule I/O on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schedule decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("schedule encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("malformed schedule: {0}")]
    Malformed(String),
}

// ── Sink / source traits ──────────────────────────────────────────────────────

/// Append-only destination for recorded decisions.
pub trait ScheduleSink: Send {
    fn begin(&mut self, header: &ScheduleHeader) -> Result<(), ScheduleError>;

    fn append(&mut self, entry: &ScheduleEntry) -> Result<(), ScheduleError>;

    fn flush(&mut self) -> Result<(), ScheduleError>;
}

/// Previously recorded decisions, consumed once at scheduler construction.
pub trait ScheduleSource: Send {
    fn load(&mut self) -> Result<RecordedSchedule, ScheduleError>;
}

/// A fully loaded schedule, grouped per output in recording order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSchedule {
    pub header: ScheduleHeader,
    pub per_output: Vec<Vec<ScheduleEntry>>,
}

impl RecordedSchedule {
    /// Group a flat entry stream by output, preserving order.
    pub fn from_entries(
        header: ScheduleHeader,
        entries: impl IntoIterator<Item = ScheduleEntry>,
    ) -> Result<Self, ScheduleError> {
        if header.version != SCHEDULE_FORMAT_VERSION {
            return Err(ScheduleError::Malformed(format!(
                "unsupported schedule version {}",
                header.version
            )));
        }
        let mut per_output = vec![Vec::new(); header.output_count as usize];
        for entry in entries {
            if EntryKind::try_from(entry.kind).is_err() {
                return Err(ScheduleError::Malformed(format!(
                    "unknown entry kind {}",
                    entry.kind
                )));
            }
            let slot = per_output.get_mut(entry.output as usize).ok_or_else(|| {
                ScheduleError::Malformed(format!(
                    "entry for output {} but schedule has {} outputs",
                    entry.output, header.output_count
                ))
            })?;
            if entry.kind() != EntryKind::Idle && entry.input >= u64::from(header.input_count) {
                return Err(ScheduleError::Malformed(format!(
                    "entry references input {} but schedule has {} inputs",
                    entry.input, header.input_count
                )));
            }
            if entry.kind() == EntryKind::Run && entry.start > entry.end {
                return Err(ScheduleError::Malformed(format!(
                    "run of input {} ends at {} before its start {}",
                    entry.input, entry.end, entry.start
                )));
            }
            slot.push(entry);
        }
        let sched = Self { header, per_output };
        sched.check_sequences()?;
        Ok(sched)
    }

    /// Every input's entries must carry `input_seq` exactly `0..k`, and each
    /// output must list its share of them in increasing order.
    fn check_sequences(&self) -> Result<(), ScheduleError> {
        let mut seen: Vec<Vec<u32>> = vec![Vec::new(); self.header.input_count as usize];
        for (output, entries) in self.per_output.iter().enumerate() {
            let mut last: Vec<Option<u32>> = vec![None; seen.len()];
            for e in entries.iter().filter(|e| e.kind() != EntryKind::Idle) {
                let input = e.input_index();
                if let Some(prev) = last[input].filter(|&prev| e.input_seq <= prev) {
                    return Err(ScheduleError::Malformed(format!(
                        "output {output} lists input {input} seq {} after seq {prev}",
                        e.input_seq
                    )));
                }
                last[input] = Some(e.input_seq);
                seen[input].push(e.input_seq);
            }
        }
        for (input, seqs) in seen.iter_mut().enumerate() {
            seqs.sort_unstable();
            if let Some((want, got)) = seqs
                .iter()
                .enumerate()
                .find(|&(i, &seq)| seq as usize != i)
            {
                return Err(ScheduleError::Malformed(format!(
                    "input {input} expects seq {want} but has {got}"
                )));
            }
        }
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.per_output.iter().map(Vec::len).sum()
    }
}

// ── MemorySchedule ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryLog {
    header: Option<ScheduleHeader>,
    entries: Vec<ScheduleEntry>,
    flushes: usize,
}

/// In-memory schedule store.
///
/// Clones share the same log, so one clone can be attached as the recording
/// sink and another later loaded as the replay source.
#[derive(Debug, Clone, Default)]
pub struct MemorySchedule {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemorySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.log.lock().entries.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.log.lock().flushes
    }
}

impl ScheduleSink for MemorySchedule {
    fn begin(&mut self, header: &ScheduleHeader) -> Result<(), ScheduleError> {
        let mut log = self.log.lock();
        log.header = Some(header.clone());
        log.entries.clear();
        Ok(())
    }

    fn append(&mut self, entry: &ScheduleEntry) -> Result<(), ScheduleError> {
        self.log.lock().entries.push(entry.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ScheduleError> {
        self.log.lock().flushes += 1;
        Ok(())
    }
}

impl ScheduleSource for MemorySchedule {
    fn load(&mut self) -> Result<RecordedSchedule, ScheduleError> {
        let log = self.log.lock();
        let header = log
            .header
            .clone()
            .ok_or_else(|| ScheduleError::Malformed("schedule was never started".into()))?;
        RecordedSchedule::from_entries(header, log.entries.iter().cloned())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
