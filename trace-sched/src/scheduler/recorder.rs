/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-output bookkeeping of the schedule entry currently being recorded.
//!
//! An entry is handed to the sink only once it is closed, so the sink sees
//! each output's decisions in order and never has to patch an entry.

use crate::schedule::{EntryKind, ScheduleEntry};

#[derive(Debug)]
pub(crate) struct EntryLog {
    output: usize,
    open: Option<ScheduleEntry>,
}

impl EntryLog {
    pub fn new(output: usize) -> Self {
        Self { output, open: None }
    }

    pub fn is_idle(&self) -> bool {
        self.open.as_ref().is_some_and(|e| e.kind() == EntryKind::Idle)
    }

    /// Close whatever is open.  A `Run` ends at record ordinal `end`.
    pub fn close(&mut self, end: u64) -> Option<ScheduleEntry> {
        let mut entry = self.open.take()?;
        if entry.kind() == EntryKind::Run {
            entry.end = end;
        }
        Some(entry)
    }

    /// Start a `Run`.  The caller closes the previous entry first.
    pub fn open_run(&mut self, input: usize, seq: u32, start: u64, timestamp: u64) {
        debug_assert!(self.open.is_none());
        self.open = Some(ScheduleEntry::run(self.output, input, seq, start, timestamp));
    }

    /// Start an `Idle` entry unless one is already open.
    pub fn open_idle(&mut self, timestamp: u64) {
        if self.is_idle() {
            return;
        }
        debug_assert!(self.open.is_none());
        self.open = Some(ScheduleEntry::idle(self.output, timestamp));
    }

    pub fn skip(&self, input: usize, seq: u32, to: u64, boundary: bool) -> ScheduleEntry {
        ScheduleEntry::skip(self.output, input, seq, to, boundary)
    }
}
