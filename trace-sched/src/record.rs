/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Trace record model consumed and produced by the scheduler.
//!
//! The scheduler never decodes payloads.  It only needs to know whether a
//! record is an instruction, and for markers, which kind and which value:
//!
//! ```text
//! RecordSource ──(R: TraceRecord)──►  Scheduler  ──(R)──►  analysis tool
//!                  kind() / tid()        rewrites cpu-id / timestamp markers,
//!                                        splices synthetic records
//! ```
//!
//! Any record type implementing [`TraceRecord`] can be scheduled.
//! [`MemRecord`] is the crate's own concrete type; it round-trips through
//! JSON so traces can be stored one record per line.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Marker vocabulary ─────────────────────────────────────────────────────────

/// In-band marker kinds the scheduler inspects or synthesises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Wall-clock timestamp in microseconds.
    Timestamp,
    /// Hardware context the following records ran on.
    CpuId,

    // ── Header fields ─────────────────────────────────────────────────────────
    Version,
    Filetype,
    CacheLineSize,
    ChunkInstrCount,
    PageSize,

    // ── System calls ──────────────────────────────────────────────────────────
    /// System call number; the call completes at the next timestamp or
    /// instruction.
    Syscall,
    /// The following system call may block.
    MaybeBlockingSyscall,
    /// Timeout argument of an unschedule request, in microseconds.
    SyscallArgTimeout,
    /// The current thread removes itself from scheduling.
    SyscallUnschedule,
    /// Wake the thread whose tid is the marker value.
    SyscallSchedule,
    /// Hand the hardware context directly to the thread whose tid is the
    /// marker value.
    DirectThreadSwitch,

    // ── Synthetic / template delimiters ───────────────────────────────────────
    /// Boundary between two regions of interest.
    WindowId,
    /// Start of a kernel context-switch template; value is a [`SwitchKind`]
    /// code.
    ///
    /// [`SwitchKind`]: crate::inject::SwitchKind
    ContextSwitchStart,
    ContextSwitchEnd,
    /// Start of a kernel syscall template; value is the syscall number.
    SyscallTraceStart,
    SyscallTraceEnd,
}

/// Cheap, copyable view of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    Instruction { pc: u64 },
    Memory { addr: u64 },
    Marker { kind: MarkerKind, value: u64 },
    ThreadExit,
}

// ── TraceRecord ───────────────────────────────────────────────────────────────

/// Minimal capability the scheduler needs from a record representation.
pub trait TraceRecord: Clone + fmt::Debug + Send + 'static {
    fn kind(&self) -> RecordKind;

    fn tid(&self) -> i64;

    fn pid(&self) -> i64;

    /// Overwrite thread and process identifiers (id remapping, injected
    /// templates).
    fn set_ids(&mut self, tid: i64, pid: i64);

    /// Overwrite the value of a marker.  No-op for other records.
    fn set_marker_value(&mut self, value: u64);

    fn marker(kind: MarkerKind, value: u64, tid: i64, pid: i64) -> Self;

    fn instruction(pc: u64, tid: i64, pid: i64) -> Self;

    fn thread_exit(tid: i64, pid: i64) -> Self;

    fn is_instruction(&self) -> bool {
        matches!(self.kind(), RecordKind::Instruction { .. })
    }

    /// `Some((kind, value))` for markers.
    fn marker_info(&self) -> Option<(MarkerKind, u64)> {
        match self.kind() {
            RecordKind::Marker { kind, value } => Some((kind, value)),
            _ => None,
        }
    }

    fn is_marker(&self, kind: MarkerKind) -> bool {
        matches!(self.marker_info(), Some((k, _)) if k == kind)
    }
}

// ── MemRecord ─────────────────────────────────────────────────────────────────

/// Concrete record type shipped with the crate.
///
/// One JSON object per record:
/// ```json
/// {"tid":51,"pid":1,"type":"marker","kind":"timestamp","value":100}
/// {"tid":51,"pid":1,"type":"instruction","pc":4096}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemRecord {
    pub tid: i64,
    pub pid: i64,
    #[serde(flatten)]
    pub kind: RecordKind,
}

impl TraceRecord for MemRecord {
    fn kind(&self) -> RecordKind {
        self.kind
    }

    fn tid(&self) -> i64 {
        self.tid
    }

    fn pid(&self) -> i64 {
        self.pid
    }

    fn set_ids(&mut self, tid: i64, pid: i64) {
        self.tid = tid;
        self.pid = pid;
    }

    fn set_marker_value(&mut self, value: u64) {
        if let RecordKind::Marker { value: v, .. } = &mut self.kind {
            *v = value;
        }
    }

    fn marker(kind: MarkerKind, value: u64, tid: i64, pid: i64) -> Self {
        Self {
            tid,
            pid,
            kind: RecordKind::Marker { kind, value },
        }
    }

    fn instruction(pc: u64, tid: i64, pid: i64) -> Self {
        Self {
            tid,
            pid,
            kind: RecordKind::Instruction { pc },
        }
    }

    fn thread_exit(tid: i64, pid: i64) -> Self {
        Self {
            tid,
            pid,
            kind: RecordKind::ThreadExit,
        }
    }
}

// ── TraceHeader ───────────────────────────────────────────────────────────────

/// Trace header fields, learned from header markers as they stream past.
///
/// Zero means "not seen yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceHeader {
    pub version: u64,
    pub filetype: u64,
    pub cache_line_size: u64,
    pub chunk_instr_count: u64,
    pub page_size: u64,
}

impl TraceHeader {
    /// Absorb a header marker.  Returns `true` if the marker was a header
    /// field.
    pub fn observe(&mut self, kind: MarkerKind, value: u64) -> bool {
        let slot = match kind {
            MarkerKind::Version => &mut self.version,
            MarkerKind::Filetype => &mut self.filetype,
            MarkerKind::CacheLineSize => &mut self.cache_line_size,
            MarkerKind::ChunkInstrCount => &mut self.chunk_instr_count,
            MarkerKind::PageSize => &mut self.page_size,
            _ => return false,
        };
        *slot = value;
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line_layout_is_flat() {
        let rec = MemRecord::marker(MarkerKind::Timestamp, 100, 51, 1);
        let line = serde_json::to_string(&rec).unwrap();
        assert_eq!(
            line,
            r#"{"tid":51,"pid":1,"type":"marker","kind":"timestamp","value":100}"#
        );

        let instr: MemRecord =
            serde_json::from_str(r#"{"tid":52,"pid":1,"type":"instruction","pc":4096}"#).unwrap();
        assert!(instr.is_instruction());
        assert_eq!(instr.tid(), 52);
    }

    #[test]
    fn set_marker_value_ignores_non_markers() {
        let mut instr = MemRecord::instruction(0x1000, 1, 1);
        instr.set_marker_value(7);
        assert_eq!(instr.kind(), RecordKind::Instruction { pc: 0x1000 });

        let mut ts = MemRecord::marker(MarkerKind::Timestamp, 5, 1, 1);
        ts.set_marker_value(9);
        assert_eq!(ts.marker_info(), Some((MarkerKind::Timestamp, 9)));
    }

    #[test]
    fn header_observes_only_header_markers() {
        let mut hdr = TraceHeader::default();
        assert!(hdr.observe(MarkerKind::PageSize, 4096));
        assert!(hdr.observe(MarkerKind::CacheLineSize, 64));
        assert!(!hdr.observe(MarkerKind::Timestamp, 1));
        assert_eq!(hdr.page_size, 4096);
        assert_eq!(hdr.cache_line_size, 64);
        assert_eq!(hdr.version, 0);
    }
}
