/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Kernel sequence templates spliced into output streams.
//!
//! Two kinds of template exist:
//!
//! * **context switch**: spliced when an output switches inputs, keyed by
//!   [`SwitchKind`] (same process vs. different process);
//! * **syscall**: spliced right after a `Syscall` marker, keyed by the
//!   syscall number.
//!
//! Templates can be supplied as one delimited record stream:
//!
//! ```text
//! ContextSwitchStart(0) … ContextSwitchEnd     thread switch
//! ContextSwitchStart(1) … ContextSwitchEnd     process switch
//! SyscallTraceStart(N)  … SyscallTraceEnd      syscall N
//! ```
//!
//! The delimiters stay part of the spliced sequence so consumers can see
//! where kernel code begins and ends.  A missing template is not an error;
//! the raw marker is simply left alone.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::record::{MarkerKind, TraceRecord};

/// Flavour of a modelled context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchKind {
    /// Both inputs belong to the same process.
    Thread,
    Process,
}

impl SwitchKind {
    pub fn code(self) -> u64 {
        match self {
            SwitchKind::Thread => 0,
            SwitchKind::Process => 1,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(SwitchKind::Thread),
            1 => Some(SwitchKind::Process),
            _ => None,
        }
    }

    pub fn between(prev_pid: i64, next_pid: i64) -> Self {
        if prev_pid == next_pid {
            SwitchKind::Thread
        } else {
            SwitchKind::Process
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template record #{index} starts a sequence inside another one")]
    Nested { index: usize },
    #[error("template record #{index} ends a sequence that was never started")]
    UnmatchedEnd { index: usize },
    #[error("unknown context switch kind {code} at record #{index}")]
    UnknownSwitchKind { index: usize, code: u64 },
    #[error("template stream ends inside a sequence")]
    Unterminated,
}

enum Open {
    Switch(SwitchKind),
    Syscall(u64),
}

/// Context-switch and syscall templates.
#[derive(Debug, Clone)]
pub struct KernelTemplates<R> {
    switches: HashMap<SwitchKind, Vec<R>>,
    syscalls: HashMap<u64, Vec<R>>,
}

impl<R> Default for KernelTemplates<R> {
    fn default() -> Self {
        Self {
            switches: HashMap::new(),
            syscalls: HashMap::new(),
        }
    }
}

impl<R: TraceRecord> KernelTemplates<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_switch(mut self, kind: SwitchKind, records: Vec<R>) -> Self {
        self.switches.insert(kind, records);
        self
    }

    pub fn with_syscall(mut self, number: u64, records: Vec<R>) -> Self {
        self.syscalls.insert(number, records);
        self
    }

    /// Split a delimited record stream into templates.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Result<Self, TemplateError> {
        let mut templates = Self::new();
        let mut open: Option<(Open, Vec<R>)> = None;

        for (index, rec) in records.into_iter().enumerate() {
            match rec.marker_info() {
                Some((MarkerKind::ContextSwitchStart, code)) => {
                    if open.is_some() {
                        return Err(TemplateError::Nested { index });
                    }
                    let kind = SwitchKind::from_code(code)
                        .ok_or(TemplateError::UnknownSwitchKind { index, code })?;
                    open = Some((Open::Switch(kind), vec![rec]));
                }
                Some((MarkerKind::SyscallTraceStart, number)) => {
                    if open.is_some() {
                        return Err(TemplateError::Nested { index });
                    }
                    open = Some((Open::Syscall(number), vec![rec]));
                }
                Some((MarkerKind::ContextSwitchEnd | MarkerKind::SyscallTraceEnd, _)) => {
                    let (which, mut seq) = open.take().ok_or(TemplateError::UnmatchedEnd { index })?;
                    seq.push(rec);
                    match which {
                        Open::Switch(kind) => {
                            debug!(?kind, len = seq.len(), "context switch template");
                            templates.switches.insert(kind, seq);
                        }
                        Open::Syscall(number) => {
                            debug!(number, len = seq.len(), "syscall template");
                            templates.syscalls.insert(number, seq);
                        }
                    }
                }
                _ => {
                    if let Some((_, seq)) = open.as_mut() {
                        seq.push(rec);
                    }
                }
            }
        }
        if open.is_some() {
            return Err(TemplateError::Unterminated);
        }
        Ok(templates)
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty() && self.syscalls.is_empty()
    }

    /// Switch template retagged with the incoming input's identifiers.
    pub fn switch_sequence(&self, kind: SwitchKind, tid: i64, pid: i64) -> Option<Vec<R>> {
        self.switches.get(&kind).map(|seq| retag(seq, tid, pid))
    }

    /// Syscall template retagged with the calling input's identifiers.
    pub fn syscall_sequence(&self, number: u64, tid: i64, pid: i64) -> Option<Vec<R>> {
        self.syscalls.get(&number).map(|seq| retag(seq, tid, pid))
    }
}

fn retag<R: TraceRecord>(seq: &[R], tid: i64, pid: i64) -> Vec<R> {
    seq.iter()
        .cloned()
        .map(|mut r| {
            r.set_ids(tid, pid);
            r
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
