/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error and status types for the trace scheduler.
//!
//! Two disjoint taxonomies model the two failure layers:
//!
//! * [`InitError`]: fatal to construction; surfaced before any output is
//!   used.
//! * [`Pull`] / [`StreamError`]: the per-call outcome of
//!   [`OutputStream::next_record`](super::OutputStream::next_record).
//!   `Wait` and `Idle` are expected steady-state answers the caller polls
//!   past; `StreamError` variants indicate a usage or configuration defect.
//!
//! | Outcome | Caller action |
//! |---|---|
//! | `Pull::Record` | consume |
//! | `Pull::Wait` / `Pull::Idle` | retry later |
//! | `Pull::Eof` | stop driving this output |
//! | `StreamError::RecordFailed` | log; scheduling continues, recording is incomplete |
//! | other `StreamError` | abort |
//!
//! The scheduler never retries on its own.

use std::path::PathBuf;

use thiserror::Error;

use crate::inject::TemplateError;
use crate::workload::RegionProblem;

// ── Construction ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cannot open '{}': {detail}", path.display())]
    FileOpenFailed { path: PathBuf, detail: String },

    #[error("read failed: {0}")]
    FileReadFailed(String),

    #[error("write failed: {0}")]
    FileWriteFailed(String),

    #[error("input {input} (tid {tid}) has invalid regions of interest: {problem}")]
    RegionInvalid {
        input: usize,
        tid: i64,
        problem: RegionProblem,
    },

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl From<TemplateError> for InitError {
    fn from(e: TemplateError) -> Self {
        InitError::InvalidParameter(format!("kernel templates: {e}"))
    }
}

// ── Per-call outcomes ─────────────────────────────────────────────────────────

/// Successful outcome of one pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<R> {
    Record(R),
    /// Work exists but ordering constraints hold this output back.
    Wait,
    /// No eligible work for this output right now.
    Idle,
    /// This output will produce nothing more.
    Eof,
}

impl<R> Pull<R> {
    pub fn record(self) -> Option<R> {
        match self {
            Pull::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Pull::Eof)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid operation: {0}")]
    Invalid(String),

    #[error("input {input} cannot be positioned at its next region: {detail}")]
    RegionInvalid { input: usize, detail: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The record source of an input failed mid-stream.
    #[error("input {input} read failed: {detail}")]
    ReadFailed { input: usize, detail: String },

    /// An input's binding set excludes every active output.
    #[error("input {input} is bound only to inactive or nonexistent outputs")]
    ImpossibleBinding { input: usize },

    /// Writing the recorded schedule failed.  Scheduling continues.
    #[error("schedule recording failed: {0}")]
    RecordFailed(String),
}
