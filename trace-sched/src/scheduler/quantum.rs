/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time arithmetic of the dynamic scheduler: quanta, migration delay and
//! modelled blocking.
//!
//! All thresholds are configured in microseconds and compared in simulated
//! time units (`× time_units_per_us`).

use crate::config::{QuantumUnit, SchedulerOptions};

/// Budget consumed by the input currently running on an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Quantum {
    start_time: u64,
    instrs: u64,
}

impl Quantum {
    pub fn start(now: u64) -> Self {
        Self {
            start_time: now,
            instrs: 0,
        }
    }

    pub fn note_instruction(&mut self) {
        self.instrs += 1;
    }

    pub fn expired(&self, opts: &SchedulerOptions, now: u64) -> bool {
        match opts.quantum_unit {
            QuantumUnit::Instructions => self.instrs >= opts.quantum_duration_instrs,
            QuantumUnit::Time => {
                now.saturating_sub(self.start_time) >= opts.scale_us(opts.quantum_duration_us)
            }
        }
    }
}

/// Where and when an input last stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastRun {
    pub output: usize,
    pub end_time: u64,
}

/// `true` if moving the input onto `output` now would violate the
/// migration delay.
pub(crate) fn migration_restricted(
    opts: &SchedulerOptions,
    last: Option<LastRun>,
    output: usize,
    now: u64,
) -> bool {
    match last {
        Some(l) if l.output != output => {
            now.saturating_sub(l.end_time) < opts.scale_us(opts.migration_threshold_us)
        }
        _ => false,
    }
}

/// Simulated time a blocking syscall of `latency_us` keeps its input off
/// every output.
pub(crate) fn block_duration(opts: &SchedulerOptions, latency_us: u64) -> u64 {
    let scaled = (latency_us as f64 * opts.block_time_multiplier) as u64;
    opts.scale_us(scaled.min(opts.block_time_max_us))
}

/// Wake-up time of an unschedule request; `None` = until explicitly woken.
pub(crate) fn unschedule_deadline(
    opts: &SchedulerOptions,
    timeout_us: Option<u64>,
    now: u64,
) -> Option<u64> {
    match timeout_us {
        Some(t) => Some(now.saturating_add(opts.scale_us(t))),
        None if opts.honor_infinite_timeouts => None,
        None => Some(now.saturating_add(opts.scale_us(opts.block_time_max_us))),
    }
}
