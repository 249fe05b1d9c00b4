/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Choice of the next input for an output under `AnyOutput` and
//! `Consistent` mapping.
//!
//! ```text
//! wake expired sleepers ─► rebalance (periodic) ─► direct-switch target?
//!        │
//!        ▼
//! own queue ─► other queues, longest first (steal) ─► same, ignoring
//!                                                     migration delay
//!        │
//!        ▼
//! timestamp gate ─► Picked | Wait        nothing found ─► Idle / Eof
//! ```

use rand::Rng;
use tracing::{debug, trace};

use super::error::StreamError;
use super::quantum::migration_restricted;
use super::state::{InputState, SchedCore};
use crate::config::{MappingPolicy, SchedulerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    Picked { input: usize, stolen: bool },
    Wait,
    Idle,
    Eof,
}

/// Pick the next input for `output`, or explain why there is none.
///
/// `direct` is the target of a direct thread switch issued by the input
/// that just left this output.
pub(crate) fn select(
    core: &mut SchedCore,
    opts: &SchedulerOptions,
    output: usize,
    now: u64,
    direct: Option<usize>,
) -> Result<Selection, StreamError> {
    if core.exited_early || !core.has_work_for(output) {
        return Ok(Selection::Eof);
    }
    core.wake_expired(now);
    core.maybe_rebalance(opts, now);

    if let Some(target) = direct {
        if let Some(sel) = direct_target(core, output, target) {
            return Ok(sel);
        }
    }

    for attempt in 0..2 {
        if let Some((input, stolen)) = pick(core, opts, output, now) {
            if gated(core, opts, output, input) {
                trace!(output, input, "candidate ahead of running inputs");
                return Ok(Selection::Wait);
            }
            return Ok(Selection::Picked { input, stolen });
        }
        if attempt == 0 && !core.wake_all_if_stuck() {
            break;
        }
    }

    if let Some(input) = core.stranded_input() {
        return Err(StreamError::ImpossibleBinding { input });
    }
    Ok(Selection::Idle)
}

fn direct_target(core: &mut SchedCore, output: usize, target: usize) -> Option<Selection> {
    if matches!(core.inputs[target].state, InputState::Unscheduled { .. }) {
        core.wake(target);
    }
    let ready = core.inputs[target].state == InputState::Ready;
    if !ready || !core.inputs[target].allows(output) || !core.under_output_limit(target) {
        debug!(output, target, state = ?core.inputs[target].state, "direct switch target unavailable");
        return None;
    }
    let stolen = core.queues.queue_of(target) != Some(core.queue_for(output));
    Some(Selection::Picked {
        input: target,
        stolen,
    })
}

/// Highest-ranked eligible input, honouring migration delay when possible.
fn pick(
    core: &mut SchedCore,
    opts: &SchedulerOptions,
    output: usize,
    now: u64,
) -> Option<(usize, bool)> {
    let own = core.queue_for(output);
    let mut order = vec![own];
    if core.policy == MappingPolicy::AnyOutput {
        let mut others: Vec<usize> = (0..core.queues.queue_count())
            .filter(|&q| q != own)
            .collect();
        others.sort_by_key(|&q| (std::cmp::Reverse(core.queues.len(q)), q));
        order.extend(others);
    }

    for honour_delay in [true, false] {
        for &q in &order {
            let eligible = |input: usize| {
                core.inputs[input].allows(output)
                    && core.under_output_limit(input)
                    && !(honour_delay
                        && migration_restricted(opts, core.inputs[input].last_run, output, now))
            };
            let Some(first) = core.queues.iter(q).find(|k| eligible(k.input)).copied() else {
                continue;
            };
            let mut chosen = first.input;
            if opts.randomize_next_input {
                let ties: Vec<usize> = core
                    .queues
                    .iter(q)
                    .filter(|k| k.tie() == first.tie() && eligible(k.input))
                    .map(|k| k.input)
                    .collect();
                chosen = ties[core.rng.gen_range(0..ties.len())];
            }
            if !honour_delay {
                trace!(output, input = chosen, "migration delay waived, nothing else eligible");
            }
            return Some((chosen, q != own));
        }
    }
    None
}

/// `true` if `candidate`'s next timestamp runs too far ahead of the inputs
/// running on other outputs.
fn gated(core: &SchedCore, opts: &SchedulerOptions, output: usize, candidate: usize) -> bool {
    let Some(tolerance) = opts.timestamp_tolerance_us else {
        return false;
    };
    let ts = core.timestamp_of(candidate);
    if ts == 0 {
        return false;
    }
    core.inputs
        .iter()
        .enumerate()
        .filter(|&(i, s)| i != candidate && matches!(s.state, InputState::Running(o) if o != output))
        .map(|(i, _)| core.timestamp_of(i))
        .filter(|&t| t > 0)
        .min()
        .is_some_and(|min| ts > min.saturating_add(tolerance))
}
