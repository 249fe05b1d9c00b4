/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Replay of a recorded (or as-traced) schedule.
//!
//! Every output walks its own entry list.  An entry for input *I* may only
//! start once every earlier entry of *I* (by `input_seq`) has started on
//! whichever output owns it and *I* is no longer running there; until then
//! the output answers `Wait`.

use tracing::debug;

use crate::schedule::{EntryKind, ScheduleEntry};

/// Unit of `start` / `end` in the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayUnit {
    /// Input record ordinals (recorded schedules).
    Records,
    /// Retired instructions (as-traced cpu maps).
    Instructions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayStep {
    Run { input: usize, start: u64, end: u64 },
    Skip { input: usize, to: u64, boundary: bool },
    Idle,
    Wait,
    Eof,
}

#[derive(Debug)]
pub(crate) struct ReplayPlan {
    pub unit: ReplayUnit,
    per_output: Vec<Vec<ScheduleEntry>>,
    cursor: Vec<usize>,
    next_seq: Vec<u32>,
    /// Hold back entries whose timestamp is ahead of another output's.
    gate_by_timestamp: bool,
    /// Timestamp of the entry each output is running.
    running_ts: Vec<Option<u64>>,
}

impl ReplayPlan {
    pub fn new(
        unit: ReplayUnit,
        per_output: Vec<Vec<ScheduleEntry>>,
        input_count: usize,
        gate_by_timestamp: bool,
    ) -> Self {
        let outputs = per_output.len();
        Self {
            unit,
            per_output,
            cursor: vec![0; outputs],
            next_seq: vec![0; input_count],
            gate_by_timestamp,
            running_ts: vec![None; outputs],
        }
    }

    /// Timestamp `output` is at: its running entry or its next one.
    fn position_ts(&self, output: usize) -> Option<u64> {
        self.running_ts[output].or_else(|| {
            self.per_output[output]
                .get(self.cursor[output])
                .filter(|e| e.kind() == EntryKind::Run)
                .map(|e| e.timestamp)
        })
    }

    fn ahead_of_others(&self, output: usize, ts: u64) -> bool {
        (0..self.per_output.len())
            .filter(|&o| o != output)
            .filter_map(|o| self.position_ts(o))
            .min()
            .is_some_and(|min| ts > min)
    }

    /// Next step for `output`.  Consumes the entry unless the answer is
    /// `Wait`.
    pub fn next(&mut self, output: usize, running_elsewhere: impl Fn(usize) -> bool) -> ReplayStep {
        let Some(entry) = self.per_output[output].get(self.cursor[output]).cloned() else {
            return ReplayStep::Eof;
        };
        let kind = entry.kind();
        if kind == EntryKind::Idle {
            self.cursor[output] += 1;
            return ReplayStep::Idle;
        }

        let input = entry.input_index();
        if self.next_seq.get(input) != Some(&entry.input_seq) || running_elsewhere(input) {
            return ReplayStep::Wait;
        }
        if kind == EntryKind::Run
            && self.gate_by_timestamp
            && self.ahead_of_others(output, entry.timestamp)
        {
            return ReplayStep::Wait;
        }

        let step = match kind {
            EntryKind::Skip => ReplayStep::Skip {
                input,
                to: entry.end,
                boundary: entry.boundary,
            },
            _ => {
                self.running_ts[output] = Some(entry.timestamp);
                ReplayStep::Run {
                    input,
                    start: entry.start,
                    end: entry.end,
                }
            }
        };
        self.cursor[output] += 1;
        self.next_seq[input] += 1;
        debug!(output, ?step, "replay step");
        step
    }

    /// The output finished its current `Run` entry.
    pub fn finish(&mut self, output: usize) {
        self.running_ts[output] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TO_END;

    fn run(output: usize, input: usize, seq: u32, start: u64, end: u64, ts: u64) -> ScheduleEntry {
        let mut e = ScheduleEntry::run(output, input, seq, start, ts);
        e.end = end;
        e
    }

    #[test]
    fn segments_follow_input_sequence() {
        let plan_entries = vec![
            vec![run(0, 0, 1, 5, 9, 0)],
            vec![run(1, 0, 0, 0, 5, 0), ScheduleEntry::idle(1, 0)],
        ];
        let mut plan = ReplayPlan::new(ReplayUnit::Records, plan_entries, 1, false);

        // output 0 must wait for seq 0 on output 1
        assert_eq!(plan.next(0, |_| false), ReplayStep::Wait);
        assert_eq!(
            plan.next(1, |_| false),
            ReplayStep::Run { input: 0, start: 0, end: 5 }
        );
        // seq matches now but the input is still running on output 1
        assert_eq!(plan.next(0, |_| true), ReplayStep::Wait);
        plan.finish(1);
        assert_eq!(
            plan.next(0, |_| false),
            ReplayStep::Run { input: 0, start: 5, end: 9 }
        );
        assert_eq!(plan.next(1, |_| false), ReplayStep::Idle);
        assert_eq!(plan.next(1, |_| false), ReplayStep::Eof);
        assert_eq!(plan.next(0, |_| false), ReplayStep::Eof);
    }

    #[test]
    fn skip_entries_consume_sequence() {
        let entries = vec![vec![
            run(0, 0, 0, 0, 3, 0),
            ScheduleEntry::skip(0, 0, 1, TO_END, false),
        ]];
        let mut plan = ReplayPlan::new(ReplayUnit::Records, entries, 1, false);
        assert!(matches!(plan.next(0, |_| false), ReplayStep::Run { .. }));
        plan.finish(0);
        assert_eq!(
            plan.next(0, |_| false),
            ReplayStep::Skip { input: 0, to: TO_END, boundary: false }
        );
    }

    #[test]
    fn timestamp_gate_holds_later_entries() {
        let entries = vec![
            vec![run(0, 0, 0, 0, TO_END, 300)],
            vec![run(1, 1, 0, 0, TO_END, 100)],
        ];
        let mut plan = ReplayPlan::new(ReplayUnit::Instructions, entries, 2, true);
        assert_eq!(plan.next(0, |_| false), ReplayStep::Wait);
        assert!(matches!(plan.next(1, |_| false), ReplayStep::Run { input: 1, .. }));
        // output 1 still running its ts-100 entry
        assert_eq!(plan.next(0, |_| false), ReplayStep::Wait);
        plan.finish(1);
        assert!(matches!(plan.next(0, |_| false), ReplayStep::Run { input: 0, .. }));
    }
}
