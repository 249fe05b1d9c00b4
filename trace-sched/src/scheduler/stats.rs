/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-output counters.

/// Accumulated statistics for one output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    /// Records presented, synthetic ones included.
    pub records: u64,
    pub instructions: u64,
    pub synthetic_records: u64,
    pub idle_calls: u64,
    pub wait_calls: u64,
    /// Changes of the assigned input.
    pub switches: u64,
    /// Quantum expiries that returned the input to a ready queue.
    pub preemptions: u64,
    /// Assignments of an input that last ran on a different output.
    pub migrations: u64,
    /// Inputs taken from another output's ready queue.
    pub steals: u64,
    pub direct_switches: u64,
    /// Inputs switched out because of a blocking syscall or unschedule.
    pub blocking_switches: u64,
    pub injected_records: u64,
}

impl OutputStats {
    fn calls(&self) -> u64 {
        self.records + self.idle_calls + self.wait_calls
    }

    /// Fraction of pulls that answered `Idle`.
    pub fn idle_fraction(&self) -> f64 {
        fraction(self.idle_calls, self.calls())
    }

    /// Fraction of pulls that answered `Wait`.
    pub fn wait_fraction(&self) -> f64 {
        fraction(self.wait_calls, self.calls())
    }
}

fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_over_all_calls() {
        let stats = OutputStats {
            records: 6,
            idle_calls: 3,
            wait_calls: 1,
            ..Default::default()
        };
        assert!((stats.idle_fraction() - 0.3).abs() < 1e-9);
        assert!((stats.wait_fraction() - 0.1).abs() < 1e-9);
        assert_eq!(OutputStats::default().idle_fraction(), 0.0);
    }
}
