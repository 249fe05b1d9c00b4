/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! As-traced cpu map: which thread ran on which cpu, when, and from which
//! instruction onwards.
//!
//! ```yaml
//! cpus:
//!   0:
//!     - { tid: 51, timestamp: 100, start_instruction: 0 }
//!     - { tid: 52, timestamp: 180, start_instruction: 0 }
//!   1:
//!     - { tid: 51, timestamp: 200, start_instruction: 40 }
//! ```
//!
//! The map drives the `AsRecorded` policy (one output per traced cpu) and
//! converts `times_of_interest` into instruction regions.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ScheduleEntry, TO_END};
use crate::workload::{Region, TimeRange};

/// One scheduling slice of a thread on a traced cpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CpuEntry {
    pub tid: i64,
    pub timestamp: u64,
    /// Instructions the thread had retired before this slice began.
    pub start_instruction: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AsTracedMap {
    /// Traced cpu id → slices in time order.
    pub cpus: BTreeMap<u64, Vec<CpuEntry>>,
}

impl AsTracedMap {
    /// Parse an as-traced YAML map.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading as-traced cpu map from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open as-traced map: {}", path.display()))?;
        let mut map: AsTracedMap = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        for entries in map.cpus.values_mut() {
            entries.sort_by_key(|e| e.timestamp);
        }
        info!(
            cpus = map.cpus.len(),
            slices = map.cpus.values().map(Vec::len).sum::<usize>(),
            "As-traced map loaded"
        );
        Ok(map)
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Traced cpu ids in output order.
    pub fn cpu_ids(&self) -> Vec<u64> {
        self.cpus.keys().copied().collect()
    }

    /// `(timestamp, start_instruction)` samples for `tid`, in time order.
    fn samples(&self, tid: i64) -> Vec<(u64, u64)> {
        let mut samples: Vec<(u64, u64)> = self
            .cpus
            .values()
            .flatten()
            .filter(|e| e.tid == tid)
            .map(|e| (e.timestamp, e.start_instruction))
            .collect();
        samples.sort_unstable();
        samples
    }

    /// Convert the map into per-output `Run` entries whose `start` / `end`
    /// are instruction counts.
    ///
    /// `input_of` maps a traced tid to an input ordinal.  Slices of unknown
    /// threads are dropped.
    pub fn to_segments(&self, input_of: &HashMap<i64, usize>) -> Vec<Vec<ScheduleEntry>> {
        // Per-thread slice order across all cpus decides input_seq and end.
        let mut per_tid: HashMap<i64, Vec<(u64, u64, usize)>> = HashMap::new();
        for (out, entries) in self.cpus.values().enumerate() {
            for e in entries {
                per_tid
                    .entry(e.tid)
                    .or_default()
                    .push((e.timestamp, e.start_instruction, out));
            }
        }
        let mut seq_and_end: HashMap<(i64, u64, usize), (u32, u64)> = HashMap::new();
        for (tid, slices) in &mut per_tid {
            slices.sort_unstable();
            for (i, &(ts, start, out)) in slices.iter().enumerate() {
                let end = slices.get(i + 1).map_or(TO_END, |next| next.1);
                seq_and_end.insert((*tid, ts, out), (i as u32, end.max(start)));
            }
        }

        self.cpus
            .values()
            .enumerate()
            .map(|(out, entries)| {
                entries
                    .iter()
                    .filter_map(|e| {
                        let input = *input_of.get(&e.tid)?;
                        let (seq, end) = seq_and_end[&(e.tid, e.timestamp, out)];
                        let mut seg =
                            ScheduleEntry::run(out, input, seq, e.start_instruction, e.timestamp);
                        seg.end = end;
                        Some(seg)
                    })
                    .collect()
            })
            .collect()
    }

    /// Estimated instruction count retired by `tid` at `timestamp`.
    ///
    /// Linear interpolation between the two samples bracketing the
    /// timestamp; the error is at most the instruction distance between
    /// those samples.  Returns `None` past the last sample or for unknown
    /// threads.
    pub fn instructions_at(&self, tid: i64, timestamp: u64) -> Option<u64> {
        let samples = self.samples(tid);
        let first = samples.first()?;
        if timestamp <= first.0 {
            return Some(first.1);
        }
        for pair in samples.windows(2) {
            let ((t0, i0), (t1, i1)) = (pair[0], pair[1]);
            if timestamp <= t1 {
                if t1 == t0 || i1 <= i0 {
                    return Some(i0.max(i1));
                }
                let frac = (timestamp - t0) as f64 / (t1 - t0) as f64;
                return Some(i0 + ((i1 - i0) as f64 * frac) as u64);
            }
        }
        None
    }

    /// Convert timestamp ranges into instruction regions for `tid`.
    ///
    /// Empty ranges are dropped and overlapping ones merged, so the result
    /// always passes [`validate_regions`](crate::workload::validate_regions).
    pub fn regions_for(&self, tid: i64, ranges: &[TimeRange]) -> Vec<Region> {
        let mut regions: Vec<Region> = Vec::new();
        for range in ranges {
            let Some(start_count) = self.instructions_at(tid, range.start) else {
                continue;
            };
            let start = start_count + 1;
            let stop = if range.stop == 0 {
                0
            } else {
                self.instructions_at(tid, range.stop).unwrap_or(0)
            };
            if stop != 0 && stop < start {
                continue;
            }
            match regions.last_mut() {
                Some(prev) if prev.is_open_ended() => break,
                Some(prev) if start <= prev.stop + 1 => {
                    prev.stop = if stop == 0 { 0 } else { prev.stop.max(stop) };
                }
                _ => regions.push(Region::new(start, stop)),
            }
        }
        debug!(tid, ranges = ranges.len(), regions = ?regions, "times of interest converted");
        regions
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
