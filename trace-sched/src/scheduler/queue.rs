/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ready queues: one priority-ordered set of runnable inputs per output, or a
//! single shared one.
//!
//! Each queue is a `BTreeSet` of [`QueueKey`]s, so iteration is always in
//! scheduling order and arbitrary removal (wake-ups, direct switches,
//! stealing, rebalancing) is `O(log n)`:
//!
//! ```text
//! key = (priority desc, next timestamp asc*, arrival order asc, input)
//!                        * only when ordering by timestamp
//! ```

use std::cmp::Reverse;
use std::collections::BTreeSet;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    rank: Reverse<i32>,
    timestamp: u64,
    order: u64,
    pub input: usize,
}

impl QueueKey {
    /// Part of the key that defines "equally eligible" candidates.
    pub fn tie(&self) -> (Reverse<i32>, u64) {
        (self.rank, self.timestamp)
    }
}

#[derive(Debug)]
pub(crate) struct ReadyQueues {
    queues: Vec<BTreeSet<QueueKey>>,
    /// Per input: queue index and key while queued.
    slots: Vec<Option<(usize, QueueKey)>>,
    next_order: u64,
    by_timestamp: bool,
}

impl ReadyQueues {
    pub fn new(queue_count: usize, input_count: usize, by_timestamp: bool) -> Self {
        Self {
            queues: vec![BTreeSet::new(); queue_count.max(1)],
            slots: vec![None; input_count],
            next_order: 0,
            by_timestamp,
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Append `input` to `queue` behind every equal-ranked entry.
    pub fn push(&mut self, input: usize, queue: usize, priority: i32, timestamp: u64) {
        self.remove(input);
        let key = QueueKey {
            rank: Reverse(priority),
            timestamp: if self.by_timestamp { timestamp } else { 0 },
            order: self.next_order,
            input,
        };
        self.next_order += 1;
        self.queues[queue].insert(key);
        self.slots[input] = Some((queue, key));
    }

    /// Returns the queue the input was removed from.
    pub fn remove(&mut self, input: usize) -> Option<usize> {
        let (queue, key) = self.slots[input].take()?;
        self.queues[queue].remove(&key);
        Some(queue)
    }

    pub fn queue_of(&self, input: usize) -> Option<usize> {
        self.slots[input].map(|(q, _)| q)
    }

    pub fn len(&self, queue: usize) -> usize {
        self.queues[queue].len()
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(BTreeSet::len).sum()
    }

    /// Keys of `queue` in scheduling order.
    pub fn iter(&self, queue: usize) -> impl Iterator<Item = &QueueKey> + '_ {
        self.queues[queue].iter()
    }

    /// Every queued input, any queue.
    pub fn all_inputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.queues.iter().flat_map(|q| q.iter().map(|k| k.input))
    }

    /// Move `input` to `queue`, keeping its position key.
    fn relocate(&mut self, input: usize, queue: usize) {
        if let Some((from, key)) = self.slots[input] {
            self.queues[from].remove(&key);
            self.queues[queue].insert(key);
            self.slots[input] = Some((queue, key));
        }
    }

    /// Move every entry of `from` to the least loaded queue `allowed` by its
    /// input.  Entries with nowhere to go stay put.
    pub fn drain_queue(
        &mut self,
        from: usize,
        active: &[bool],
        allowed: impl Fn(usize, usize) -> bool,
    ) -> usize {
        let inputs: Vec<usize> = self.queues[from].iter().map(|k| k.input).collect();
        let mut moved = 0;
        for input in inputs {
            let target = (0..self.queues.len())
                .filter(|&q| q != from && active.get(q).copied().unwrap_or(false))
                .filter(|&q| allowed(input, q))
                .min_by_key(|&q| self.queues[q].len());
            if let Some(q) = target {
                self.relocate(input, q);
                moved += 1;
            }
        }
        moved
    }

    /// Equalise queue lengths across active queues.
    ///
    /// Repeatedly moves the least urgent movable entry from a longer queue
    /// to a queue at least two entries shorter.  Returns the number of moves.
    pub fn rebalance(&mut self, active: &[bool], allowed: impl Fn(usize, usize) -> bool) -> usize {
        let live: Vec<usize> = (0..self.queues.len())
            .filter(|&q| active.get(q).copied().unwrap_or(false))
            .collect();
        if live.len() < 2 {
            return 0;
        }

        let mut moved = 0;
        'outer: loop {
            let mut by_len = live.clone();
            by_len.sort_by_key(|&q| (Reverse(self.queues[q].len()), q));
            for &large in &by_len {
                for &small in by_len.iter().rev() {
                    if self.queues[large].len() <= self.queues[small].len() + 1 {
                        continue;
                    }
                    let candidate = self.queues[large]
                        .iter()
                        .rev()
                        .find(|k| allowed(k.input, small))
                        .map(|k| k.input);
                    if let Some(input) = candidate {
                        self.relocate(input, small);
                        moved += 1;
                        continue 'outer;
                    }
                }
            }
            break;
        }
        if moved > 0 {
            debug!(moved, total = self.total_len(), "ready queues rebalanced");
        }
        moved
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
