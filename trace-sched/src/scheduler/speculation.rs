/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Nested speculation frames of one output.
//!
//! While a frame is open the output presents synthetic instructions at
//! consecutive addresses starting from the requested one.  A frame may hold
//! the record that was current when speculation began; closing the last
//! frame hands it back so the real stream resumes with it.

#[derive(Debug)]
struct SpecFrame<T> {
    next_pc: u64,
    /// Delivered first by this frame: the record queued by a nested frame
    /// that has since closed.
    pending: Option<T>,
    /// Record queued when this frame was opened.
    queued: Option<T>,
}

/// What the top frame produces next.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SpecStep<T> {
    Pending(T),
    Synthetic { pc: u64 },
}

#[derive(Debug)]
pub(crate) struct SpecStack<T> {
    frames: Vec<SpecFrame<T>>,
}

impl<T> Default for SpecStack<T> {
    fn default() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<T> SpecStack<T> {
    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn start(&mut self, pc: u64, queued: Option<T>) {
        self.frames.push(SpecFrame {
            next_pc: pc,
            pending: None,
            queued,
        });
    }

    /// Close the innermost frame.
    ///
    /// Returns `Err(())` if no frame is open.  On success returns the queued
    /// record that the real stream must resume with, which is only ever
    /// `Some` when the outermost frame closes.
    pub fn stop(&mut self) -> Result<Option<T>, ()> {
        let frame = self.frames.pop().ok_or(())?;
        match (frame.queued, self.frames.last_mut()) {
            (Some(rec), Some(outer)) => {
                outer.pending = Some(rec);
                Ok(None)
            }
            (queued, _) => Ok(queued),
        }
    }

    pub fn next(&mut self) -> Option<SpecStep<T>> {
        let frame = self.frames.last_mut()?;
        if let Some(rec) = frame.pending.take() {
            return Some(SpecStep::Pending(rec));
        }
        let pc = frame.next_pc;
        frame.next_pc = frame.next_pc.wrapping_add(1);
        Some(SpecStep::Synthetic { pc })
    }
}
