/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Length-delimited protobuf schedule files.
//!
//! Layout: one [`ScheduleHeader`] followed by any number of
//! [`ScheduleEntry`] messages, each prefixed by its varint length.  Entries
//! are written as outputs close them, so the file is valid (if incomplete)
//! after every flush.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::bytes::Buf;
use prost::Message;
use tracing::{debug, info};

use super::{RecordedSchedule, ScheduleEntry, ScheduleError, ScheduleHeader, ScheduleSink, ScheduleSource};

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct ProstScheduleWriter {
    path: PathBuf,
    out: BufWriter<File>,
    scratch: Vec<u8>,
    written: u64,
}

impl ProstScheduleWriter {
    pub fn create(path: &Path) -> Result<Self, ScheduleError> {
        let file = File::create(path).map_err(|source| ScheduleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Recording schedule to: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            scratch: Vec::with_capacity(64),
            written: 0,
        })
    }

    pub fn entries_written(&self) -> u64 {
        self.written
    }

    fn write_message(&mut self, msg: &impl Message) -> Result<(), ScheduleError> {
        self.scratch.clear();
        msg.encode_length_delimited(&mut self.scratch)?;
        self.out
            .write_all(&self.scratch)
            .map_err(|source| ScheduleError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

impl ScheduleSink for ProstScheduleWriter {
    fn begin(&mut self, header: &ScheduleHeader) -> Result<(), ScheduleError> {
        self.write_message(header)
    }

    fn append(&mut self, entry: &ScheduleEntry) -> Result<(), ScheduleError> {
        self.write_message(entry)?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ScheduleError> {
        debug!(path = %self.path.display(), entries = self.written, "flushing schedule");
        self.out.flush().map_err(|source| ScheduleError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct ProstScheduleReader {
    path: PathBuf,
}

impl ProstScheduleReader {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl ScheduleSource for ProstScheduleReader {
    fn load(&mut self) -> Result<RecordedSchedule, ScheduleError> {
        let mut data = Vec::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_end(&mut data))
            .map_err(|source| ScheduleError::Io {
                path: self.path.clone(),
                source,
            })?;

        let mut buf = data.as_slice();
        if !buf.has_remaining() {
            return Err(ScheduleError::Malformed(format!(
                "'{}' is empty",
                self.path.display()
            )));
        }
        let header = ScheduleHeader::decode_length_delimited(&mut buf)?;
        let mut entries = Vec::new();
        while buf.has_remaining() {
            entries.push(ScheduleEntry::decode_length_delimited(&mut buf)?);
        }
        info!(
            path = %self.path.display(),
            outputs = header.output_count,
            inputs = header.input_count,
            entries = entries.len(),
            "Loaded recorded schedule"
        );
        RecordedSchedule::from_entries(header, entries)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
