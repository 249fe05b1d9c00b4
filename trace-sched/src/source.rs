/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Record sources: sequential producers of records for one input.
//!
//! The scheduler owns one boxed [`RecordSource`] per input and only ever asks
//! it for the next record.  Read-ahead, push-back and region skipping are
//! handled by the scheduler itself, so a source can be as simple as an
//! iterator.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::record::{MemRecord, TraceRecord};

/// Failure while pulling a record from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open trace '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed on '{name}' at line {line}: {detail}")]
    Read {
        name: String,
        line: u64,
        detail: String,
    },
}

/// Sequential producer of typed trace records for one input.
pub trait RecordSource<R>: Send {
    /// Returns `Ok(None)` at end of stream.
    fn read_next(&mut self) -> Result<Option<R>, SourceError>;

    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        "<anonymous>"
    }
}

// ── VecSource ─────────────────────────────────────────────────────────────────

/// In-memory source over a pre-built list of records.
#[derive(Debug, Clone)]
pub struct VecSource<R> {
    name: String,
    records: VecDeque<R>,
}

impl<R> VecSource<R> {
    pub fn new(name: impl Into<String>, records: impl IntoIterator<Item = R>) -> Self {
        Self {
            name: name.into(),
            records: records.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl<R: Send> RecordSource<R> for VecSource<R> {
    fn read_next(&mut self) -> Result<Option<R>, SourceError> {
        Ok(self.records.pop_front())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ── JsonLinesSource ───────────────────────────────────────────────────────────

/// File source with one JSON-encoded [`MemRecord`] per line.
///
/// The first record is read at open time so the caller can learn the
/// thread identity before scheduling starts.  Blank lines are skipped.
pub struct JsonLinesSource {
    name: String,
    reader: BufReader<File>,
    line: u64,
    first: Option<MemRecord>,
}

impl JsonLinesSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut src = Self {
            name: path.display().to_string(),
            reader: BufReader::new(file),
            line: 0,
            first: None,
        };
        src.first = src.parse_next()?;
        debug!(trace = %src.name, first = ?src.first, "opened JSON-lines trace");
        Ok(src)
    }

    /// `(tid, pid)` of the first record, or `None` for an empty file.
    pub fn first_ids(&self) -> Option<(i64, i64)> {
        self.first.map(|r| (r.tid(), r.pid()))
    }

    fn parse_next(&mut self) -> Result<Option<MemRecord>, SourceError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = self
                .reader
                .read_line(&mut buf)
                .map_err(|e| SourceError::Read {
                    name: self.name.clone(),
                    line: self.line + 1,
                    detail: e.to_string(),
                })?;
            if n == 0 {
                return Ok(None);
            }
            self.line += 1;
            let text = buf.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text)
                .map(Some)
                .map_err(|e| SourceError::Read {
                    name: self.name.clone(),
                    line: self.line,
                    detail: e.to_string(),
                });
        }
    }
}

impl RecordSource<MemRecord> for JsonLinesSource {
    fn read_next(&mut self) -> Result<Option<MemRecord>, SourceError> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        self.parse_next()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MarkerKind, RecordKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn jsonl(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn vec_source_drains_in_order() {
        let mut src = VecSource::new(
            "t",
            vec![
                MemRecord::instruction(1, 5, 5),
                MemRecord::instruction(2, 5, 5),
            ],
        );
        assert_eq!(src.read_next().unwrap().unwrap().kind(), RecordKind::Instruction { pc: 1 });
        assert_eq!(src.remaining(), 1);
        assert!(src.read_next().unwrap().is_some());
        assert!(src.read_next().unwrap().is_none());
    }

    #[test]
    fn json_lines_source_reads_all_records() {
        let f = jsonl(
            r#"{"tid":51,"pid":7,"type":"marker","kind":"timestamp","value":10}

{"tid":51,"pid":7,"type":"instruction","pc":4096}
"#,
        );
        let mut src = JsonLinesSource::open(f.path()).unwrap();
        assert_eq!(src.first_ids(), Some((51, 7)));

        let ts = src.read_next().unwrap().unwrap();
        assert_eq!(ts.marker_info(), Some((MarkerKind::Timestamp, 10)));
        let instr = src.read_next().unwrap().unwrap();
        assert!(instr.is_instruction());
        assert!(src.read_next().unwrap().is_none());
    }

    #[test]
    fn json_lines_source_reports_bad_line() {
        let f = jsonl("{\"tid\":1,\"pid\":1,\"type\":\"thread_exit\"}\nnot json\n");
        let mut src = JsonLinesSource::open(f.path()).unwrap();
        assert!(src.read_next().unwrap().is_some());
        let err = src.read_next().unwrap_err();
        assert!(matches!(err, SourceError::Read { line: 2, .. }), "got {err}");
    }

    #[test]
    fn missing_file_is_open_error() {
        let err = JsonLinesSource::open(Path::new("/nonexistent/trace.jsonl"))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }
}
