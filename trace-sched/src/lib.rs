/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! trace-sched – replays recorded thread traces across simulated hardware
//! contexts
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── record       – record model, marker vocabulary, trace header
//! ├── source       – per-input record sources (in-memory, JSON lines)
//! ├── workload     – workloads, thread modifiers, regions of interest
//! ├── config/      – scheduler options and run YAML
//! ├── inject       – kernel context-switch / syscall templates
//! ├── schedule/    – recorded schedules (protobuf) and as-traced cpu maps
//! └── scheduler/   – the scheduler and its per-output streams
//! ```

pub mod config;
pub mod inject;
pub mod record;
pub mod schedule;
pub mod scheduler;
pub mod source;
pub mod workload;
