/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Synthetic trace generator for manual trace-sched runs.
//!
//! Writes one JSON-lines trace per thread plus a `run.yaml` that points the
//! `trace-sched` driver at them:
//!
//! ```text
//! <out>/
//! ├── run.yaml
//! └── traces/
//!     ├── t0051.jsonl
//!     └── t0052.jsonl
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, error, info};

use trace_sched::record::{MarkerKind, MemRecord, TraceRecord};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Generate synthetic thread traces and a run configuration.
///
/// Example:
///   trace-gen --out /tmp/gen --threads 4 --instrs 5000 --outputs 2
#[derive(Debug, Parser)]
#[command(
    name = "trace-gen",
    about = "Synthetic trace generator for trace-sched – NOT for production",
    long_about = None,
)]
struct Cli {
    /// Directory receiving run.yaml and traces/.
    #[arg(long = "out")]
    out: PathBuf,

    /// Number of threads (one trace file each).
    #[arg(short = 't', long = "threads", default_value_t = 4)]
    threads: usize,

    /// Instructions per thread.
    #[arg(short = 'n', long = "instrs", default_value_t = 1_000)]
    instrs: u64,

    /// First thread id; the rest follow consecutively.
    #[arg(long = "base-tid", default_value_t = 51)]
    base_tid: i64,

    /// Instructions between timestamp markers.
    #[arg(long = "timestamp-every", default_value_t = 100)]
    timestamp_every: u64,

    /// Probability, per timestamp interval, of a maybe-blocking syscall.
    #[arg(long = "syscall-rate", default_value_t = 0.1)]
    syscall_rate: f64,

    /// Probability, per syscall, that it hands off directly to the next thread.
    #[arg(long = "direct-switch-rate", default_value_t = 0.0)]
    direct_switch_rate: f64,

    /// Outputs written into run.yaml.
    #[arg(long = "outputs", default_value_t = 2)]
    outputs: usize,

    /// Quantum (instructions) written into run.yaml.
    #[arg(long = "quantum", default_value_t = 200)]
    quantum: u64,

    /// RNG seed; the same seed yields byte-identical traces.
    #[arg(long = "seed", default_value_t = 0)]
    seed: u64,
}

// ── run.yaml shape ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenRun {
    outputs: usize,
    options: GenOptions,
    workloads: Vec<GenWorkload>,
}

#[derive(Debug, Serialize)]
struct GenOptions {
    mapping: &'static str,
    quantum_duration_instrs: u64,
}

#[derive(Debug, Serialize)]
struct GenWorkload {
    name: String,
    path: PathBuf,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        out      = %cli.out.display(),
        threads  = cli.threads,
        instrs   = cli.instrs,
        seed     = cli.seed,
        "trace-gen starting"
    );

    if let Err(e) = run(&cli) {
        error!("trace-gen failed: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let trace_dir = cli.out.join("traces");
    fs::create_dir_all(&trace_dir)
        .with_context(|| format!("Cannot create {}", trace_dir.display()))?;

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let tids: Vec<i64> = (0..cli.threads as i64).map(|i| cli.base_tid + i).collect();
    for (i, &tid) in tids.iter().enumerate() {
        let next = tids.get(i + 1).or(tids.first()).copied().filter(|&t| t != tid);
        let records = generate_thread(cli, &mut rng, tid, next);
        let path = trace_dir.join(format!("t{tid:04}.jsonl"));
        write_trace(&path, &records)?;
        debug!(tid, records = records.len(), trace = %path.display(), "trace written");
    }

    let run = GenRun {
        outputs: cli.outputs,
        options: GenOptions {
            mapping: "any_output",
            quantum_duration_instrs: cli.quantum,
        },
        workloads: vec![GenWorkload {
            name: "synthetic".into(),
            path: PathBuf::from("traces"),
        }],
    };
    let run_path = cli.out.join("run.yaml");
    let yaml = serde_yaml::to_string(&run)?;
    fs::write(&run_path, yaml).with_context(|| format!("Cannot write {}", run_path.display()))?;

    info!(threads = tids.len(), run = %run_path.display(), "Traces generated");
    Ok(())
}

/// One thread: header, then timestamped instruction runs with the occasional
/// blocking syscall.
fn generate_thread(cli: &Cli, rng: &mut ChaCha8Rng, tid: i64, handoff: Option<i64>) -> Vec<MemRecord> {
    let pid = tid;
    let mut records = vec![
        MemRecord::marker(MarkerKind::Version, 1, tid, pid),
        MemRecord::marker(MarkerKind::PageSize, 4096, tid, pid),
    ];
    let mut now: u64 = 1_000 + rng.gen_range(0..100);
    let mut pc: u64 = 0x1000 * (tid as u64);
    let mut emitted = 0;

    while emitted < cli.instrs {
        records.push(MemRecord::marker(MarkerKind::Timestamp, now, tid, pid));
        records.push(MemRecord::marker(MarkerKind::CpuId, 0, tid, pid));
        let chunk = cli.timestamp_every.min(cli.instrs - emitted);
        for _ in 0..chunk {
            records.push(MemRecord::instruction(pc, tid, pid));
            pc += 4;
        }
        emitted += chunk;
        now += chunk.max(1);

        if emitted < cli.instrs && rng.gen_bool(cli.syscall_rate.clamp(0.0, 1.0)) {
            let number = rng.gen_range(0..64);
            records.push(MemRecord::marker(MarkerKind::Syscall, number, tid, pid));
            records.push(MemRecord::marker(MarkerKind::MaybeBlockingSyscall, 0, tid, pid));
            if let Some(target) = handoff {
                if rng.gen_bool(cli.direct_switch_rate.clamp(0.0, 1.0)) {
                    records.push(MemRecord::marker(
                        MarkerKind::DirectThreadSwitch,
                        target as u64,
                        tid,
                        pid,
                    ));
                }
            }
            // latency lands in the next timestamp
            now += rng.gen_range(10..5_000);
        }
    }
    records.push(MemRecord::thread_exit(tid, pid));
    records
}

fn write_trace(path: &Path, records: &[MemRecord]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for rec in records {
        serde_json::to_writer(&mut w, rec)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}
