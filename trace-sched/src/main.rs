/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};

use trace_sched::config::RunConfig;
use trace_sched::inject::KernelTemplates;
use trace_sched::record::MemRecord;
use trace_sched::schedule::{AsTracedMap, ProstScheduleReader, ProstScheduleWriter};
use trace_sched::scheduler::{Attachments, OutputStats, Pull, Scheduler, StreamError};
use trace_sched::source::{JsonLinesSource, RecordSource};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Trace scheduler driver.
///
/// Example:
///   trace-sched -c run.yaml --record schedule.pb --out sched-out/
#[derive(Debug, Parser)]
#[command(
    name = "trace-sched",
    about = "Trace scheduler – replays thread traces across simulated hardware contexts",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML run configuration.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Override the number of outputs from the run configuration.
    #[arg(short = 'o', long = "outputs")]
    outputs: Option<usize>,

    /// Record the schedule to this file.
    #[arg(short = 'r', long = "record", conflicts_with = "replay")]
    record: Option<PathBuf>,

    /// Replay a previously recorded schedule (forces replay mapping).
    #[arg(short = 'p', long = "replay")]
    replay: Option<PathBuf>,

    /// Write each output's record stream to <DIR>/output_<N>.jsonl.
    #[arg(long = "out")]
    out_dir: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        config  = %cli.config.display(),
        outputs = ?cli.outputs,
        record  = ?cli.record,
        replay  = ?cli.replay,
        out_dir = ?cli.out_dir,
        "trace-sched starting up"
    );

    if let Err(e) = run(cli).await {
        error!("trace-sched failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = RunConfig::load_from_file(&cli.config)?;
    let output_count = cli.outputs.unwrap_or(cfg.outputs);
    if cli.replay.is_some() {
        cfg.options.mapping = trace_sched::config::MappingPolicy::Replay;
    }

    // ── Collaborators ─────────────────────────────────────────────────────────
    let mut attachments = Attachments::default();
    if let Some(path) = &cfg.as_traced {
        attachments = attachments.as_traced(AsTracedMap::load_from_file(path)?);
    }
    if let Some(path) = &cfg.kernel_templates {
        attachments = attachments.kernel_templates(load_templates(path)?);
    }
    if let Some(path) = &cli.record {
        let writer = ProstScheduleWriter::create(path)
            .with_context(|| format!("Cannot record schedule to {}", path.display()))?;
        attachments = attachments.recording(writer);
    }
    if let Some(path) = &cli.replay {
        attachments = attachments.replaying(ProstScheduleReader::open(path));
    }

    let time_step = cfg.options.driver_time_step();
    if let Some(step) = time_step {
        info!(step, "Time-based quanta: driving outputs with a simulated clock");
    }

    let workloads = cfg.open_workloads()?;
    let sched = Scheduler::new(workloads, output_count, cfg.options.clone(), attachments)
        .context("Failed to initialise scheduler")?;
    let sched = Arc::new(sched);

    if let Some(dir) = &cli.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create output directory: {}", dir.display()))?;
    }

    // ── One blocking worker per output ────────────────────────────────────────
    let mut workers = Vec::with_capacity(output_count);
    for ordinal in 0..output_count {
        let sched = Arc::clone(&sched);
        let sink = cli
            .out_dir
            .as_ref()
            .map(|d| d.join(format!("output_{ordinal}.jsonl")));
        workers.push(tokio::task::spawn_blocking(move || {
            drain_output(&sched, ordinal, time_step, sink.as_deref())
        }));
    }

    let mut failed = false;
    let mut totals = OutputStats::default();
    for (ordinal, worker) in workers.into_iter().enumerate() {
        match worker.await.context("Output worker panicked")? {
            Ok(stats) => {
                info!(
                    output      = ordinal,
                    records     = stats.records,
                    instrs      = stats.instructions,
                    switches    = stats.switches,
                    preemptions = stats.preemptions,
                    migrations  = stats.migrations,
                    steals      = stats.steals,
                    idle        = format!("{:.1}%", stats.idle_fraction() * 100.0),
                    wait        = format!("{:.1}%", stats.wait_fraction() * 100.0),
                    "Output finished"
                );
                totals.records += stats.records;
                totals.instructions += stats.instructions;
                totals.migrations += stats.migrations;
            }
            Err(e) => {
                error!(output = ordinal, "Output failed: {:#}", e);
                failed = true;
            }
        }
    }

    sched
        .flush_schedule()
        .context("Failed to flush recorded schedule")?;
    info!(
        records = totals.records,
        instrs = totals.instructions,
        migrations = totals.migrations,
        "Scheduling complete"
    );
    if failed {
        bail!("one or more outputs failed");
    }
    Ok(())
}

/// Pull every record of one output, optionally writing them as JSON lines.
///
/// With `time_step` set, every pull advances this output's simulated clock
/// by that many time units and passes it to the scheduler.
fn drain_output(
    sched: &Scheduler<MemRecord>,
    ordinal: usize,
    time_step: Option<u64>,
    sink: Option<&Path>,
) -> Result<OutputStats> {
    let stream = sched
        .output(ordinal)
        .with_context(|| format!("no output {ordinal}"))?;
    let mut writer = match sink {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Cannot create {}", path.display()))?,
        )),
        None => None,
    };

    let mut now: u64 = 0;
    loop {
        let pulled = match time_step {
            Some(step) => {
                now = now.saturating_add(step);
                stream.next_record_at(now)
            }
            None => stream.next_record(),
        };
        match pulled {
            Ok(Pull::Record(rec)) => {
                if let Some(w) = writer.as_mut() {
                    serde_json::to_writer(&mut *w, &rec)?;
                    w.write_all(b"\n")?;
                }
            }
            Ok(Pull::Wait | Pull::Idle) => std::thread::yield_now(),
            Ok(Pull::Eof) => break,
            Err(StreamError::RecordFailed(detail)) => {
                warn!(output = ordinal, %detail, "schedule recording failed, continuing");
            }
            Err(e) => return Err(e).with_context(|| format!("output {ordinal}")),
        }
    }
    if let Some(mut w) = writer {
        w.flush()?;
    }
    debug!(output = ordinal, "output drained");
    Ok(stream.stats())
}

/// Read a delimited JSON-lines template file.
fn load_templates(path: &Path) -> Result<KernelTemplates<MemRecord>> {
    info!("Loading kernel templates from: {}", path.display());
    let mut src = JsonLinesSource::open(path)?;
    let mut records = Vec::new();
    while let Some(rec) = src.read_next()? {
        records.push(rec);
    }
    let templates = KernelTemplates::from_records(records)
        .with_context(|| format!("Malformed kernel templates: {}", path.display()))?;
    if templates.is_empty() {
        warn!("Kernel template file defines no templates");
    }
    Ok(templates)
}
