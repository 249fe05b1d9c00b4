//! Scheduler options and run configuration loading.
//!
//! [`SchedulerOptions`] is the immutable configuration object a
//! [`Scheduler`](crate::scheduler::Scheduler) is built from.  It is a plain
//! value (no process-wide state), so several independent schedulers can
//! coexist in one process.
//!
//! [`RunConfig`] is the YAML file consumed by the `trace-sched` binary:
//! ```yaml
//! outputs: 2
//! options:
//!   mapping: any_output
//!   quantum_unit: instructions
//!   quantum_duration_instrs: 2
//! workloads:
//!   - name: app
//!     path: traces/app        # directory of *.jsonl files, or one file
//!     output_limit: 1
//!     modifiers:
//!       - tids: [51]
//!         priority: 2
//!         output_binding: [0]
//!         regions_of_interest: [{ start: 1, stop: 100 }]
//! as_traced: traces/cpu_schedule.yaml
//! kernel_templates: traces/kernel.jsonl
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::record::MemRecord;
use crate::source::JsonLinesSource;
use crate::workload::{InputSpec, ThreadModifiers, TimeRange, WorkloadSpec};

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_QUANTUM_INSTRS: u64 = 10_000_000;
pub const DEFAULT_QUANTUM_US: u64 = 5_000;
/// Simulated time units per microsecond.
pub const DEFAULT_TIME_UNITS_PER_US: u64 = 100;
pub const DEFAULT_MIGRATION_THRESHOLD_US: u64 = 500;
pub const DEFAULT_REBALANCE_PERIOD_US: u64 = 50_000;
/// Latency (µs) above which any syscall switches the input out.
pub const DEFAULT_SYSCALL_SWITCH_THRESHOLD_US: u64 = 30_000_000;
/// Latency (µs) above which a maybe-blocking syscall switches the input out.
pub const DEFAULT_BLOCKING_SWITCH_THRESHOLD_US: u64 = 500;
pub const DEFAULT_BLOCK_TIME_MULTIPLIER: f64 = 0.1;
pub const DEFAULT_BLOCK_TIME_MAX_US: u64 = 25_000_000;
pub const DEFAULT_EXIT_IF_FRACTION_INPUTS_LEFT: f64 = 0.1;

// ── Policy enums ──────────────────────────────────────────────────────────────

/// How inputs are mapped onto outputs.  Selected once per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingPolicy {
    /// Input *i* always runs on output *i mod N*.
    Consistent,
    /// Follow the traced cpu of every input (requires an as-traced map).
    AsRecorded,
    /// Full dynamic scheduling: any input may run on any output.
    #[default]
    AnyOutput,
    /// Reproduce a previously recorded schedule exactly.
    Replay,
}

impl MappingPolicy {
    /// Policies whose presented cpu / time values are virtual.
    pub fn is_virtual(self) -> bool {
        matches!(self, MappingPolicy::AnyOutput | MappingPolicy::Replay)
    }
}

/// Unit in which quanta are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantumUnit {
    #[default]
    Instructions,
    /// Simulated time; requires `next_record_at`.
    Time,
}

// ── SchedulerOptions ──────────────────────────────────────────────────────────

/// Immutable scheduler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerOptions {
    pub mapping: MappingPolicy,

    // ── Dependencies ──────────────────────────────────────────────────────────
    /// Order switch-time choices by next timestamp.
    pub dependency_timestamps: bool,
    /// With `dependency_timestamps`: refuse (→ `Wait`) candidates whose next
    /// timestamp is more than this many µs ahead of every other active
    /// input.  `None` = ordering preference only.
    pub timestamp_tolerance_us: Option<u64>,
    pub honor_direct_switches: bool,
    /// When `false`, indefinite unschedules are capped at
    /// `block_time_max_us`.
    pub honor_infinite_timeouts: bool,

    // ── Quanta ────────────────────────────────────────────────────────────────
    pub quantum_unit: QuantumUnit,
    pub quantum_duration_instrs: u64,
    pub quantum_duration_us: u64,
    pub time_units_per_us: u64,

    // ── Migration / rebalancing ───────────────────────────────────────────────
    pub migration_threshold_us: u64,
    pub rebalance_period_us: u64,
    /// One ready queue shared by all outputs instead of one per output.
    pub shared_ready_queue: bool,
    pub randomize_next_input: bool,
    pub rng_seed: u64,

    // ── Blocking model ────────────────────────────────────────────────────────
    pub syscall_switch_threshold_us: u64,
    pub blocking_switch_threshold_us: u64,
    pub block_time_multiplier: f64,
    pub block_time_max_us: u64,

    // ── Termination ───────────────────────────────────────────────────────────
    pub exit_if_fraction_inputs_left: f64,

    // ── Presentation ──────────────────────────────────────────────────────────
    /// Rewrite cpu-id / timestamp markers and remap ids for virtual policies.
    pub virtualize_markers: bool,
    /// Introspected ordinals are input-local (`true`) or output-cumulative.
    pub local_ordinals: bool,
    /// Read each input up to its first timestamp during construction.
    pub read_inputs_in_init: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            mapping: MappingPolicy::AnyOutput,
            dependency_timestamps: false,
            timestamp_tolerance_us: None,
            honor_direct_switches: true,
            honor_infinite_timeouts: false,
            quantum_unit: QuantumUnit::Instructions,
            quantum_duration_instrs: DEFAULT_QUANTUM_INSTRS,
            quantum_duration_us: DEFAULT_QUANTUM_US,
            time_units_per_us: DEFAULT_TIME_UNITS_PER_US,
            migration_threshold_us: DEFAULT_MIGRATION_THRESHOLD_US,
            rebalance_period_us: DEFAULT_REBALANCE_PERIOD_US,
            shared_ready_queue: false,
            randomize_next_input: false,
            rng_seed: 0,
            syscall_switch_threshold_us: DEFAULT_SYSCALL_SWITCH_THRESHOLD_US,
            blocking_switch_threshold_us: DEFAULT_BLOCKING_SWITCH_THRESHOLD_US,
            block_time_multiplier: DEFAULT_BLOCK_TIME_MULTIPLIER,
            block_time_max_us: DEFAULT_BLOCK_TIME_MAX_US,
            exit_if_fraction_inputs_left: DEFAULT_EXIT_IF_FRACTION_INPUTS_LEFT,
            virtualize_markers: true,
            local_ordinals: true,
            read_inputs_in_init: true,
        }
    }
}

impl SchedulerOptions {
    /// Returns a description of the first invalid field, if any.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.quantum_duration_instrs == 0 {
            return Err("quantum_duration_instrs must be > 0".into());
        }
        if self.quantum_duration_us == 0 {
            return Err("quantum_duration_us must be > 0".into());
        }
        if self.time_units_per_us == 0 {
            return Err("time_units_per_us must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.exit_if_fraction_inputs_left) {
            return Err(format!(
                "exit_if_fraction_inputs_left {} outside [0, 1]",
                self.exit_if_fraction_inputs_left
            ));
        }
        if !self.block_time_multiplier.is_finite() || self.block_time_multiplier < 0.0 {
            return Err(format!(
                "block_time_multiplier {} must be finite and >= 0",
                self.block_time_multiplier
            ));
        }
        if self.timestamp_tolerance_us.is_some() && !self.dependency_timestamps {
            return Err("timestamp_tolerance_us requires dependency_timestamps".into());
        }
        Ok(())
    }

    /// Convert microseconds to simulated time units.
    pub fn scale_us(&self, us: u64) -> u64 {
        us.saturating_mul(self.time_units_per_us)
    }

    /// Simulated time a driver advances per pull, one microsecond each, when
    /// quanta are time-based under a dynamic mapping.  `None` means the
    /// scheduler counts pulls itself and plain `next_record` works.
    pub fn driver_time_step(&self) -> Option<u64> {
        let dynamic = matches!(self.mapping, MappingPolicy::AnyOutput | MappingPolicy::Consistent);
        (self.quantum_unit == QuantumUnit::Time && dynamic).then_some(self.time_units_per_us)
    }
}

// ── RunConfig (YAML) ──────────────────────────────────────────────────────────

/// One workload as it appears in the run YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    /// Directory of `*.jsonl` traces (one per thread) or a single file.
    pub path: PathBuf,
    #[serde(default)]
    pub only_threads: BTreeSet<i64>,
    #[serde(default)]
    pub only_shards: BTreeSet<usize>,
    pub output_limit: Option<usize>,
    #[serde(default)]
    pub modifiers: Vec<ThreadModifiers>,
    #[serde(default)]
    pub times_of_interest: Vec<TimeRange>,
}

/// Top-level run file consumed by the `trace-sched` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_outputs")]
    pub outputs: usize,
    #[serde(default)]
    pub options: SchedulerOptions,
    pub workloads: Vec<WorkloadConfig>,
    pub as_traced: Option<PathBuf>,
    pub kernel_templates: Option<PathBuf>,
}

fn default_outputs() -> usize {
    1
}

impl RunConfig {
    /// Parse a run YAML.  Relative paths inside it are resolved against the
    /// file's directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the YAML is
    /// structurally invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading run configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open run configuration: {}", path.display()))?;
        let mut cfg: RunConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for wl in &mut cfg.workloads {
            wl.path = resolve(base, &wl.path);
        }
        cfg.as_traced = cfg.as_traced.map(|p| resolve(base, &p));
        cfg.kernel_templates = cfg.kernel_templates.map(|p| resolve(base, &p));

        if cfg.workloads.is_empty() {
            warn!("Run configuration lists no workloads");
        }
        info!(
            outputs = cfg.outputs,
            workloads = cfg.workloads.len(),
            mapping = ?cfg.options.mapping,
            "Run configuration loaded"
        );
        Ok(cfg)
    }

    /// Open every workload's traces as JSON-lines sources.
    pub fn open_workloads(&self) -> Result<Vec<WorkloadSpec<MemRecord>>> {
        self.workloads.iter().map(open_workload).collect()
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Trace files for one workload, sorted by name so shard ordinals are stable.
fn trace_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("Cannot open trace directory: {}", path.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    Ok(files)
}

fn open_workload(cfg: &WorkloadConfig) -> Result<WorkloadSpec<MemRecord>> {
    let mut inputs = Vec::new();
    for file in trace_files(&cfg.path)? {
        let src = JsonLinesSource::open(&file)
            .with_context(|| format!("Failed to open trace for workload '{}'", cfg.name))?;
        let Some((tid, pid)) = src.first_ids() else {
            warn!(trace = %file.display(), "empty trace file, skipping");
            continue;
        };
        debug!(workload = %cfg.name, tid, pid, trace = %file.display(), "input opened");
        inputs.push(InputSpec::new(tid, pid, src));
    }

    let mut spec = WorkloadSpec::new(cfg.name.clone(), inputs);
    spec.only_threads = cfg.only_threads.clone();
    spec.only_shards = cfg.only_shards.clone();
    spec.output_limit = cfg.output_limit;
    spec.modifiers = cfg.modifiers.clone();
    spec.times_of_interest = cfg.times_of_interest.clone();
    Ok(spec)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
