/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::collections::{BTreeMap, BTreeSet, HashMap};

use proptest::prelude::*;

use super::*;
use crate::config::QuantumUnit;
use crate::inject::SwitchKind;
use crate::record::{MarkerKind, MemRecord, RecordKind, TraceRecord};
use crate::schedule::{
    CpuEntry, EntryKind, MemorySchedule, ScheduleEntry, ScheduleError, ScheduleHeader,
};
use crate::source::VecSource;
use crate::workload::{InputSpec, Region, ThreadModifiers, TimeRange};

// ── Test helpers ──────────────────────────────────────────────────────────────

const PID: i64 = 1;

fn ts(tid: i64, v: u64) -> MemRecord {
    MemRecord::marker(MarkerKind::Timestamp, v, tid, PID)
}

fn ins(tid: i64, pc: u64) -> MemRecord {
    MemRecord::instruction(pc, tid, PID)
}

fn mk(tid: i64, kind: MarkerKind, v: u64) -> MemRecord {
    MemRecord::marker(kind, v, tid, PID)
}

/// A timestamp followed by `n` instructions at pc `1..=n`.
fn thread(tid: i64, first_ts: u64, n: u64) -> Vec<MemRecord> {
    std::iter::once(ts(tid, first_ts))
        .chain((1..=n).map(|pc| ins(tid, pc)))
        .collect()
}

fn input(tid: i64, records: Vec<MemRecord>) -> InputSpec<MemRecord> {
    InputSpec::new(tid, PID, VecSource::new(format!("t{tid}"), records))
}

fn one_workload(inputs: Vec<InputSpec<MemRecord>>) -> Vec<WorkloadSpec<MemRecord>> {
    vec![WorkloadSpec::new("w", inputs)]
}

/// Defaults with early exit disabled.
fn opts() -> SchedulerOptions {
    SchedulerOptions {
        exit_if_fraction_inputs_left: 0.0,
        ..Default::default()
    }
}

fn build(
    workloads: Vec<WorkloadSpec<MemRecord>>,
    outputs: usize,
    options: SchedulerOptions,
) -> Scheduler<MemRecord> {
    Scheduler::new(workloads, outputs, options, Attachments::default()).unwrap()
}

fn pull(s: &Scheduler<MemRecord>, o: usize) -> Pull<MemRecord> {
    s.output(o).unwrap().next_record().unwrap()
}

fn record(s: &Scheduler<MemRecord>, o: usize) -> MemRecord {
    match pull(s, o) {
        Pull::Record(r) => r,
        other => panic!("output {o}: expected a record, got {other:?}"),
    }
}

/// Round-robin every output until all report EOF.
fn drive(s: &Scheduler<MemRecord>) -> Vec<Vec<MemRecord>> {
    let n = s.output_count();
    let mut out = vec![Vec::new(); n];
    let mut done = vec![false; n];
    for _ in 0..100_000 {
        if done.iter().all(|&d| d) {
            return out;
        }
        for o in 0..n {
            if done[o] {
                continue;
            }
            match pull(s, o) {
                Pull::Record(r) => out[o].push(r),
                Pull::Eof => done[o] = true,
                Pull::Wait | Pull::Idle => {}
            }
        }
    }
    panic!("scheduler did not finish");
}

fn tids(records: &[MemRecord]) -> Vec<i64> {
    records.iter().map(|r| r.tid).collect()
}

fn instrs(records: &[MemRecord]) -> Vec<(i64, u64)> {
    records
        .iter()
        .filter_map(|r| match r.kind {
            RecordKind::Instruction { pc } => Some((r.tid, pc)),
            _ => None,
        })
        .collect()
}

// ── Initialisation ────────────────────────────────────────────────────────────

#[test]
fn zero_outputs_rejected() {
    let err = Scheduler::new(
        one_workload(vec![input(51, thread(51, 10, 1))]),
        0,
        opts(),
        Attachments::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));
}

#[test]
fn filtered_out_workload_has_no_inputs() {
    let mut wl = WorkloadSpec::new("w", vec![input(51, thread(51, 10, 1))]);
    wl.only_threads = BTreeSet::from([99]);
    let err = Scheduler::new(vec![wl], 1, opts(), Attachments::default())
        .err()
        .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));
}

#[test]
fn invalid_region_rejected() {
    let wl = WorkloadSpec::new("w", vec![input(51, thread(51, 10, 4))]).with_modifiers(
        ThreadModifiers {
            regions_of_interest: vec![Region::new(0, 2)],
            ..Default::default()
        },
    );
    let err = Scheduler::new(vec![wl], 1, opts(), Attachments::default())
        .err()
        .unwrap();
    assert!(matches!(err, InitError::RegionInvalid { tid: 51, .. }));
}

#[test]
fn times_of_interest_require_map() {
    let mut wl = WorkloadSpec::new("w", vec![input(51, thread(51, 10, 4))]);
    wl.times_of_interest = vec![TimeRange { start: 10, stop: 0 }];
    let err = Scheduler::new(vec![wl], 1, opts(), Attachments::default())
        .err()
        .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));
}

#[test]
fn invalid_options_rejected() {
    let options = SchedulerOptions {
        quantum_duration_instrs: 0,
        ..opts()
    };
    let err = Scheduler::new(
        one_workload(vec![input(51, thread(51, 10, 1))]),
        1,
        options,
        Attachments::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));
}

fn two_cpu_map() -> AsTracedMap {
    AsTracedMap {
        cpus: BTreeMap::from([
            (
                3,
                vec![CpuEntry {
                    tid: 51,
                    timestamp: 100,
                    start_instruction: 0,
                }],
            ),
            (
                5,
                vec![CpuEntry {
                    tid: 52,
                    timestamp: 100,
                    start_instruction: 0,
                }],
            ),
        ]),
    }
}

#[test]
fn as_recorded_needs_matching_cpu_count() {
    let options = SchedulerOptions {
        mapping: MappingPolicy::AsRecorded,
        ..opts()
    };
    let err = Scheduler::new(
        one_workload(vec![input(51, thread(51, 100, 1))]),
        3,
        options,
        Attachments::default().as_traced(two_cpu_map()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));
}

#[test]
fn as_recorded_recording_not_implemented() {
    let options = SchedulerOptions {
        mapping: MappingPolicy::AsRecorded,
        ..opts()
    };
    let err = Scheduler::new(
        one_workload(vec![input(51, thread(51, 100, 1)), input(52, thread(52, 100, 1))]),
        2,
        options,
        Attachments::default()
            .as_traced(two_cpu_map())
            .recording(MemorySchedule::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, InitError::NotImplemented(_)));
}

// ── Dynamic scheduling ────────────────────────────────────────────────────────

#[test]
fn two_threads_two_outputs_instruction_quantum() {
    let options = SchedulerOptions {
        quantum_duration_instrs: 2,
        migration_threshold_us: 0,
        ..opts()
    };
    let s = build(
        one_workload(vec![input(51, thread(51, 100, 4)), input(52, thread(52, 100, 4))]),
        2,
        options,
    );
    let per_output = drive(&s);

    for (o, tid) in [(0, 51), (1, 52)] {
        assert!(tids(&per_output[o]).iter().all(|&t| t == tid), "output {o} mixed inputs");
        assert_eq!(
            instrs(&per_output[o]),
            (1..=4).map(|pc| (tid, pc)).collect::<Vec<_>>()
        );
        let stats = s.output(o).unwrap().stats();
        assert_eq!(stats.preemptions, 1, "output {o}");
        assert_eq!(stats.migrations, 0);
    }
}

#[test]
fn consistent_mapping_pins_inputs() {
    let options = SchedulerOptions {
        mapping: MappingPolicy::Consistent,
        quantum_duration_instrs: 1,
        ..opts()
    };
    let s = build(
        one_workload(vec![
            input(51, thread(51, 10, 3)),
            input(52, thread(52, 10, 3)),
            input(53, thread(53, 10, 3)),
        ]),
        2,
        options,
    );
    let per_output = drive(&s);
    let on0: BTreeSet<i64> = tids(&per_output[0]).into_iter().collect();
    let on1: BTreeSet<i64> = tids(&per_output[1]).into_iter().collect();
    assert_eq!(on0, BTreeSet::from([51, 53]));
    assert_eq!(on1, BTreeSet::from([52]));
}

#[test]
fn higher_priority_runs_first() {
    let wl = WorkloadSpec::new(
        "w",
        vec![input(51, thread(51, 10, 2)), input(52, thread(52, 10, 2))],
    )
    .with_modifiers(ThreadModifiers {
        tids: vec![52],
        priority: 5,
        ..Default::default()
    });
    let s = build(vec![wl], 1, opts());
    assert_eq!(record(&s, 0).tid, 52);
}

#[test]
fn migration_delay_prefers_local_candidate() {
    let make = |threshold_us| {
        let wl = WorkloadSpec::new(
            "w",
            vec![input(51, thread(51, 10, 4)), input(53, thread(53, 10, 4))],
        )
        .with_modifiers(ThreadModifiers {
            tids: vec![51],
            priority: 1,
            ..Default::default()
        });
        let options = SchedulerOptions {
            migration_threshold_us: threshold_us,
            ..opts()
        };
        let s = build(vec![wl], 2, options);
        assert_eq!(record(&s, 0).tid, 51);
        assert_eq!(record(&s, 0).tid, 51);
        // 51 goes back to the ready set, just having run on output 0
        s.output(0).unwrap().set_active(false).unwrap();
        s
    };

    let delayed = make(1_000);
    assert_eq!(record(&delayed, 1).tid, 53);
    assert_eq!(delayed.output(1).unwrap().stats().migrations, 0);

    let free = make(0);
    assert_eq!(record(&free, 1), ins(51, 2));
    assert_eq!(free.output(1).unwrap().stats().migrations, 1);
}

#[test]
fn time_quantum_requires_time_aware_pull() {
    let options = SchedulerOptions {
        quantum_unit: QuantumUnit::Time,
        quantum_duration_us: 1,
        ..opts()
    };
    let s = build(
        one_workload(vec![input(51, thread(51, 1, 10)), input(52, thread(52, 2, 1))]),
        1,
        options,
    );
    let out = s.output(0).unwrap();
    assert!(matches!(out.next_record(), Err(StreamError::NotImplemented(_))));

    for t in [0, 10, 50] {
        assert_eq!(out.next_record_at(t).unwrap().record().unwrap().tid, 51);
    }
    // 100 time units per µs: the quantum is over at 150
    assert_eq!(out.next_record_at(150).unwrap().record().unwrap().tid, 52);
}

#[test]
fn blocked_input_leaves_output_idle() {
    let a = vec![
        ts(51, 1000),
        mk(51, MarkerKind::Syscall, 7),
        mk(51, MarkerKind::MaybeBlockingSyscall, 0),
        ts(51, 2000),
        ins(51, 1),
    ];
    let s = build(
        one_workload(vec![input(51, a), input(52, thread(52, 1500, 1))]),
        1,
        opts(),
    );
    let mut seen = Vec::new();
    loop {
        match pull(&s, 0) {
            Pull::Record(r) => seen.push(r.tid),
            Pull::Idle => break,
            other => panic!("expected idle, got {other:?}"),
        }
    }
    assert_eq!(seen, vec![51, 51, 51, 52, 52]);
    let out = s.output(0).unwrap();
    assert_eq!(out.stats().idle_calls, 1);
    assert_eq!(out.stats().blocking_switches, 1);

    // the modelled block is over long before this
    let r = out.next_record_at(1_000_000).unwrap().record().unwrap();
    assert_eq!(r.tid, 51);
    assert_eq!(record(&s, 0), ins(51, 1));
    assert!(pull(&s, 0).is_eof());
}

#[test]
fn block_measured_on_shared_clock() {
    let options = SchedulerOptions {
        time_units_per_us: 1,
        block_time_multiplier: 1.0,
        ..opts()
    };
    let a = vec![
        ts(51, 1_000),
        mk(51, MarkerKind::Syscall, 7),
        mk(51, MarkerKind::MaybeBlockingSyscall, 0),
        ts(51, 11_000),
        ins(51, 1),
    ];
    let s = build(one_workload(vec![input(51, a)]), 2, options);
    let out1 = s.output(1).unwrap();
    out1.set_active(false).unwrap();

    for _ in 0..3 {
        assert_eq!(record(&s, 0).tid, 51);
    }
    // the syscall took 10_000 units: blocked until 4 + 10_000
    assert_eq!(pull(&s, 0), Pull::Idle);
    assert_eq!(s.current_time(), 4);

    // polling an inactive output does not advance time
    for _ in 0..20_000 {
        assert_eq!(pull(&s, 1), Pull::Idle);
    }
    assert_eq!(s.current_time(), 4);
    out1.set_active(true).unwrap();
    assert_eq!(pull(&s, 1), Pull::Idle);
    assert_eq!(pull(&s, 0), Pull::Idle);

    // output 1's own pulls move the shared clock until the block ends
    let mut idle = 0;
    let woken = loop {
        match pull(&s, 1) {
            Pull::Idle => idle += 1,
            Pull::Record(r) => break r,
            other => panic!("unexpected {other:?}"),
        }
        assert!(idle < 20_000, "block never ended");
    };
    assert_eq!(woken.tid, 51);
    assert!(s.current_time() >= 10_004, "woken at {}", s.current_time());
    assert_eq!(record(&s, 1), ins(51, 1));
}

#[test]
fn timestamp_gate_waits_for_lagging_output() {
    let options = SchedulerOptions {
        dependency_timestamps: true,
        timestamp_tolerance_us: Some(0),
        ..opts()
    };
    let a = vec![ts(51, 100), ins(51, 1), ts(51, 1000), ins(51, 2), ins(51, 3)];
    let s = build(
        one_workload(vec![input(51, a), input(52, thread(52, 1000, 1))]),
        2,
        options,
    );
    assert_eq!(record(&s, 0).tid, 51);
    assert_eq!(pull(&s, 1), Pull::Wait);
    assert_eq!(record(&s, 0), ins(51, 1));
    assert_eq!(pull(&s, 1), Pull::Wait);
    assert_eq!(record(&s, 0).tid, 51); // ts 1000
    assert_eq!(record(&s, 1).tid, 52);
    assert_eq!(s.output(1).unwrap().stats().wait_calls, 2);
}

#[test]
fn direct_switch_hands_output_to_target() {
    let a = vec![
        ts(51, 10),
        mk(51, MarkerKind::Syscall, 1),
        mk(51, MarkerKind::DirectThreadSwitch, 52),
        ins(51, 1),
        ins(51, 2),
    ];
    let s = build(
        one_workload(vec![
            input(51, a),
            input(53, thread(53, 10, 1)),
            input(52, thread(52, 10, 1)),
        ]),
        1,
        opts(),
    );
    let per_output = drive(&s);
    assert_eq!(tids(&per_output[0]), vec![51, 51, 51, 52, 52, 53, 53, 51, 51]);
    assert_eq!(s.output(0).unwrap().stats().direct_switches, 1);
}

#[test]
fn schedule_marker_wakes_unscheduled_thread() {
    let options = SchedulerOptions {
        quantum_duration_instrs: 1,
        ..opts()
    };
    let a = vec![
        ts(51, 10),
        mk(51, MarkerKind::Syscall, 1),
        mk(51, MarkerKind::SyscallUnschedule, 0),
        ins(51, 1),
    ];
    let b = vec![
        ts(52, 10),
        mk(52, MarkerKind::Syscall, 2),
        mk(52, MarkerKind::SyscallSchedule, 51),
        ins(52, 1),
    ];
    let s = build(
        one_workload(vec![input(51, a), input(52, b), input(53, thread(53, 10, 4))]),
        1,
        options,
    );
    let seen: Vec<MemRecord> = (0..10).map(|_| record(&s, 0)).collect();
    assert_eq!(tids(&seen), vec![51, 51, 51, 52, 52, 52, 52, 53, 53, 51]);
    assert_eq!(seen[9], ins(51, 1));
}

#[test]
fn early_exit_ends_every_output() {
    let options = SchedulerOptions {
        exit_if_fraction_inputs_left: 0.5,
        ..Default::default()
    };
    let s = build(
        one_workload((51..55).map(|t| input(t, thread(t, 10, 2))).collect()),
        1,
        options,
    );
    let per_output = drive(&s);
    let seen: BTreeSet<i64> = tids(&per_output[0]).into_iter().collect();
    assert_eq!(seen, BTreeSet::from([51, 52]));
    assert!(pull(&s, 0).is_eof());
}

#[test]
fn impossible_binding_reported() {
    let wl = WorkloadSpec::new(
        "w",
        vec![input(51, thread(51, 10, 2)), input(52, thread(52, 10, 4))],
    )
    .with_modifiers(ThreadModifiers {
        tids: vec![51],
        output_binding: BTreeSet::from([5]),
        ..Default::default()
    });
    let s = build(vec![wl], 2, opts());
    assert_eq!(record(&s, 0).tid, 52);
    let err = s.output(1).unwrap().next_record().unwrap_err();
    assert_eq!(err, StreamError::ImpossibleBinding { input: 0 });
}

#[test]
fn deactivated_output_returns_its_input() {
    let s = build(
        one_workload(vec![input(51, thread(51, 10, 3)), input(52, thread(52, 10, 3))]),
        2,
        opts(),
    );
    assert_eq!(record(&s, 0).tid, 51);
    let out0 = s.output(0).unwrap();
    out0.set_active(false).unwrap();
    assert!(!out0.is_active());
    assert_eq!(out0.input_ordinal(), None);
    assert_eq!(pull(&s, 0), Pull::Idle);

    let mut on1 = Vec::new();
    loop {
        match pull(&s, 1) {
            Pull::Record(r) => on1.push(r),
            Pull::Eof => break,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(instrs(&on1).contains(&(51, 3)));
    assert_eq!(s.output(1).unwrap().stats().migrations, 1);

    out0.set_active(true).unwrap();
    assert!(pull(&s, 0).is_eof());
}

// ── Presentation ──────────────────────────────────────────────────────────────

#[test]
fn ids_remapped_across_workloads() {
    let w0 = WorkloadSpec::new("a", vec![input(51, thread(51, 10, 1))]);
    let w1 = WorkloadSpec::new(
        "b",
        vec![input(51, vec![ts(51, 20), mk(51, MarkerKind::CpuId, 7), ins(51, 1)])],
    );
    let s = build(vec![w0, w1], 1, opts());
    let records = drive(&s).remove(0);
    let seen: BTreeSet<i64> = tids(&records).into_iter().collect();
    assert_eq!(seen, BTreeSet::from([51, (1 << 32) | 51]));
    let cpu = records
        .iter()
        .find_map(|r| match r.marker_info() {
            Some((MarkerKind::CpuId, v)) => Some(v),
            _ => None,
        })
        .unwrap();
    assert_eq!(cpu, 0);
    assert_eq!(s.workload_name(1), Some("b"));
}

#[test]
fn introspection_follows_running_input() {
    let records = vec![
        mk(52, MarkerKind::Version, 6),
        mk(52, MarkerKind::PageSize, 4096),
        ts(52, 40),
        ins(52, 1),
    ];
    let s = build(one_workload(vec![input(51, thread(51, 10, 1)), input(52, records)]), 1, opts());
    let out = s.output(0).unwrap();
    assert_eq!(record(&s, 0).tid, 51);
    assert_eq!(record(&s, 0), ins(51, 1));
    // 51 is exhausted, 52 takes over with its header
    assert_eq!(record(&s, 0), mk(52, MarkerKind::Version, 6));
    assert_eq!(out.tid(), Some(52));
    assert_eq!(out.shard_ordinal(), Some(1));
    assert_eq!(out.workload_ordinal(), Some(0));
    assert_eq!(record(&s, 0), mk(52, MarkerKind::PageSize, 4096));
    assert_eq!(out.header().version, 6);
    assert_eq!(out.header().page_size, 4096);
    assert_eq!(out.record_ordinal(), 2);
    assert_eq!(out.instruction_ordinal(), 0);
    assert!(!out.is_record_synthetic());
    assert_eq!(out.first_timestamp(), 10);
}

#[test]
fn virtual_timestamps_increase_per_output() {
    let s = build(
        one_workload(vec![
            input(51, vec![ts(51, 500), ins(51, 1), ts(51, 400), ins(51, 2)]),
            input(52, vec![ts(52, 300), ins(52, 1), ts(52, 300)]),
        ]),
        1,
        opts(),
    );
    let stamps: Vec<u64> = drive(&s)
        .remove(0)
        .iter()
        .filter_map(|r| match r.marker_info() {
            Some((MarkerKind::Timestamp, v)) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(stamps.len(), 4);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
    assert_eq!(stamps[0], 300);
}

#[test]
fn as_recorded_follows_traced_cpus() {
    let options = SchedulerOptions {
        mapping: MappingPolicy::AsRecorded,
        ..opts()
    };
    let a = vec![ts(51, 100), mk(51, MarkerKind::CpuId, 9), ins(51, 1), ins(51, 2)];
    let b = vec![ts(52, 100), mk(52, MarkerKind::CpuId, 9), ins(52, 1)];
    let s = Scheduler::new(
        one_workload(vec![input(51, a), input(52, b)]),
        2,
        options,
        Attachments::default().as_traced(two_cpu_map()),
    )
    .unwrap();
    let per_output = drive(&s);
    for (o, tid, cpu) in [(0, 51, 3), (1, 52, 5)] {
        assert!(tids(&per_output[o]).iter().all(|&t| t == tid));
        assert!(per_output[o].contains(&mk(tid, MarkerKind::CpuId, cpu)));
        assert_eq!(s.output(o).unwrap().cpuid(), cpu);
    }
    assert!(matches!(
        s.output(0).unwrap().set_active(false),
        Err(StreamError::NotImplemented(_))
    ));
}

#[test]
fn times_of_interest_become_regions() {
    let map = AsTracedMap {
        cpus: BTreeMap::from([(
            0,
            vec![
                CpuEntry {
                    tid: 51,
                    timestamp: 100,
                    start_instruction: 0,
                },
                CpuEntry {
                    tid: 51,
                    timestamp: 200,
                    start_instruction: 10,
                },
            ],
        )]),
    };
    let mut wl = WorkloadSpec::new("w", vec![input(51, thread(51, 100, 10))]);
    wl.times_of_interest = vec![TimeRange { start: 150, stop: 0 }];
    let s = Scheduler::new(vec![wl], 1, opts(), Attachments::default().as_traced(map)).unwrap();
    let seen = instrs(&drive(&s).remove(0));
    assert_eq!(seen, (6..=10).map(|pc| (51, pc)).collect::<Vec<_>>());
}

// ── Speculation / unread ──────────────────────────────────────────────────────

#[test]
fn speculation_resumes_with_queued_record() {
    let s = build(
        one_workload(vec![input(51, vec![ts(51, 10), ins(51, 100), ins(51, 101)])]),
        1,
        opts(),
    );
    let out = s.output(0).unwrap();
    record(&s, 0);
    assert_eq!(record(&s, 0), ins(51, 100));

    out.start_speculation(0x1000, true).unwrap();
    assert_eq!(record(&s, 0), ins(51, 0x1000));
    assert!(out.is_record_synthetic());
    assert!(matches!(out.unread_last_record(), Err(StreamError::Invalid(_))));
    assert_eq!(record(&s, 0), ins(51, 0x1001));
    out.stop_speculation().unwrap();

    assert_eq!(record(&s, 0), ins(51, 100));
    assert!(!out.is_record_synthetic());
    assert_eq!(record(&s, 0), ins(51, 101));
    assert!(matches!(out.stop_speculation(), Err(StreamError::Invalid(_))));
}

#[test]
fn nested_speculation_restores_outer_frame() {
    let s = build(
        one_workload(vec![input(51, vec![ts(51, 10), ins(51, 100), ins(51, 101)])]),
        1,
        opts(),
    );
    let out = s.output(0).unwrap();
    record(&s, 0);
    record(&s, 0);
    out.start_speculation(0x10, false).unwrap();
    assert_eq!(record(&s, 0), ins(51, 0x10));
    out.start_speculation(0x20, true).unwrap();
    assert_eq!(record(&s, 0), ins(51, 0x20));
    out.stop_speculation().unwrap();
    // the record queued by the inner frame, then the outer frame resumes
    assert_eq!(record(&s, 0), ins(51, 0x10));
    assert_eq!(record(&s, 0), ins(51, 0x11));
    out.stop_speculation().unwrap();
    assert_eq!(record(&s, 0), ins(51, 101));
}

#[test]
fn unread_presents_last_record_again() {
    let s = build(
        one_workload(vec![input(51, vec![ts(51, 10), ins(51, 100), ins(51, 101)])]),
        1,
        opts(),
    );
    let out = s.output(0).unwrap();
    assert!(matches!(out.unread_last_record(), Err(StreamError::Invalid(_))));
    record(&s, 0);
    assert_eq!(record(&s, 0), ins(51, 100));
    out.unread_last_record().unwrap();
    assert!(matches!(out.unread_last_record(), Err(StreamError::Invalid(_))));
    assert!(matches!(
        out.start_speculation(0x40, true),
        Err(StreamError::Invalid(_))
    ));
    assert_eq!(record(&s, 0), ins(51, 100));
    assert_eq!(record(&s, 0), ins(51, 101));
}

// ── Injection ─────────────────────────────────────────────────────────────────

#[test]
fn kernel_templates_spliced_on_syscall_and_switch() {
    let templates = KernelTemplates::new()
        .with_switch(
            SwitchKind::Thread,
            vec![
                mk(-1, MarkerKind::ContextSwitchStart, SwitchKind::Thread.code()),
                ins(-1, 0xdead),
                mk(-1, MarkerKind::ContextSwitchEnd, SwitchKind::Thread.code()),
            ],
        )
        .with_syscall(
            7,
            vec![
                mk(-1, MarkerKind::SyscallTraceStart, 7),
                ins(-1, 0xbeef),
                mk(-1, MarkerKind::SyscallTraceEnd, 7),
            ],
        );
    let a = vec![ts(51, 10), mk(51, MarkerKind::Syscall, 7), ins(51, 1)];
    let s = Scheduler::new(
        one_workload(vec![input(51, a), input(52, thread(52, 20, 1))]),
        1,
        opts(),
        Attachments::default().kernel_templates(templates),
    )
    .unwrap();
    let out = s.output(0).unwrap();

    let mut seen = Vec::new();
    let mut synthetic = Vec::new();
    loop {
        match out.next_record().unwrap() {
            Pull::Record(r) => {
                seen.push(r);
                synthetic.push(out.is_record_synthetic());
            }
            Pull::Eof => break,
            other => panic!("unexpected {other:?}"),
        }
    }
    let pcs: Vec<(i64, u64)> = instrs(&seen);
    assert_eq!(pcs, vec![(51, 0xbeef), (51, 1), (52, 0xdead), (52, 1)]);
    assert_eq!(seen[2], mk(51, MarkerKind::SyscallTraceStart, 7));
    assert!(synthetic[2] && synthetic[3] && synthetic[4]);
    assert!(!synthetic[5]);
    assert_eq!(seen[6], mk(52, MarkerKind::ContextSwitchStart, 0));
    assert_eq!(out.stats().injected_records, 6);
}

// ── Recording / replay ────────────────────────────────────────────────────────

fn replay_workloads() -> Vec<WorkloadSpec<MemRecord>> {
    one_workload(vec![
        input(51, thread(51, 10, 4)),
        input(52, thread(52, 10, 4)),
        input(53, thread(53, 10, 2)),
    ])
}

fn record_opts() -> SchedulerOptions {
    SchedulerOptions {
        quantum_duration_instrs: 2,
        migration_threshold_us: 0,
        virtualize_markers: false,
        ..opts()
    }
}

fn replay_opts() -> SchedulerOptions {
    SchedulerOptions {
        mapping: MappingPolicy::Replay,
        ..record_opts()
    }
}

#[test]
fn replay_reproduces_recorded_run() {
    let log = MemorySchedule::new();
    let recorded = Scheduler::new(
        replay_workloads(),
        2,
        record_opts(),
        Attachments::default().recording(log.clone()),
    )
    .unwrap();
    let original = drive(&recorded);
    recorded.flush_schedule().unwrap();
    assert_eq!(log.flush_count(), 1);
    assert!(original[1].iter().any(|r| r.tid == 51), "expected a migration");

    let replayed = Scheduler::new(
        replay_workloads(),
        2,
        replay_opts(),
        Attachments::default().replaying(log.clone()),
    )
    .unwrap();
    assert_eq!(drive(&replayed), original);
    assert!(matches!(
        replayed.output(0).unwrap().set_active(false),
        Err(StreamError::NotImplemented(_))
    ));
}

#[test]
fn replay_reproduces_region_skips() {
    let make = || {
        vec![WorkloadSpec::new(
            "w",
            vec![input(51, thread(51, 10, 6)), input(52, thread(52, 10, 2))],
        )
        .with_modifiers(ThreadModifiers {
            tids: vec![51],
            regions_of_interest: vec![Region::new(2, 3), Region::new(5, 0)],
            ..Default::default()
        })]
    };
    let log = MemorySchedule::new();
    let recorded =
        Scheduler::new(make(), 1, record_opts(), Attachments::default().recording(log.clone()))
            .unwrap();
    let original = drive(&recorded);
    assert_eq!(
        instrs(&original[0]),
        vec![(51, 2), (51, 3), (52, 1), (52, 2), (51, 5), (51, 6)]
    );
    assert!(original[0].contains(&mk(51, MarkerKind::WindowId, 1)));

    let kinds: Vec<EntryKind> = log.entries().iter().map(ScheduleEntry::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::Run,
            EntryKind::Skip,
            EntryKind::Run,
            EntryKind::Run,
            EntryKind::Run,
            EntryKind::Skip,
            EntryKind::Run,
        ]
    );

    let replayed =
        Scheduler::new(make(), 1, replay_opts(), Attachments::default().replaying(log)).unwrap();
    assert_eq!(drive(&replayed), original);
}

#[test]
fn replay_count_mismatch_rejected() {
    let log = MemorySchedule::new();
    let recorded = Scheduler::new(
        replay_workloads(),
        2,
        record_opts(),
        Attachments::default().recording(log.clone()),
    )
    .unwrap();
    drive(&recorded);

    let err = Scheduler::new(
        replay_workloads(),
        1,
        replay_opts(),
        Attachments::default().replaying(log),
    )
    .err()
    .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));

    let err = Scheduler::new(replay_workloads(), 2, replay_opts(), Attachments::default())
        .err()
        .unwrap();
    assert!(matches!(err, InitError::InvalidParameter(_)));
}

#[test]
fn replay_with_missing_entry_rejected() {
    let log = MemorySchedule::new();
    let recorded = Scheduler::new(
        replay_workloads(),
        2,
        record_opts(),
        Attachments::default().recording(log.clone()),
    )
    .unwrap();
    drive(&recorded);

    let mut entries = log.entries();
    let first = entries
        .iter()
        .position(|e| e.kind() == EntryKind::Run && e.input == 0 && e.input_seq == 0)
        .unwrap();
    entries.remove(first);
    let mut damaged = MemorySchedule::new();
    damaged
        .begin(&ScheduleHeader {
            version: SCHEDULE_FORMAT_VERSION,
            output_count: 2,
            input_count: 3,
        })
        .unwrap();
    for e in &entries {
        damaged.append(e).unwrap();
    }

    let err = Scheduler::new(
        replay_workloads(),
        2,
        replay_opts(),
        Attachments::default().replaying(damaged),
    )
    .err()
    .unwrap();
    assert!(matches!(err, InitError::FileReadFailed(_)), "{err}");
}

struct FailingSink;

impl ScheduleSink for FailingSink {
    fn begin(&mut self, _header: &ScheduleHeader) -> Result<(), ScheduleError> {
        Ok(())
    }

    fn append(&mut self, _entry: &ScheduleEntry) -> Result<(), ScheduleError> {
        Err(ScheduleError::Malformed("disk full".into()))
    }

    fn flush(&mut self) -> Result<(), ScheduleError> {
        Ok(())
    }
}

#[test]
fn record_failure_reported_once() {
    let s = Scheduler::new(
        one_workload(vec![input(51, thread(51, 10, 1)), input(52, thread(52, 10, 1))]),
        1,
        opts(),
        Attachments::default().recording(FailingSink),
    )
    .unwrap();
    let out = s.output(0).unwrap();
    let (mut records, mut failures) = (0, 0);
    loop {
        match out.next_record() {
            Ok(Pull::Record(_)) => records += 1,
            Ok(Pull::Eof) => break,
            Ok(other) => panic!("unexpected {other:?}"),
            Err(StreamError::RecordFailed(_)) => failures += 1,
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!((records, failures), (4, 1));
}

// ── Properties ────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn inputs_are_exclusive_and_complete(
        lens in prop::collection::vec(1u64..12, 1..6),
        outputs in 1usize..4,
        quantum in 1u64..4,
        seed in any::<u64>(),
    ) {
        let inputs = lens
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let tid = 100 + i as i64;
                input(tid, thread(tid, 10 + i as u64, n))
            })
            .collect();
        let options = SchedulerOptions {
            quantum_duration_instrs: quantum,
            migration_threshold_us: 0,
            randomize_next_input: true,
            rng_seed: seed,
            ..opts()
        };
        let s = build(one_workload(inputs), outputs, options);

        let mut delivered: HashMap<i64, Vec<u64>> = HashMap::new();
        let mut last_ts = vec![0u64; outputs];
        let mut done = vec![false; outputs];
        let mut rounds = 0;
        while !done.iter().all(|&d| d) {
            rounds += 1;
            prop_assert!(rounds < 10_000, "scheduler did not finish");
            for o in 0..outputs {
                if done[o] {
                    continue;
                }
                match pull(&s, o) {
                    Pull::Record(r) => {
                        let held: Vec<usize> = s.assignments().into_iter().flatten().collect();
                        let unique: BTreeSet<usize> = held.iter().copied().collect();
                        prop_assert_eq!(held.len(), unique.len());

                        let running = s.output(o).unwrap().input_ordinal().unwrap();
                        prop_assert_eq!(s.input_identity(running).unwrap().tid, r.tid);
                        match r.kind {
                            RecordKind::Instruction { pc } => {
                                delivered.entry(r.tid).or_default().push(pc)
                            }
                            RecordKind::Marker { kind: MarkerKind::Timestamp, value } => {
                                prop_assert!(value > last_ts[o]);
                                last_ts[o] = value;
                            }
                            _ => {}
                        }
                    }
                    Pull::Eof => done[o] = true,
                    Pull::Wait | Pull::Idle => {}
                }
            }
        }
        for (i, &n) in lens.iter().enumerate() {
            let expected: Vec<u64> = (1..=n).collect();
            prop_assert_eq!(&delivered[&(100 + i as i64)], &expected);
        }
    }

    #[test]
    fn bound_inputs_stay_on_their_outputs(
        bindings in prop::collection::vec(prop::collection::btree_set(0usize..3, 1..3), 1..6),
        quantum in 1u64..4,
    ) {
        let mut wl = WorkloadSpec::new(
            "w",
            (0..bindings.len())
                .map(|i| {
                    let tid = 200 + i as i64;
                    input(tid, thread(tid, 10, 5))
                })
                .collect(),
        );
        for (i, b) in bindings.iter().enumerate() {
            wl = wl.with_modifiers(ThreadModifiers {
                tids: vec![200 + i as i64],
                output_binding: b.clone(),
                ..Default::default()
            });
        }
        let options = SchedulerOptions {
            quantum_duration_instrs: quantum,
            migration_threshold_us: 0,
            ..opts()
        };
        let s = build(vec![wl], 3, options);
        for (o, records) in drive(&s).iter().enumerate() {
            for r in records {
                let i = (r.tid - 200) as usize;
                prop_assert!(bindings[i].contains(&o), "tid {} ran on output {}", r.tid, o);
            }
        }
    }
}
