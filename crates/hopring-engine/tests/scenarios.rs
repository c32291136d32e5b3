//! Integration test: echo, ping-pong and overflow runs end to end.
//!
//! Each test builds a ring set with an SQ of 8 and two CQs of 128, runs
//! one scenario through the full lifecycle and checks the visible
//! completions and the counting table.

use hopring_core::{CqIndex, CqeFlags, LifecycleState, ProgramSlot, SubmissionEntry, UserData};
use hopring_engine::RingSet;
use hopring_programs::{echo, ping_pong, reference_library};
use hopring_test_utils::{assert_quiet, collect, scenario_config, wait_for_metrics};
use std::time::Duration;

fn ready(names: &[&str]) -> RingSet {
    let mut rings = RingSet::with_config(scenario_config());
    rings.create_rings().unwrap();
    let lib = reference_library(2).unwrap();
    rings.register_programs(&lib, names).unwrap();
    rings.activate().unwrap();
    rings
}

#[test]
fn echo_program_round_trip() {
    let mut rings = ready(&[echo::NAME]);
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(0xA)))
        .unwrap();

    let cqes = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap();
    assert_eq!(cqes[0].user_data, UserData(0xA));
    assert!(cqes[0].result >= 0, "result {}", cqes[0].result);
    assert_eq!(rings.counters().unwrap()[0], 1);
    assert_quiet(&mut rings, CqIndex(1), Duration::from_millis(20));

    rings.destroy().unwrap();
    assert_eq!(rings.state(), LifecycleState::Destroyed);
}

#[test]
fn ping_pong_two_hop_chain() {
    let mut rings = ready(&[ping_pong::NAME, ping_pong::NAME]);
    let s0 = SubmissionEntry::program(ProgramSlot(0), UserData(100))
        .with_target(CqIndex(0))
        .armed();
    let s1 = SubmissionEntry::program(ProgramSlot(1), UserData(101))
        .with_target(CqIndex(1))
        .armed();
    for sqe in [s0, s1] {
        *rings.allocate_entry().unwrap() = sqe;
    }
    *rings.allocate_entry().unwrap() = SubmissionEntry::nop(UserData(0)).with_target(CqIndex(1));
    assert_eq!(rings.submit(3).unwrap(), 3);

    // The nop wakes slot 1 on CQ1, whose follow-up wakes slot 0 on CQ0.
    // Each hop carries the token of the submission that triggered it, not
    // the armed program's own user data.
    let on_cq1 = collect(&mut rings, CqIndex(1), 1).unwrap();
    let on_cq0 = collect(&mut rings, CqIndex(0), 1).unwrap();
    assert_eq!(on_cq1[0].user_data, UserData(0));
    assert_eq!(on_cq1[0].result, 0);
    assert!(on_cq1[0].flags.contains(CqeFlags::HOP));
    assert_eq!(on_cq0[0].user_data, UserData(1));
    assert_eq!(on_cq0[0].result, 1);
    assert!(on_cq0[0].flags.contains(CqeFlags::HOP));

    let counters = rings.counters().unwrap();
    assert_eq!((counters[0], counters[1]), (1, 1));

    // Exactly two visible completions: the chain stopped at max_hops.
    assert_quiet(&mut rings, CqIndex(0), Duration::from_millis(50));
    assert_quiet(&mut rings, CqIndex(1), Duration::from_millis(10));
    let m = rings.metrics();
    assert_eq!(m.hops, 2);
    assert_eq!(m.follow_ups, 1);
    assert_eq!(m.parked_programs, 0);
}

#[test]
fn full_queue_keeps_first_128_in_order() {
    let mut rings = ready(&[echo::NAME]);
    let mut sent = 0u64;
    while sent < 130 {
        if rings.sq_space().unwrap() == 0 {
            std::thread::yield_now();
            continue;
        }
        rings
            .submit_entry(SubmissionEntry::nop(UserData(sent)))
            .unwrap();
        sent += 1;
    }
    let (m, ok) = wait_for_metrics(&rings, |m| m.completions_posted + m.cq_overflows == 130);
    assert!(ok, "engine stalled: {m:?}");

    let cq0 = rings.queue(CqIndex::PRIMARY).unwrap();
    assert_eq!(cq0.len(), 128);
    assert_eq!(cq0.overflow(), 2);
    assert_eq!(m.cq_overflows, 2);
    assert_eq!(m.completions_posted, 128);
    assert_eq!(m.sq_dropped, 0);

    let drained = rings.drain(CqIndex::PRIMARY).unwrap();
    let uds: Vec<u64> = drained.iter().map(|c| c.user_data.0).collect();
    assert_eq!(uds, (0..128).collect::<Vec<_>>());
    assert!(rings.drain(CqIndex::PRIMARY).unwrap().is_empty());
}
