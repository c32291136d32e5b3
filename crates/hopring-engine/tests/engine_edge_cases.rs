//! Integration test: rejected submissions, panics and routing overrides.
//!
//! Every failure mode must answer the submission with exactly one
//! negative completion and leave the engine serving later submissions.

use std::time::Duration;

use hopring_core::{errno, CqIndex, CqeFlags, ProgramSlot, SubmissionEntry, UserData};
use hopring_programs::Redirect;
use hopring_test_utils::fixtures::{CountingProbe, EmittingProbe, PanickingProbe};
use hopring_test_utils::{assert_quiet, collect, TestRingBuilder};

#[test]
fn unregistered_slot_completes_with_einval() {
    let mut rings = TestRingBuilder::default()
        .program(CountingProbe::new(0))
        .build()
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(7), UserData(3)).with_target(CqIndex(1)))
        .unwrap();

    let cqe = collect(&mut rings, CqIndex(1), 1).unwrap()[0];
    assert_eq!(cqe.user_data, UserData(3));
    assert_eq!(cqe.result, -errno::EINVAL);
    assert_eq!(rings.metrics().invalid_slots, 1);
    assert_eq!(rings.counters().unwrap()[0], 0);
}

#[test]
fn nonexistent_queue_is_answered_on_primary() {
    let mut rings = TestRingBuilder::default()
        .program(CountingProbe::new(0))
        .build()
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::nop(UserData(9)).with_target(CqIndex(5)))
        .unwrap();

    let cqe = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap()[0];
    assert_eq!(cqe.user_data, UserData(9));
    assert_eq!(cqe.result, -errno::EINVAL);
    assert_eq!(rings.metrics().invalid_queues, 1);
}

#[test]
fn panicking_program_completes_with_eio_and_engine_survives() {
    let mut rings = TestRingBuilder::default()
        .program(PanickingProbe)
        .build()
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(1)))
        .unwrap();
    let cqe = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap()[0];
    assert_eq!(cqe.result, -errno::EIO);
    assert_eq!(rings.metrics().program_panics, 1);

    rings.submit_entry(SubmissionEntry::nop(UserData(2))).unwrap();
    let cqe = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap()[0];
    assert_eq!((cqe.user_data, cqe.result), (UserData(2), 0));
}

#[test]
fn route_override_is_flagged_rerouted() {
    let mut rings = TestRingBuilder::default()
        .program(Redirect::new(CqIndex(1)))
        .build()
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(4)))
        .unwrap();

    let cqe = collect(&mut rings, CqIndex(1), 1).unwrap()[0];
    assert_eq!(cqe.user_data, UserData(4));
    assert!(cqe.flags.contains(CqeFlags::REROUTED));
    assert_quiet(&mut rings, CqIndex::PRIMARY, Duration::from_millis(20));
}

#[test]
fn route_to_missing_queue_falls_back_to_target() {
    let mut rings = TestRingBuilder::default()
        .program(Redirect::new(CqIndex(9)))
        .build()
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(4)))
        .unwrap();

    let cqe = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap()[0];
    assert_eq!(cqe.user_data, UserData(4));
    assert!(!cqe.flags.contains(CqeFlags::REROUTED));
    assert_eq!(rings.metrics().invalid_queues, 1);
}

#[test]
fn emitted_completion_wakes_program_parked_on_its_queue() {
    let mut rings = TestRingBuilder::default()
        .program(EmittingProbe { to: CqIndex(1) })
        .program(CountingProbe::new(3))
        .build()
        .unwrap();
    rings
        .submit_entry(
            SubmissionEntry::program(ProgramSlot(1), UserData(50))
                .with_target(CqIndex(1))
                .armed(),
        )
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(9)))
        .unwrap();

    let own = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap()[0];
    assert_eq!((own.user_data, own.result), (UserData(9), 0));

    // The emitted entry was consumed as a trigger, not appended; the woken
    // program answers with the trigger's token.
    let woken = collect(&mut rings, CqIndex(1), 1).unwrap()[0];
    assert_eq!((woken.user_data, woken.result), (UserData(9), 1));
    assert!(woken.flags.contains(CqeFlags::HOP));
    assert!(!woken.flags.contains(CqeFlags::EMITTED));
    assert_eq!(rings.counters().unwrap()[3], 1);

    let m = rings.metrics();
    assert_eq!((m.emitted, m.hops), (1, 1));
}

#[test]
fn emitted_completion_without_waiter_is_posted() {
    let mut rings = TestRingBuilder::default()
        .program(EmittingProbe { to: CqIndex(1) })
        .build()
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(8)))
        .unwrap();

    let emitted = collect(&mut rings, CqIndex(1), 1).unwrap()[0];
    assert_eq!((emitted.user_data, emitted.result), (UserData(8), 1));
    assert!(emitted.flags.contains(CqeFlags::EMITTED));
    collect(&mut rings, CqIndex::PRIMARY, 1).unwrap();
}

#[test]
fn allocation_past_capacity_counts_drops() {
    let mut rings = TestRingBuilder::default()
        .program(CountingProbe::new(0))
        .build()
        .unwrap();
    for _ in 0..8 {
        rings.allocate_entry().unwrap();
    }
    assert!(rings.allocate_entry().unwrap_err().is_transient());
    assert!(rings.allocate_entry().is_err());
    assert_eq!(rings.metrics().sq_dropped, 2);
    assert_eq!(rings.header().unwrap().sq.dropped, 2);
}

#[test]
fn woken_program_failure_carries_trigger_token() {
    let mut rings = TestRingBuilder::default()
        .program(PanickingProbe)
        .build()
        .unwrap();
    rings
        .submit_entry(
            SubmissionEntry::program(ProgramSlot(0), UserData(70))
                .with_target(CqIndex(1))
                .armed(),
        )
        .unwrap();
    rings
        .submit_entry(SubmissionEntry::nop(UserData(5)).with_target(CqIndex(1)))
        .unwrap();

    let cqe = collect(&mut rings, CqIndex(1), 1).unwrap()[0];
    assert_eq!((cqe.user_data, cqe.result), (UserData(5), -errno::EIO));
    assert!(cqe.flags.contains(CqeFlags::HOP));
    assert_quiet(&mut rings, CqIndex(1), Duration::from_millis(20));
    assert_eq!(rings.metrics().program_panics, 1);
}
