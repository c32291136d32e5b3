//! Integration test: submission-queue polling and idle wakeups.

use std::time::{Duration, Instant};

use hopring_core::{CqIndex, SubmissionEntry, UserData};
use hopring_engine::{RingConfig, RingSet, SqPollConfig};
use hopring_programs::EchoCounter;
use hopring_ring::SqFlags;
use hopring_test_utils::{collect, wait_for_metrics, TestRingBuilder, WAIT};

fn polled() -> RingConfig {
    RingConfig {
        sq_poll: Some(SqPollConfig { idle_ms: 5 }),
        worker_count: Some(2),
        ..RingConfig::with_queues(8, &[16])
    }
}

fn wait_until_idle(rings: &RingSet) {
    let deadline = Instant::now() + WAIT;
    loop {
        let flags = SqFlags::from_bits_retain(rings.header().unwrap().sq.flags);
        if flags.contains(SqFlags::NEED_WAKEUP) {
            return;
        }
        assert!(Instant::now() < deadline, "poller never went idle");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn idle_poller_is_woken_by_submit() {
    let mut rings = TestRingBuilder::new(polled())
        .program(EchoCounter)
        .build()
        .unwrap();
    wait_until_idle(&rings);

    rings.submit_entry(SubmissionEntry::nop(UserData(1))).unwrap();
    let cqe = collect(&mut rings, CqIndex::PRIMARY, 1).unwrap()[0];
    assert_eq!(cqe.user_data, UserData(1));

    let (m, ok) = wait_for_metrics(&rings, |m| m.sq_wakeups >= 1);
    assert!(ok, "{m:?}");
    assert!(m.doorbells >= 1);
}

#[test]
fn busy_poller_needs_no_doorbell() {
    let mut rings = TestRingBuilder::new(RingConfig {
        sq_poll: Some(SqPollConfig { idle_ms: 60_000 }),
        ..polled()
    })
    .program(EchoCounter)
    .build()
    .unwrap();

    for i in 0..4 {
        rings.submit_entry(SubmissionEntry::nop(UserData(i))).unwrap();
    }
    collect(&mut rings, CqIndex::PRIMARY, 4).unwrap();
    assert_eq!(rings.metrics().doorbells, 0);
}

#[test]
fn never_activated_polled_ring_destroys_promptly() {
    let mut rings = RingSet::with_config(polled());
    rings.create_rings().unwrap();
    rings
        .register_program(std::sync::Arc::new(EchoCounter))
        .unwrap();

    let start = Instant::now();
    let report = rings.destroy().unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(report.dispatcher_joined);
    assert_eq!(report.workers_joined, 0);
}

#[test]
fn idle_polled_ring_destroys_promptly() {
    let mut rings = TestRingBuilder::new(polled())
        .program(EchoCounter)
        .build()
        .unwrap();
    wait_until_idle(&rings);

    let start = Instant::now();
    let report = rings.destroy().unwrap();
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(report.dispatcher_joined);
    assert_eq!(report.workers_joined, 2);
}
