//! Engine counters and the [`RingMetrics`] snapshot.
//!
//! The dispatcher writes most of [`EngineCounters`]; `doorbells` is bumped
//! on the submitting side. The application reads them through
//! [`RingSet::metrics`](crate::RingSet::metrics).

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative event counts for one ring set.
///
/// Queue-level counters (`sq_dropped`, `cq_overflows`) are read from the
/// rings themselves; everything else is counted by the dispatcher.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RingMetrics {
    /// Submissions taken from the SQ.
    pub submissions: u64,
    /// No-op submissions completed.
    pub nops: u64,
    /// Program invocations that returned an outcome.
    pub invocations: u64,
    /// Invocations of armed programs woken by a trigger completion.
    pub hops: u64,
    /// Follow-up submissions produced by programs.
    pub follow_ups: u64,
    /// Extra completions emitted by programs.
    pub emitted: u64,
    /// Completions appended to a completion queue.
    pub completions_posted: u64,
    /// Completions discarded because their queue was full, summed over
    /// all queues.
    pub cq_overflows: u64,
    /// Entry allocations refused because the SQ was full.
    pub sq_dropped: u64,
    /// Submissions naming an unregistered program slot.
    pub invalid_slots: u64,
    /// Submissions or routes naming a nonexistent completion queue.
    pub invalid_queues: u64,
    /// Program invocations that panicked.
    pub program_panics: u64,
    /// Armed programs currently parked on a queue.
    pub parked_programs: u64,
    /// Doorbells rung by `submit`.
    pub doorbells: u64,
    /// Times a polling dispatcher went idle and had to be woken.
    pub sq_wakeups: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub submissions: AtomicU64,
    pub nops: AtomicU64,
    pub invocations: AtomicU64,
    pub hops: AtomicU64,
    pub follow_ups: AtomicU64,
    pub emitted: AtomicU64,
    pub completions_posted: AtomicU64,
    pub invalid_slots: AtomicU64,
    pub invalid_queues: AtomicU64,
    pub program_panics: AtomicU64,
    pub parked_programs: AtomicU64,
    pub doorbells: AtomicU64,
    pub sq_wakeups: AtomicU64,
}

impl EngineCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the dispatcher-side counters. Queue-level fields are
    /// left zero for the caller to fill in.
    pub fn snapshot(&self) -> RingMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RingMetrics {
            submissions: load(&self.submissions),
            nops: load(&self.nops),
            invocations: load(&self.invocations),
            hops: load(&self.hops),
            follow_ups: load(&self.follow_ups),
            emitted: load(&self.emitted),
            completions_posted: load(&self.completions_posted),
            cq_overflows: 0,
            sq_dropped: 0,
            invalid_slots: load(&self.invalid_slots),
            invalid_queues: load(&self.invalid_queues),
            program_panics: load(&self.program_panics),
            parked_programs: load(&self.parked_programs),
            doorbells: load(&self.doorbells),
            sq_wakeups: load(&self.sq_wakeups),
        }
    }
}
