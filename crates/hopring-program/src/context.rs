//! Execution context passed to completion programs.

use hopring_core::{
    CompletionEntry, CountingTable, CqIndex, CqeFlags, ProgramSlot, RingError, SubmissionEntry,
};
use smallvec::SmallVec;

/// Completions emitted by one invocation, with their target queues.
pub type Emitted = SmallVec<[(CqIndex, CompletionEntry); 2]>;

/// Everything a program may read or touch during one invocation.
///
/// Constructed by the engine, or directly in tests.
pub struct InvocationContext<'a> {
    submission: &'a SubmissionEntry,
    trigger: Option<&'a CompletionEntry>,
    counters: &'a CountingTable,
    slot: ProgramSlot,
    queue_count: usize,
    emitted: Emitted,
}

impl<'a> InvocationContext<'a> {
    /// Construct a context for one invocation.
    pub fn new(
        submission: &'a SubmissionEntry,
        trigger: Option<&'a CompletionEntry>,
        counters: &'a CountingTable,
        slot: ProgramSlot,
        queue_count: usize,
    ) -> Self {
        Self {
            submission,
            trigger,
            counters,
            slot,
            queue_count,
            emitted: Emitted::new(),
        }
    }

    /// The submission that invoked the program.
    pub fn submission(&self) -> &SubmissionEntry {
        self.submission
    }

    /// The completion that woke an armed program. `None` for direct
    /// invocations.
    pub fn trigger(&self) -> Option<&CompletionEntry> {
        self.trigger
    }

    /// Shared counting table.
    pub fn counters(&self) -> &CountingTable {
        self.counters
    }

    /// Registry slot the program runs from.
    pub fn slot(&self) -> ProgramSlot {
        self.slot
    }

    /// Number of completion queues in the ring set.
    pub fn queue_count(&self) -> usize {
        self.queue_count
    }

    /// Post an extra completion to `cq` alongside the program's own.
    ///
    /// The entry is tagged [`CqeFlags::EMITTED`] and routed like any other
    /// completion, so it can wake a program parked on `cq`.
    pub fn emit(&mut self, cq: CqIndex, entry: CompletionEntry) -> Result<(), RingError> {
        if cq.as_usize() >= self.queue_count {
            return Err(RingError::InvalidQueue {
                index: cq,
                count: self.queue_count,
            });
        }
        self.emitted
            .push((cq, entry.with_flags(CqeFlags::EMITTED)));
        Ok(())
    }

    /// Completions emitted so far.
    pub fn emitted(&self) -> &[(CqIndex, CompletionEntry)] {
        &self.emitted
    }

    /// Consume the context, returning the emitted completions.
    pub fn into_emitted(self) -> Emitted {
        self.emitted
    }
}
