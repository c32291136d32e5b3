//! Submission queue.
//!
//! The application allocates entries with
//! [`allocate_entry`](SubmissionQueue::allocate_entry), fills them in
//! place, and publishes them with [`submit`](SubmissionQueue::submit).
//! Allocation does not publish: an entry becomes visible to the engine
//! only when a `submit` call covers it, and entries become visible in
//! allocation order.

use bitflags::bitflags;
use hopring_core::{QueueCounters, RingError, SetupError, SubmissionEntry};

use crate::ring::{ring, Consumer, Producer};

bitflags! {
    /// Flags word of the submission queue.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SqFlags: u32 {
        /// The polling consumer went idle and must be woken explicitly.
        const NEED_WAKEUP = 1 << 0;
    }
}

/// Create a submission queue of `entries` slots.
pub fn submission_queue(entries: u32) -> Result<(SubmissionQueue, SubmissionSource), SetupError> {
    let (producer, consumer) = ring(entries)?;
    Ok((SubmissionQueue { producer }, SubmissionSource { consumer }))
}

/// Application side of the submission queue.
#[derive(Debug)]
pub struct SubmissionQueue {
    producer: Producer<SubmissionEntry>,
}

impl SubmissionQueue {
    /// Hand out the next free entry, reset to its default, without
    /// publishing it.
    ///
    /// Returns [`RingError::RingFull`] and counts a drop when every slot
    /// is either published-but-unconsumed or already allocated.
    pub fn allocate_entry(&mut self) -> Result<&mut SubmissionEntry, RingError> {
        if self.producer.space_left() == 0 {
            self.producer.record_drop();
            return Err(RingError::RingFull);
        }
        self.producer
            .stage(SubmissionEntry::default())
            .map_err(|_| RingError::RingFull)
    }

    /// Publish up to `count` allocated entries. Returns how many became
    /// visible.
    pub fn submit(&mut self, count: u32) -> u32 {
        self.producer.publish(count)
    }

    /// Allocated entries not yet published.
    pub fn pending(&self) -> u32 {
        self.producer.staged()
    }

    /// Entries that can still be allocated.
    pub fn space_left(&self) -> u32 {
        self.producer.space_left()
    }

    /// Published entries the engine has not consumed yet.
    pub fn in_flight(&self) -> u32 {
        self.producer.len()
    }

    /// Total slots.
    pub fn capacity(&self) -> u32 {
        self.producer.capacity()
    }

    /// Allocations refused because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.producer.dropped()
    }

    /// Current flags.
    pub fn flags(&self) -> SqFlags {
        SqFlags::from_bits_retain(self.producer.flags())
    }

    /// Header words of the queue.
    pub fn counters(&self) -> QueueCounters {
        self.producer.counters()
    }
}

/// Engine side of the submission queue.
#[derive(Debug)]
pub struct SubmissionSource {
    consumer: Consumer<SubmissionEntry>,
}

impl SubmissionSource {
    /// Take the oldest published entry.
    pub fn next_entry(&mut self) -> Option<SubmissionEntry> {
        self.consumer.pop()
    }

    /// Published entries waiting.
    pub fn len(&self) -> u32 {
        self.consumer.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Current flags.
    pub fn flags(&self) -> SqFlags {
        SqFlags::from_bits_retain(self.consumer.flags())
    }

    /// Set `flags`.
    pub fn insert_flags(&self, flags: SqFlags) {
        self.consumer.insert_flags(flags.bits());
    }

    /// Clear `flags`.
    pub fn remove_flags(&self, flags: SqFlags) {
        self.consumer.remove_flags(flags.bits());
    }
}
