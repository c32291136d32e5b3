//! Single-producer single-consumer ring buffer.
//!
//! The producer owns `tail`, the consumer owns `head`. Both are free-running
//! `u32` counters; the physical slot of index `i` is `i & mask`, and the
//! fill level is `tail.wrapping_sub(head)`, which never exceeds capacity.
//!
//! Ordering protocol:
//!
//! - producer: read `head` (Acquire), write slot, store `tail` (Release)
//! - consumer: read `tail` (Acquire), read slot, store `head` (Release)
//!
//! The producer may *stage* values past the published tail and publish a
//! batch of them with one release store. Staged slots are invisible to the
//! consumer until published.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hopring_core::{QueueCounters, SetupError};

/// Largest capacity a ring accepts.
pub const MAX_CAPACITY: u32 = 1 << 31;

/// Pads its contents to a cache line so `head` and `tail` do not share one.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

struct Shared<T> {
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
    dropped: AtomicU32,
    flags: AtomicU32,
    mask: u32,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: slots in `head..tail` are only read by the consumer and slots
// outside it only written by the producer. The halves are not `Clone`,
// and every mutating method takes `&mut self`, so each side has one user.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn slot(&self, index: u32) -> *mut MaybeUninit<T> {
        self.slots[(index & self.mask) as usize].get()
    }

    fn capacity(&self) -> u32 {
        self.mask + 1
    }

    fn counters(&self) -> QueueCounters {
        QueueCounters {
            head: self.head.load(Ordering::Acquire),
            tail: self.tail.load(Ordering::Acquire),
            ring_mask: self.mask,
            ring_entries: self.capacity(),
            flags: self.flags.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        let mut i = head;
        while i != tail {
            // SAFETY: every slot in `head..tail` was published and not yet
            // consumed, so it is initialized. `&mut self` excludes both halves.
            unsafe { (*self.slot(i)).assume_init_drop() };
            i = i.wrapping_add(1);
        }
    }
}

/// Create a ring of `capacity` slots.
///
/// `capacity` must be a power of two no larger than [`MAX_CAPACITY`].
pub fn ring<T>(capacity: u32) -> Result<(Producer<T>, Consumer<T>), SetupError> {
    if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_CAPACITY {
        return Err(SetupError::RingCreation {
            reason: format!("capacity {capacity} is not a power of two in 1..={MAX_CAPACITY}"),
        });
    }
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let shared = Arc::new(Shared {
        head: CachePadded(AtomicU32::new(0)),
        tail: CachePadded(AtomicU32::new(0)),
        dropped: AtomicU32::new(0),
        flags: AtomicU32::new(0),
        mask: capacity - 1,
        slots,
    });
    Ok((
        Producer {
            shared: Arc::clone(&shared),
            tail: 0,
            staged: 0,
        },
        Consumer {
            shared,
            head: 0,
            _not_sync: PhantomData,
        },
    ))
}

/// Writing half of a ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Local copy of the published tail.
    tail: u32,
    /// Values written past `tail` but not yet published.
    staged: u32,
}

impl<T> Producer<T> {
    /// Free slots, counting staged values as occupied.
    pub fn space_left(&self) -> u32 {
        let head = self.shared.head.load(Ordering::Acquire);
        let used = self.tail.wrapping_sub(head).wrapping_add(self.staged);
        self.shared.capacity() - used
    }

    /// Write `value` into the next free slot without publishing it.
    ///
    /// Gives the value back when the ring is full. Does not count a drop;
    /// callers that discard the value call [`record_drop`](Self::record_drop).
    pub fn stage(&mut self, value: T) -> Result<&mut T, T> {
        if self.space_left() == 0 {
            return Err(value);
        }
        let index = self.tail.wrapping_add(self.staged);
        self.staged += 1;
        // SAFETY: the slot is outside `head..tail`, so the consumer does not
        // touch it, and it is past every earlier staged slot.
        Ok(unsafe { (*self.shared.slot(index)).write(value) })
    }

    /// Number of staged, unpublished values.
    pub fn staged(&self) -> u32 {
        self.staged
    }

    /// Publish up to `n` staged values in staging order with one release
    /// store. Returns how many were published.
    pub fn publish(&mut self, n: u32) -> u32 {
        let count = n.min(self.staged);
        if count == 0 {
            return 0;
        }
        self.tail = self.tail.wrapping_add(count);
        self.staged -= count;
        self.shared.tail.store(self.tail, Ordering::Release);
        count
    }

    /// Push and publish one value. On a full ring the value is discarded
    /// and the dropped counter incremented.
    ///
    /// Any previously staged values are published along with it.
    pub fn push(&mut self, value: T) -> bool {
        if self.stage(value).is_err() {
            self.record_drop();
            return false;
        }
        self.publish(self.staged);
        true
    }

    /// Count one value that did not fit.
    pub fn record_drop(&self) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Values rejected because the ring was full.
    pub fn dropped(&self) -> u32 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Published values not yet consumed.
    pub fn len(&self) -> u32 {
        self.tail
            .wrapping_sub(self.shared.head.load(Ordering::Acquire))
    }

    /// Whether no published value is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity()
    }

    /// Current flags word.
    pub fn flags(&self) -> u32 {
        self.shared.flags.load(Ordering::Acquire)
    }

    /// Set `bits` in the flags word.
    pub fn insert_flags(&self, bits: u32) {
        self.shared.flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear `bits` in the flags word.
    pub fn remove_flags(&self, bits: u32) {
        self.shared.flags.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Snapshot of the ring's header words.
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        for i in 0..self.staged {
            // SAFETY: staged slots were written by `stage` and are never
            // visible to the consumer or to `Shared::drop`.
            unsafe { (*self.shared.slot(self.tail.wrapping_add(i))).assume_init_drop() };
        }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("tail", &self.tail)
            .field("staged", &self.staged)
            .finish()
    }
}

/// Reading half of a ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    /// Local copy of the consumed head.
    head: u32,
    /// `peek` hands out `&T` through `&self`; sharing the consumer is only
    /// sound when `T` is itself `Sync`.
    _not_sync: PhantomData<Cell<()>>,
}

// SAFETY: through `&Consumer` a thread can only read the head slot via
// `peek`, which yields `&T`. With `T: Sync` concurrent shared reads are
// sound, and slot release still requires `&mut self`.
unsafe impl<T: Send + Sync> Sync for Consumer<T> {}

impl<T> Consumer<T> {
    /// Remove the oldest published value.
    pub fn pop(&mut self) -> Option<T> {
        let tail = self.shared.tail.load(Ordering::Acquire);
        if tail == self.head {
            return None;
        }
        // SAFETY: `head != tail`, so the slot was published by a release
        // store we acquired. The producer will not reuse it until `head`
        // moves past it.
        let value = unsafe { (*self.shared.slot(self.head)).assume_init_read() };
        self.head = self.head.wrapping_add(1);
        self.shared.head.store(self.head, Ordering::Release);
        Some(value)
    }

    /// The oldest published value, without removing it.
    pub fn peek(&self) -> Option<&T> {
        let tail = self.shared.tail.load(Ordering::Acquire);
        if tail == self.head {
            return None;
        }
        // SAFETY: as in `pop`. The borrow ties the reference to `&self`,
        // and only `pop` (which needs `&mut self`) can release the slot.
        Some(unsafe { (*self.shared.slot(self.head)).assume_init_ref() })
    }

    /// Published values not yet consumed.
    pub fn len(&self) -> u32 {
        self.shared
            .tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head)
    }

    /// Whether no published value is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity()
    }

    /// Values the producer rejected because the ring was full.
    pub fn dropped(&self) -> u32 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Current flags word.
    pub fn flags(&self) -> u32 {
        self.shared.flags.load(Ordering::Acquire)
    }

    /// Set `bits` in the flags word.
    pub fn insert_flags(&self, bits: u32) {
        self.shared.flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear `bits` in the flags word.
    pub fn remove_flags(&self, bits: u32) {
        self.shared.flags.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Snapshot of the ring's header words.
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::collections::VecDeque;
    use std::thread;

    assert_impl_all!(Producer<Cell<u8>>: Send);
    assert_impl_all!(Consumer<Cell<u8>>: Send);
    assert_not_impl_any!(Consumer<Cell<u8>>: Sync);
    assert_impl_all!(Consumer<u64>: Send, Sync);

    #[test]
    fn rejects_bad_capacity() {
        assert!(ring::<u8>(0).is_err());
        assert!(ring::<u8>(6).is_err());
        assert!(ring::<u8>(1).is_ok());
    }

    #[test]
    fn push_pop_fifo() {
        let (mut tx, mut rx) = ring(4).unwrap();
        assert!(tx.push(1));
        assert!(tx.push(2));
        assert_eq!(rx.peek(), Some(&1));
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn full_ring_counts_drop() {
        let (mut tx, rx) = ring(2).unwrap();
        assert!(tx.push(1));
        assert!(tx.push(2));
        assert!(!tx.push(3));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn staged_values_are_invisible_until_published() {
        let (mut tx, mut rx) = ring(4).unwrap();
        *tx.stage(0).unwrap() = 10;
        tx.stage(11).unwrap();
        tx.stage(12).unwrap();
        assert_eq!(tx.space_left(), 1);
        assert_eq!(rx.pop(), None);
        assert_eq!(tx.publish(2), 2);
        assert_eq!(rx.pop(), Some(10));
        assert_eq!(rx.pop(), Some(11));
        assert_eq!(rx.pop(), None);
        assert_eq!(tx.publish(5), 1);
        assert_eq!(rx.pop(), Some(12));
    }

    #[test]
    fn stage_on_full_ring_returns_value() {
        let (mut tx, _rx) = ring(1).unwrap();
        tx.stage(1).unwrap();
        assert_eq!(tx.stage(2), Err(2));
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn indices_wrap_without_losing_entries() {
        let (mut tx, mut rx) = ring(4).unwrap();
        for i in 0..10_000u32 {
            assert!(tx.push(i));
            assert_eq!(rx.pop(), Some(i));
        }
        let c = rx.counters();
        assert_eq!(c.head, 10_000);
        assert_eq!(c.tail, 10_000);
        assert_eq!(c.ring_mask, 3);
    }

    #[test]
    fn flags_are_shared_between_halves() {
        let (tx, rx) = ring::<u8>(2).unwrap();
        rx.insert_flags(0b101);
        assert_eq!(tx.flags(), 0b101);
        tx.remove_flags(0b001);
        assert_eq!(rx.flags(), 0b100);
    }

    #[test]
    fn unconsumed_and_staged_values_are_dropped() {
        let marker = Arc::new(());
        {
            let (mut tx, mut rx) = ring(4).unwrap();
            tx.push(Arc::clone(&marker));
            tx.push(Arc::clone(&marker));
            tx.stage(Arc::clone(&marker)).unwrap();
            drop(rx.pop());
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn cross_thread_transfer_preserves_order() {
        let (mut tx, mut rx) = ring(64).unwrap();
        let producer = thread::spawn(move || {
            let mut i = 0u64;
            while i < 100_000 {
                if tx.push(i) {
                    i += 1;
                } else {
                    thread::yield_now();
                }
            }
        });
        let mut expected = 0u64;
        while expected < 100_000 {
            if let Some(v) = rx.pop() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    #[derive(Clone, Debug)]
    enum Op {
        Push(u16),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u16>().prop_map(Op::Push), Just(Op::Pop)]
    }

    proptest! {
        #[test]
        fn accepted_is_min_of_pushes_and_capacity(shift in 0u32..7, n in 0usize..200) {
            let cap = 1u32 << shift;
            let (mut tx, rx) = ring(cap).unwrap();
            let accepted = (0..n).filter(|&i| tx.push(i)).count();
            prop_assert_eq!(accepted, n.min(cap as usize));
            prop_assert_eq!(tx.dropped() as usize, n.saturating_sub(cap as usize));
            prop_assert_eq!(rx.len() as usize, accepted);
        }

        #[test]
        fn matches_vecdeque_model(shift in 0u32..5, ops in proptest::collection::vec(op(), 0..300)) {
            let cap = 1usize << shift;
            let (mut tx, mut rx) = ring(cap as u32).unwrap();
            let mut model = VecDeque::new();
            let mut model_dropped = 0u32;
            for op in ops {
                match op {
                    Op::Push(v) => {
                        let ok = tx.push(v);
                        if model.len() < cap {
                            model.push_back(v);
                            prop_assert!(ok);
                        } else {
                            model_dropped += 1;
                            prop_assert!(!ok);
                        }
                    }
                    Op::Pop => prop_assert_eq!(rx.pop(), model.pop_front()),
                }
                prop_assert_eq!(rx.len() as usize, model.len());
            }
            prop_assert_eq!(tx.dropped(), model_dropped);
        }
    }
}
