//! Completion queues.
//!
//! Each completion queue is an SPSC ring of [`CompletionEntry`] with its
//! own head, tail, mask and overflow counter. The engine holds the
//! [`CompletionSink`] half and posts records; the application holds the
//! [`CompletionQueue`] half and consumes them.
//!
//! [`CompletionQueue::wait_one`] is the only blocking operation in the
//! protocol. A waiter registers itself on the queue's notifier; the sink
//! only takes the notifier lock when a waiter is registered, so posting to
//! a queue nobody waits on costs one fence and one load.
//!
//! There is no cross-queue wait: callers poll each queue or wait on them
//! in sequence.

use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use hopring_core::{CompletionEntry, CqIndex, QueueCounters, RingError, SetupError};

use crate::ring::{ring, Consumer, Producer};

#[derive(Debug, Default)]
struct Notifier {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
}

impl Notifier {
    fn notify(&self) {
        // Pairs with the fence in `wait_one`: either the waiter sees the
        // new tail, or we see the waiter.
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.cond.notify_all();
        }
    }
}

/// Create one completion queue of `entries` slots.
pub fn completion_queue(entries: u32) -> Result<(CompletionSink, CompletionQueue), SetupError> {
    let (producer, consumer) = ring(entries)?;
    let notifier = Arc::new(Notifier::default());
    Ok((
        CompletionSink {
            producer,
            notifier: Arc::clone(&notifier),
        },
        CompletionQueue { consumer, notifier },
    ))
}

/// Create one completion queue per entry of `sizes`, indexed in order.
pub fn completion_queues(sizes: &[u32]) -> Result<(CompletionSinks, CompletionQueueSet), SetupError> {
    if sizes.is_empty() {
        return Err(SetupError::RingCreation {
            reason: "at least one completion queue is required".into(),
        });
    }
    let mut sinks = Vec::with_capacity(sizes.len());
    let mut queues = Vec::with_capacity(sizes.len());
    for &entries in sizes {
        let (sink, queue) = completion_queue(entries)?;
        sinks.push(sink);
        queues.push(queue);
    }
    Ok((CompletionSinks { sinks }, CompletionQueueSet { queues }))
}

/// Engine side of one completion queue.
#[derive(Debug)]
pub struct CompletionSink {
    producer: Producer<CompletionEntry>,
    notifier: Arc<Notifier>,
}

impl CompletionSink {
    /// Append `entry` and wake any waiter.
    ///
    /// Returns `false` and increments the overflow counter when the queue
    /// is full; the entry is discarded.
    pub fn post(&mut self, entry: CompletionEntry) -> bool {
        if !self.producer.push(entry) {
            return false;
        }
        self.notifier.notify();
        true
    }

    /// Free slots.
    pub fn space_left(&self) -> u32 {
        self.producer.space_left()
    }

    /// Entries posted but not consumed.
    pub fn len(&self) -> u32 {
        self.producer.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    /// Total slots.
    pub fn capacity(&self) -> u32 {
        self.producer.capacity()
    }

    /// Completions discarded because the queue was full.
    pub fn overflow(&self) -> u32 {
        self.producer.dropped()
    }
}

/// Application side of one completion queue.
#[derive(Debug)]
pub struct CompletionQueue {
    consumer: Consumer<CompletionEntry>,
    notifier: Arc<Notifier>,
}

impl CompletionQueue {
    /// Take the oldest completion without blocking.
    pub fn try_pop(&mut self) -> Option<CompletionEntry> {
        self.consumer.pop()
    }

    /// The oldest completion, left in place.
    pub fn peek(&self) -> Option<&CompletionEntry> {
        self.consumer.peek()
    }

    /// Block until a completion is available or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns [`RingError::Timeout`] once the
    /// deadline has passed with the queue still empty; never earlier.
    pub fn wait_one(&mut self, timeout: Option<Duration>) -> Result<CompletionEntry, RingError> {
        if let Some(cqe) = self.consumer.pop() {
            return Ok(cqe);
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut guard = self
            .notifier
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.notifier.waiters.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let result = loop {
            if let Some(cqe) = self.consumer.pop() {
                break Ok(cqe);
            }
            match deadline {
                None => {
                    guard = self
                        .notifier
                        .cond
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Err(RingError::Timeout);
                    }
                    let (g, _) = self
                        .notifier
                        .cond
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = g;
                }
            }
        };

        self.notifier.waiters.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
        result
    }

    /// Take every completion currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<CompletionEntry> {
        let mut out = Vec::with_capacity(self.consumer.len() as usize);
        while let Some(cqe) = self.consumer.pop() {
            out.push(cqe);
        }
        out
    }

    /// Completions waiting.
    pub fn len(&self) -> u32 {
        self.consumer.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Total slots.
    pub fn capacity(&self) -> u32 {
        self.consumer.capacity()
    }

    /// Completions discarded because the queue was full.
    pub fn overflow(&self) -> u32 {
        self.consumer.dropped()
    }

    /// Header words of the queue.
    pub fn counters(&self) -> QueueCounters {
        self.consumer.counters()
    }
}

/// Engine side of every completion queue in a ring set.
#[derive(Debug)]
pub struct CompletionSinks {
    sinks: Vec<CompletionSink>,
}

impl CompletionSinks {
    /// Number of queues.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether the set has no queues. Never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Whether `cq` names a queue in the set.
    pub fn contains(&self, cq: CqIndex) -> bool {
        cq.as_usize() < self.sinks.len()
    }

    /// The sink of queue `cq`.
    pub fn get_mut(&mut self, cq: CqIndex) -> Result<&mut CompletionSink, RingError> {
        let count = self.sinks.len();
        self.sinks
            .get_mut(cq.as_usize())
            .ok_or(RingError::InvalidQueue { index: cq, count })
    }

    /// Post `entry` to queue `cq`. `Ok(false)` means the queue overflowed.
    pub fn post(&mut self, cq: CqIndex, entry: CompletionEntry) -> Result<bool, RingError> {
        Ok(self.get_mut(cq)?.post(entry))
    }
}

/// Application side of every completion queue in a ring set.
#[derive(Debug)]
pub struct CompletionQueueSet {
    queues: Vec<CompletionQueue>,
}

impl CompletionQueueSet {
    /// Number of queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether the set has no queues. Never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queue `cq`.
    pub fn get(&self, cq: CqIndex) -> Result<&CompletionQueue, RingError> {
        self.queues.get(cq.as_usize()).ok_or(RingError::InvalidQueue {
            index: cq,
            count: self.queues.len(),
        })
    }

    /// Queue `cq`, mutably.
    pub fn get_mut(&mut self, cq: CqIndex) -> Result<&mut CompletionQueue, RingError> {
        let count = self.queues.len();
        self.queues
            .get_mut(cq.as_usize())
            .ok_or(RingError::InvalidQueue { index: cq, count })
    }

    /// Block on queue `cq`. See [`CompletionQueue::wait_one`].
    pub fn wait_one(
        &mut self,
        cq: CqIndex,
        timeout: Option<Duration>,
    ) -> Result<CompletionEntry, RingError> {
        self.get_mut(cq)?.wait_one(timeout)
    }

    /// Take the oldest completion on queue `cq` without blocking.
    pub fn try_pop(&mut self, cq: CqIndex) -> Result<CompletionEntry, RingError> {
        self.get_mut(cq)?.try_pop().ok_or(RingError::QueueEmpty)
    }

    /// Iterate queues in index order.
    pub fn iter(&self) -> impl Iterator<Item = &CompletionQueue> {
        self.queues.iter()
    }

    /// Header words of every queue, in index order.
    pub fn counters(&self) -> Vec<QueueCounters> {
        self.queues.iter().map(CompletionQueue::counters).collect()
    }
}
