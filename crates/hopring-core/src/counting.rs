//! Shared counting table mutated by completion programs.
//!
//! [`CountingTable`] is the only state written concurrently by program
//! invocations. Every mutation is a single atomic read-modify-write on
//! one key, so concurrent increments never lose updates.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RingError;
use crate::id::CounterKey;

/// Fixed-size array of atomic counters keyed `0..len`.
#[derive(Debug)]
pub struct CountingTable {
    counters: Box<[AtomicU64]>,
}

impl CountingTable {
    /// Create a table of `len` zeroed counters.
    pub fn new(len: usize) -> Self {
        Self {
            counters: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the table has no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn slot(&self, key: CounterKey) -> Result<&AtomicU64, RingError> {
        self.counters
            .get(key.0 as usize)
            .ok_or(RingError::InvalidCounterKey {
                key,
                len: self.counters.len(),
            })
    }

    /// Increment `key` by one, returning the new value.
    pub fn increment(&self, key: CounterKey) -> Result<u64, RingError> {
        self.add(key, 1)
    }

    /// Add `delta` to `key`, returning the new value. Wraps on overflow.
    pub fn add(&self, key: CounterKey, delta: u64) -> Result<u64, RingError> {
        let prev = self.slot(key)?.fetch_add(delta, Ordering::AcqRel);
        Ok(prev.wrapping_add(delta))
    }

    /// Current value of `key`.
    pub fn get(&self, key: CounterKey) -> Result<u64, RingError> {
        Ok(self.slot(key)?.load(Ordering::Acquire))
    }

    /// Copy of every counter, in key order.
    pub fn snapshot(&self) -> Vec<u64> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .collect()
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.counters
            .iter()
            .fold(0u64, |acc, c| acc.wrapping_add(c.load(Ordering::Acquire)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn new_table_is_zeroed() {
        let table = CountingTable::new(10);
        assert_eq!(table.len(), 10);
        assert!(table.snapshot().iter().all(|&c| c == 0));
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn increment_returns_new_value() {
        let table = CountingTable::new(2);
        assert_eq!(table.increment(CounterKey(1)), Ok(1));
        assert_eq!(table.increment(CounterKey(1)), Ok(2));
        assert_eq!(table.add(CounterKey(0), 5), Ok(5));
        assert_eq!(table.snapshot(), vec![5, 2]);
    }

    #[test]
    fn out_of_range_key_is_rejected() {
        let table = CountingTable::new(2);
        assert_eq!(
            table.increment(CounterKey(2)),
            Err(RingError::InvalidCounterKey {
                key: CounterKey(2),
                len: 2
            })
        );
        assert!(table.get(CounterKey(7)).is_err());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let table = Arc::new(CountingTable::new(4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        table.increment(CounterKey(t % 4)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.snapshot(), vec![2000, 2000, 2000, 2000]);
        assert_eq!(table.total(), 8000);
    }
}
