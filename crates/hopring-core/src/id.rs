//! Strongly-typed indices and tokens carried through the ring protocol.

use std::fmt;

/// Index into the completion-program registry.
///
/// Slots are assigned sequentially at registration. `ProgramSlot(n)`
/// identifies the n-th registered program. A submission carries its
/// slot in the `offset` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramSlot(pub u32);

impl fmt::Display for ProgramSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProgramSlot {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Index of a completion queue within a ring set.
///
/// `CqIndex(0)` is the primary queue and always exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CqIndex(pub u32);

impl CqIndex {
    /// The primary completion queue.
    pub const PRIMARY: CqIndex = CqIndex(0);

    /// The index as a `usize`, for slice addressing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CqIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CqIndex {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Opaque 64-bit token chosen by the submitter.
///
/// Copied verbatim from a submission into its completion so that the
/// consumer can correlate the two. Chained programs bake a hop counter
/// into the token they forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserData(pub u64);

impl UserData {
    /// The token one hop further along a chain.
    pub fn next_hop(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserData {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Key into the shared [`CountingTable`](crate::CountingTable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey(pub u32);

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CounterKey {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_hop_wraps() {
        assert_eq!(UserData(7).next_hop(), UserData(8));
        assert_eq!(UserData(u64::MAX).next_hop(), UserData(0));
    }

    #[test]
    fn primary_queue_is_zero() {
        assert_eq!(CqIndex::PRIMARY, CqIndex(0));
        assert_eq!(CqIndex::default(), CqIndex::PRIMARY);
        assert_eq!(CqIndex(3).as_usize(), 3);
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(ProgramSlot(4).to_string(), "4");
        assert_eq!(CounterKey(9).to_string(), "9");
    }
}
