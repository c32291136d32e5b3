//! Byte layout of ring memory.
//!
//! An external collaborator that maps rings into shared memory sees one
//! contiguous region:
//!
//! ```text
//! 0      SQ head            | 64   SQ tail
//! 128    CQ0 head           | 192  CQ0 tail
//! 256    SQ mask   260 CQ0 mask   264 SQ entries  268 CQ0 entries
//! 272    SQ dropped 276 SQ flags  280 CQ0 flags   284 CQ0 overflow
//! 320    CQ0 entries (16 bytes each)
//! ...    CQ1.. blocks, each 64-byte aligned:
//!        +0 head  +64 tail  +128 mask  +132 entries  +136 overflow
//!        +140 flags  +192 entries
//! ...    SQ entries (64 bytes each), 64-byte aligned
//! ```
//!
//! Head/tail words are free-running `u32` counters; the physical slot of
//! index `i` is `i & mask`. All words use native endianness.

use std::error::Error;
use std::fmt;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::entry::{CompletionEntry, CqeFlags, Opcode, SqeFlags, SubmissionEntry};
use crate::id::{CqIndex, UserData};

/// Size of one submission entry in ring memory.
pub const SQE_SIZE: usize = 64;
/// Size of one completion entry in ring memory.
pub const CQE_SIZE: usize = 16;

const BLOCK_ALIGN: usize = 64;

/// Fixed offsets of the SQ and primary CQ header words.
pub mod offsets {
    /// SQ head.
    pub const SQ_HEAD: usize = 0;
    /// SQ tail.
    pub const SQ_TAIL: usize = 64;
    /// CQ0 head.
    pub const CQ_HEAD: usize = 128;
    /// CQ0 tail.
    pub const CQ_TAIL: usize = 192;
    /// SQ ring mask.
    pub const SQ_RING_MASK: usize = 256;
    /// CQ0 ring mask.
    pub const CQ_RING_MASK: usize = 260;
    /// SQ ring entry count.
    pub const SQ_RING_ENTRIES: usize = 264;
    /// CQ0 ring entry count.
    pub const CQ_RING_ENTRIES: usize = 268;
    /// SQ dropped counter.
    pub const SQ_DROPPED: usize = 272;
    /// SQ flags word.
    pub const SQ_FLAGS: usize = 276;
    /// CQ0 flags word.
    pub const CQ_FLAGS: usize = 280;
    /// CQ0 overflow counter.
    pub const CQ_OVERFLOW: usize = 284;
    /// First CQ0 entry.
    pub const CQ_CQES: usize = 320;
}

// Relative offsets inside an additional CQ block.
const EXTRA_CQ_HEAD: usize = 0;
const EXTRA_CQ_TAIL: usize = 64;
const EXTRA_CQ_RING_MASK: usize = 128;
const EXTRA_CQ_RING_ENTRIES: usize = 132;
const EXTRA_CQ_OVERFLOW: usize = 136;
const EXTRA_CQ_FLAGS: usize = 140;
const EXTRA_CQ_CQES: usize = 192;

/// Wire form of a [`SubmissionEntry`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RawSubmissionEntry {
    /// Opcode byte.
    pub opcode: u8,
    /// [`SqeFlags`] bits.
    pub flags: u8,
    /// Unused priority.
    pub ioprio: u16,
    /// Unused descriptor.
    pub fd: i32,
    /// Offset field (program slot).
    pub off: u64,
    /// Unused address.
    pub addr: u64,
    /// Unused length.
    pub len: u32,
    /// Unused per-op flags.
    pub op_flags: u32,
    /// User data token.
    pub user_data: u64,
    /// Unused buffer index.
    pub buf_index: u16,
    /// Unused personality.
    pub personality: u16,
    /// Target completion queue.
    pub cq_idx: u32,
    /// Reserved.
    pub pad: [u64; 2],
}

/// Wire form of a [`CompletionEntry`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RawCompletionEntry {
    /// User data token.
    pub user_data: u64,
    /// Result code.
    pub res: i32,
    /// [`CqeFlags`] bits.
    pub flags: u32,
}

const _: () = assert!(std::mem::size_of::<RawSubmissionEntry>() == SQE_SIZE);
const _: () = assert!(std::mem::size_of::<RawCompletionEntry>() == CQE_SIZE);

impl From<&SubmissionEntry> for RawSubmissionEntry {
    fn from(e: &SubmissionEntry) -> Self {
        Self {
            opcode: e.opcode.as_raw(),
            flags: e.flags.bits(),
            off: e.offset,
            user_data: e.user_data.0,
            cq_idx: e.target_cq.0,
            ..Self::default()
        }
    }
}

impl TryFrom<RawSubmissionEntry> for SubmissionEntry {
    type Error = LayoutError;

    fn try_from(raw: RawSubmissionEntry) -> Result<Self, LayoutError> {
        let opcode = Opcode::from_raw(raw.opcode).ok_or(LayoutError::UnknownOpcode(raw.opcode))?;
        let flags = SqeFlags::from_bits(raw.flags).ok_or(LayoutError::UnknownSqeFlags(raw.flags))?;
        Ok(Self {
            opcode,
            flags,
            offset: raw.off,
            user_data: UserData(raw.user_data),
            target_cq: CqIndex(raw.cq_idx),
        })
    }
}

impl From<&CompletionEntry> for RawCompletionEntry {
    fn from(e: &CompletionEntry) -> Self {
        Self {
            user_data: e.user_data.0,
            res: e.result,
            flags: e.flags.bits(),
        }
    }
}

impl From<RawCompletionEntry> for CompletionEntry {
    fn from(raw: RawCompletionEntry) -> Self {
        Self {
            user_data: UserData(raw.user_data),
            result: raw.res,
            flags: CqeFlags::from_bits_retain(raw.flags),
        }
    }
}

/// Errors from encoding or decoding ring memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutError {
    /// The region is smaller than the layout requires.
    RegionTooSmall {
        /// Bytes the layout needs.
        needed: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// A ring's entry count is zero or not a power of two.
    InvalidEntries {
        /// The offending entry count.
        entries: u32,
    },
    /// The layout needs at least one completion queue.
    NoCompletionQueues,
    /// A header describes a different number of CQs than the layout.
    QueueCountMismatch {
        /// CQs in the layout.
        expected: usize,
        /// CQs in the header.
        actual: usize,
    },
    /// A completion queue index is out of range.
    InvalidQueue(CqIndex),
    /// A submission entry carries an unknown opcode byte.
    UnknownOpcode(u8),
    /// A submission entry carries unknown flag bits.
    UnknownSqeFlags(u8),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegionTooSmall { needed, actual } => {
                write!(f, "region of {actual} bytes is smaller than the {needed} required")
            }
            Self::InvalidEntries { entries } => {
                write!(f, "entry count {entries} is not a non-zero power of two")
            }
            Self::NoCompletionQueues => write!(f, "layout has no completion queues"),
            Self::QueueCountMismatch { expected, actual } => {
                write!(f, "header has {actual} completion queues, layout has {expected}")
            }
            Self::InvalidQueue(cq) => write!(f, "completion queue {cq} is not in the layout"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode {op:#04x}"),
            Self::UnknownSqeFlags(bits) => write!(f, "unknown submission flags {bits:#04x}"),
        }
    }
}

impl Error for LayoutError {}

/// Counter words of one ring as they appear in ring memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Consumer index.
    pub head: u32,
    /// Producer index.
    pub tail: u32,
    /// `ring_entries - 1`.
    pub ring_mask: u32,
    /// Capacity.
    pub ring_entries: u32,
    /// Flags word.
    pub flags: u32,
    /// Dropped (SQ) or overflow (CQ) counter.
    pub dropped: u32,
}

/// Header words of a whole ring set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RingHeader {
    /// Submission queue counters.
    pub sq: QueueCounters,
    /// Completion queue counters, by queue index.
    pub cqs: Vec<QueueCounters>,
}

/// Absolute offsets of the SQ words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SqOffsets {
    /// Head word.
    pub head: usize,
    /// Tail word.
    pub tail: usize,
    /// Mask word.
    pub ring_mask: usize,
    /// Entry-count word.
    pub ring_entries: usize,
    /// Flags word.
    pub flags: usize,
    /// Dropped-counter word.
    pub dropped: usize,
    /// First submission entry.
    pub sqes: usize,
}

/// Absolute offsets of one CQ's words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CqOffsets {
    /// Head word.
    pub head: usize,
    /// Tail word.
    pub tail: usize,
    /// Mask word.
    pub ring_mask: usize,
    /// Entry-count word.
    pub ring_entries: usize,
    /// Overflow-counter word.
    pub overflow: usize,
    /// Flags word.
    pub flags: usize,
    /// First completion entry.
    pub cqes: usize,
}

fn align_up(v: usize, align: usize) -> usize {
    v.div_ceil(align) * align
}

fn check_entries(entries: u32) -> Result<(), LayoutError> {
    if entries == 0 || !entries.is_power_of_two() {
        return Err(LayoutError::InvalidEntries { entries });
    }
    Ok(())
}

/// Computed layout for one SQ and a set of CQs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingLayout {
    sq_entries: u32,
    sq: SqOffsets,
    cqs: Vec<(u32, CqOffsets)>,
    size: usize,
}

impl RingLayout {
    /// Compute the layout. Every entry count must be a power of two.
    pub fn new(sq_entries: u32, cq_entries: &[u32]) -> Result<Self, LayoutError> {
        check_entries(sq_entries)?;
        if cq_entries.is_empty() {
            return Err(LayoutError::NoCompletionQueues);
        }

        let mut cqs = Vec::with_capacity(cq_entries.len());
        let mut end = 0usize;
        for (i, &entries) in cq_entries.iter().enumerate() {
            check_entries(entries)?;
            let block = if i == 0 {
                CqOffsets {
                    head: offsets::CQ_HEAD,
                    tail: offsets::CQ_TAIL,
                    ring_mask: offsets::CQ_RING_MASK,
                    ring_entries: offsets::CQ_RING_ENTRIES,
                    overflow: offsets::CQ_OVERFLOW,
                    flags: offsets::CQ_FLAGS,
                    cqes: offsets::CQ_CQES,
                }
            } else {
                let base = align_up(end, BLOCK_ALIGN);
                CqOffsets {
                    head: base + EXTRA_CQ_HEAD,
                    tail: base + EXTRA_CQ_TAIL,
                    ring_mask: base + EXTRA_CQ_RING_MASK,
                    ring_entries: base + EXTRA_CQ_RING_ENTRIES,
                    overflow: base + EXTRA_CQ_OVERFLOW,
                    flags: base + EXTRA_CQ_FLAGS,
                    cqes: base + EXTRA_CQ_CQES,
                }
            };
            end = block.cqes + entries as usize * CQE_SIZE;
            cqs.push((entries, block));
        }

        let sqes = align_up(end, BLOCK_ALIGN);
        let sq = SqOffsets {
            head: offsets::SQ_HEAD,
            tail: offsets::SQ_TAIL,
            ring_mask: offsets::SQ_RING_MASK,
            ring_entries: offsets::SQ_RING_ENTRIES,
            flags: offsets::SQ_FLAGS,
            dropped: offsets::SQ_DROPPED,
            sqes,
        };
        Ok(Self {
            sq_entries,
            sq,
            cqs,
            size: sqes + sq_entries as usize * SQE_SIZE,
        })
    }

    /// Total bytes of the region.
    pub fn region_size(&self) -> usize {
        self.size
    }

    /// Number of completion queues.
    pub fn cq_count(&self) -> usize {
        self.cqs.len()
    }

    /// SQ word offsets.
    pub fn sq_offsets(&self) -> SqOffsets {
        self.sq
    }

    /// Word offsets of completion queue `cq`.
    pub fn cq_offsets(&self, cq: CqIndex) -> Result<CqOffsets, LayoutError> {
        self.cqs
            .get(cq.as_usize())
            .map(|&(_, o)| o)
            .ok_or(LayoutError::InvalidQueue(cq))
    }

    fn check_region(&self, len: usize) -> Result<(), LayoutError> {
        if len < self.size {
            return Err(LayoutError::RegionTooSmall {
                needed: self.size,
                actual: len,
            });
        }
        Ok(())
    }

    /// Write every header word of `header` into `region`.
    pub fn write_header(&self, header: &RingHeader, region: &mut [u8]) -> Result<(), LayoutError> {
        self.check_region(region.len())?;
        if header.cqs.len() != self.cqs.len() {
            return Err(LayoutError::QueueCountMismatch {
                expected: self.cqs.len(),
                actual: header.cqs.len(),
            });
        }
        let sq = &header.sq;
        put_u32(region, self.sq.head, sq.head);
        put_u32(region, self.sq.tail, sq.tail);
        put_u32(region, self.sq.ring_mask, sq.ring_mask);
        put_u32(region, self.sq.ring_entries, sq.ring_entries);
        put_u32(region, self.sq.flags, sq.flags);
        put_u32(region, self.sq.dropped, sq.dropped);
        for ((_, o), cq) in self.cqs.iter().zip(&header.cqs) {
            put_u32(region, o.head, cq.head);
            put_u32(region, o.tail, cq.tail);
            put_u32(region, o.ring_mask, cq.ring_mask);
            put_u32(region, o.ring_entries, cq.ring_entries);
            put_u32(region, o.flags, cq.flags);
            put_u32(region, o.overflow, cq.dropped);
        }
        Ok(())
    }

    /// Read every header word from `region`.
    pub fn read_header(&self, region: &[u8]) -> Result<RingHeader, LayoutError> {
        self.check_region(region.len())?;
        let sq = QueueCounters {
            head: get_u32(region, self.sq.head),
            tail: get_u32(region, self.sq.tail),
            ring_mask: get_u32(region, self.sq.ring_mask),
            ring_entries: get_u32(region, self.sq.ring_entries),
            flags: get_u32(region, self.sq.flags),
            dropped: get_u32(region, self.sq.dropped),
        };
        let cqs = self
            .cqs
            .iter()
            .map(|(_, o)| QueueCounters {
                head: get_u32(region, o.head),
                tail: get_u32(region, o.tail),
                ring_mask: get_u32(region, o.ring_mask),
                ring_entries: get_u32(region, o.ring_entries),
                flags: get_u32(region, o.flags),
                dropped: get_u32(region, o.overflow),
            })
            .collect();
        Ok(RingHeader { sq, cqs })
    }

    fn sqe_range(&self, index: u32) -> std::ops::Range<usize> {
        let slot = (index & (self.sq_entries - 1)) as usize;
        let start = self.sq.sqes + slot * SQE_SIZE;
        start..start + SQE_SIZE
    }

    fn cqe_range(&self, cq: CqIndex, index: u32) -> Result<std::ops::Range<usize>, LayoutError> {
        let &(entries, o) = self
            .cqs
            .get(cq.as_usize())
            .ok_or(LayoutError::InvalidQueue(cq))?;
        let slot = (index & (entries - 1)) as usize;
        let start = o.cqes + slot * CQE_SIZE;
        Ok(start..start + CQE_SIZE)
    }

    /// Encode `entry` at ring index `index` of the SQ array.
    pub fn write_sqe(
        &self,
        region: &mut [u8],
        index: u32,
        entry: &SubmissionEntry,
    ) -> Result<(), LayoutError> {
        self.check_region(region.len())?;
        let raw = RawSubmissionEntry::from(entry);
        region[self.sqe_range(index)].copy_from_slice(raw.as_bytes());
        Ok(())
    }

    /// Decode the submission entry at ring index `index`.
    pub fn read_sqe(&self, region: &[u8], index: u32) -> Result<SubmissionEntry, LayoutError> {
        self.check_region(region.len())?;
        let raw = RawSubmissionEntry::read_from(&region[self.sqe_range(index)]).ok_or(
            LayoutError::RegionTooSmall {
                needed: SQE_SIZE,
                actual: 0,
            },
        )?;
        SubmissionEntry::try_from(raw)
    }

    /// Encode `entry` at ring index `index` of completion queue `cq`.
    pub fn write_cqe(
        &self,
        region: &mut [u8],
        cq: CqIndex,
        index: u32,
        entry: &CompletionEntry,
    ) -> Result<(), LayoutError> {
        self.check_region(region.len())?;
        let range = self.cqe_range(cq, index)?;
        region[range].copy_from_slice(RawCompletionEntry::from(entry).as_bytes());
        Ok(())
    }

    /// Decode the completion entry at ring index `index` of queue `cq`.
    pub fn read_cqe(
        &self,
        region: &[u8],
        cq: CqIndex,
        index: u32,
    ) -> Result<CompletionEntry, LayoutError> {
        self.check_region(region.len())?;
        let range = self.cqe_range(cq, index)?;
        let raw = RawCompletionEntry::read_from(&region[range]).ok_or(
            LayoutError::RegionTooSmall {
                needed: CQE_SIZE,
                actual: 0,
            },
        )?;
        Ok(CompletionEntry::from(raw))
    }
}

fn put_u32(region: &mut [u8], offset: usize, value: u32) {
    region[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn get_u32(region: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&region[offset..offset + 4]);
    u32::from_ne_bytes(word)
}
