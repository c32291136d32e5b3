//! Submission and completion entries.
//!
//! These are the typed forms of the fixed-size records exchanged through
//! the rings. Their wire encodings live in [`layout`](crate::layout).

use bitflags::bitflags;

use crate::id::{CqIndex, ProgramSlot, UserData};

/// Errno values carried in negative completion results.
pub mod errno {
    /// I/O error. Reported when a program panics mid-invocation.
    pub const EIO: i32 = 5;
    /// Invalid argument. Reported for unregistered slots and bad queues.
    pub const EINVAL: i32 = 22;
}

/// Operation tag of a submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Completes immediately with result 0.
    #[default]
    Nop = 0,
    /// Invokes the completion program named by the entry's offset.
    Program = 1,
}

impl Opcode {
    /// Decode a wire opcode byte.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Nop),
            1 => Some(Self::Program),
            _ => None,
        }
    }

    /// The wire opcode byte.
    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

bitflags! {
    /// Per-submission flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SqeFlags: u8 {
        /// Park a program submission on its target queue. The next
        /// completion routed to that queue is consumed as the program's
        /// trigger instead of being appended.
        const ARMED = 1 << 0;
    }
}

bitflags! {
    /// Completion flags. The low byte is reserved for the engine;
    /// programs may set any bit from [`CqeFlags::USER_SHIFT`] upward.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CqeFlags: u32 {
        /// Produced by an armed program woken by a trigger (one chain hop).
        const HOP = 1 << 0;
        /// Emitted by a program in addition to its own completion.
        const EMITTED = 1 << 1;
        /// The program overrode the submission's target queue.
        const REROUTED = 1 << 2;
    }
}

impl CqeFlags {
    /// First bit available to program-defined flags.
    pub const USER_SHIFT: u32 = 8;
}

/// A request written into the submission queue.
///
/// Constructed by the application, published through the SQ, and
/// consumed exactly once by the execution engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmissionEntry {
    /// What the engine should do with this entry.
    pub opcode: Opcode,
    /// Submission flags.
    pub flags: SqeFlags,
    /// Program slot for [`Opcode::Program`]; otherwise free for the
    /// submitter. Ping-pong chains also read it as the chain index.
    pub offset: u64,
    /// Token copied into the resulting completion.
    pub user_data: UserData,
    /// Completion queue that receives this entry's completion.
    pub target_cq: CqIndex,
}

impl SubmissionEntry {
    /// A no-op targeting the primary queue.
    pub fn nop(user_data: UserData) -> Self {
        Self {
            opcode: Opcode::Nop,
            user_data,
            ..Self::default()
        }
    }

    /// A program invocation targeting the primary queue.
    pub fn program(slot: ProgramSlot, user_data: UserData) -> Self {
        Self {
            opcode: Opcode::Program,
            offset: u64::from(slot.0),
            user_data,
            ..Self::default()
        }
    }

    /// Route this entry's completion to `cq`.
    pub fn with_target(mut self, cq: CqIndex) -> Self {
        self.target_cq = cq;
        self
    }

    /// Park this entry on its target queue until a completion arrives.
    pub fn armed(mut self) -> Self {
        self.flags |= SqeFlags::ARMED;
        self
    }

    /// The program slot encoded in `offset`.
    ///
    /// Offsets beyond `u32::MAX` map to `ProgramSlot(u32::MAX)`, which
    /// no registry can hold, so they surface as invalid slots.
    pub fn program_slot(&self) -> ProgramSlot {
        ProgramSlot(u32::try_from(self.offset).unwrap_or(u32::MAX))
    }

    /// Whether this entry waits for a trigger completion.
    pub fn is_armed(&self) -> bool {
        self.flags.contains(SqeFlags::ARMED)
    }
}

/// A result record appended to exactly one completion queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionEntry {
    /// Token of the submission that produced this completion.
    pub user_data: UserData,
    /// Result code. Negative values are errno codes.
    pub result: i32,
    /// Completion flags.
    pub flags: CqeFlags,
}

impl CompletionEntry {
    /// A completion with no flags.
    pub fn new(user_data: UserData, result: i32) -> Self {
        Self {
            user_data,
            result,
            flags: CqeFlags::empty(),
        }
    }

    /// A failed completion carrying `-errno`.
    pub fn error(user_data: UserData, errno: i32) -> Self {
        Self::new(user_data, -errno)
    }

    /// Add flags to this completion.
    pub fn with_flags(mut self, flags: CqeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Whether the result is an error code.
    pub fn is_error(&self) -> bool {
        self.result < 0
    }
}
