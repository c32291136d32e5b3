//! Core types for the hopring completion ring protocol.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other hopring crate: typed indices,
//! submission and completion entries, the error taxonomy, the shared
//! counting table, and the byte layout of ring memory.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod counting;
pub mod entry;
pub mod error;
pub mod id;
pub mod layout;

pub use counting::CountingTable;
pub use entry::{errno, CompletionEntry, CqeFlags, Opcode, SqeFlags, SubmissionEntry};
pub use error::{LifecycleState, RingError, SetupError};
pub use id::{CounterKey, CqIndex, ProgramSlot, UserData};
pub use layout::{LayoutError, QueueCounters, RingHeader, RingLayout};
