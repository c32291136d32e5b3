//! hopring: an io_uring-style submission/completion protocol with
//! multiple completion queues and chained completion programs.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all hopring sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use std::time::Duration;
//! use hopring::prelude::*;
//!
//! let mut rings = RingSet::with_config(RingConfig::with_queues(8, &[128, 128]));
//! rings.create_rings().unwrap();
//! let library = hopring::programs::reference_library(2).unwrap();
//! rings.register_programs(&library, &["echo_counter"]).unwrap();
//! rings.activate().unwrap();
//!
//! rings
//!     .submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(1)))
//!     .unwrap();
//! let cqe = rings
//!     .wait_completion(CqIndex::PRIMARY, Some(Duration::from_secs(5)))
//!     .unwrap();
//! assert_eq!(cqe.result, 1);
//! assert_eq!(rings.counter(CounterKey(0)).unwrap(), 1);
//! rings.destroy().unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `hopring-core` | Entries, IDs, errors, counting table, memory layout |
//! | [`ring`] | `hopring-ring` | SPSC ring, submission and completion queues |
//! | [`program`] | `hopring-program` | Program trait, invocation context, registry |
//! | [`programs`] | `hopring-programs` | Reference programs (echo, ping-pong, redirect) |
//! | [`engine`] | `hopring-engine` | `RingSet`, configuration, dispatcher, metrics |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types (`hopring-core`).
///
/// Submission and completion entries, typed indices, the error taxonomy,
/// the [`types::CountingTable`] and the [`types::RingLayout`] byte layout.
pub use hopring_core as types;

/// Lock-free rings (`hopring-ring`).
pub use hopring_ring as ring;

/// Completion-program contract and registry (`hopring-program`).
pub use hopring_program as program;

/// Reference completion programs (`hopring-programs`).
pub use hopring_programs as programs;

/// Ring-set lifecycle and execution engine (`hopring-engine`).
pub use hopring_engine as engine;

/// Common imports for typical hopring usage.
pub mod prelude {
    // Entries and indices
    pub use hopring_core::{
        errno, CompletionEntry, CounterKey, CqIndex, CqeFlags, Opcode, ProgramSlot, SqeFlags,
        SubmissionEntry, UserData,
    };

    // Errors
    pub use hopring_core::{LifecycleState, RingError, SetupError};

    // Programs
    pub use hopring_program::{
        CompletionProgram, InvocationContext, ProgramHandle, ProgramLibrary, ProgramOutcome,
    };

    // Engine
    pub use hopring_engine::{RingConfig, RingMetrics, RingSet, SqPollConfig};
}
