//! Completion programs for the hopring protocol.
//!
//! A [`CompletionProgram`] runs when the engine consumes a submission
//! that names its registry slot. It reads the submission (and, for armed
//! chains, the completion that woke it), may mutate the shared counting
//! table, and returns a [`ProgramOutcome`] describing its own completion,
//! an optional route override and an optional follow-up submission.
//!
//! Programs are resolved by name from a [`ProgramLibrary`] and installed
//! into a [`ProgramRegistry`], which maps slots `0..N` to handles.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod context;
pub mod program;
pub mod registry;

pub use context::{Emitted, InvocationContext};
pub use program::{CompletionProgram, ProgramOutcome};
pub use registry::{Invocation, ProgramHandle, ProgramLibrary, ProgramRegistry};
