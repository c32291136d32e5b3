//! Lock-free rings for the hopring protocol.
//!
//! [`ring`](ring::ring) builds a single-producer single-consumer circular
//! buffer split into a [`Producer`] and a [`Consumer`] half. The
//! submission queue and every completion queue are thin typed wrappers
//! over that one primitive:
//!
//! - [`SubmissionQueue`] / [`SubmissionSource`]: application stages and
//!   publishes entries; the engine consumes them.
//! - [`CompletionSink`] / [`CompletionQueue`]: the engine posts records;
//!   the application polls or waits for them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod completion;
#[allow(unsafe_code)]
pub mod ring;
pub mod submission;

pub use completion::{
    completion_queue, completion_queues, CompletionQueue, CompletionQueueSet, CompletionSink,
    CompletionSinks,
};
pub use ring::{ring, Consumer, Producer};
pub use submission::{submission_queue, SqFlags, SubmissionQueue, SubmissionSource};
