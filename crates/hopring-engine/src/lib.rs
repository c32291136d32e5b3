//! Execution engine for hopring ring sets.
//!
//! [`RingSet`] owns a submission queue, its completion queues, the shared
//! counting table and the program registry, and enforces the setup and
//! teardown order. Once activated, a dispatcher thread consumes the SQ,
//! runs completion programs on a worker pool, routes every completion
//! (waking armed programs parked on a queue) and posts the results.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
mod executor;
mod lifecycle;
pub mod metrics;
pub mod ring_set;
mod routing;

pub use config::{
    ConfigError, ResolvedSizes, RingConfig, SqPollConfig, MAX_CQS, MAX_CQ_ENTRIES, MAX_SQ_ENTRIES,
};
pub use metrics::RingMetrics;
pub use ring_set::{RingSet, ShutdownReport};
