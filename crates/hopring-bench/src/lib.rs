//! Benchmark profiles for the hopring protocol.
//!
//! - [`round_trip_config`]: SQ of 64 and two CQs of 1024.
//! - [`active_ring_set`]: a ring set with the reference library
//!   registered and the engine running.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use hopring_core::RingError;
use hopring_engine::{RingConfig, RingSet};
use hopring_programs::{echo, reference_library};

/// Queue sizes large enough that a benchmark iteration never overflows.
pub fn round_trip_config(workers: usize) -> RingConfig {
    RingConfig {
        worker_count: Some(workers),
        ..RingConfig::with_queues(64, &[1024, 1024])
    }
}

/// Build and activate a ring set with the echo program in slot 0.
pub fn active_ring_set(config: RingConfig) -> Result<RingSet, RingError> {
    let mut rings = RingSet::with_config(config);
    rings.create_rings()?;
    let library = reference_library(2)?;
    rings.register_programs(&library, &[echo::NAME])?;
    rings.activate()?;
    Ok(rings)
}
