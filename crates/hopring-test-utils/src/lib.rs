//! Test utilities for hopring development.
//!
//! Provides fixture configurations, a [`TestRingBuilder`] that walks a
//! [`RingSet`] to `Active`, collection helpers for completions and
//! metrics, and the probe programs in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hopring_core::{CompletionEntry, CqIndex, RingError};
use hopring_engine::{RingConfig, RingMetrics, RingSet};
use hopring_program::{CompletionProgram, ProgramHandle};

/// Generous per-completion deadline for tests on slow CI runners.
pub const WAIT: Duration = Duration::from_secs(5);

/// SQ of 8 entries and two CQs of 128, with two workers.
pub fn scenario_config() -> RingConfig {
    RingConfig {
        worker_count: Some(2),
        ..RingConfig::with_queues(8, &[128, 128])
    }
}

/// Builder for ring sets that are already `Active`.
pub struct TestRingBuilder {
    config: RingConfig,
    programs: Vec<ProgramHandle>,
}

impl TestRingBuilder {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            programs: Vec::new(),
        }
    }

    /// Register `program` in the next slot.
    pub fn program<P: CompletionProgram>(mut self, program: P) -> Self {
        self.programs.push(Arc::new(program));
        self
    }

    /// Register an existing handle in the next slot.
    pub fn handle(mut self, handle: ProgramHandle) -> Self {
        self.programs.push(handle);
        self
    }

    pub fn build(self) -> Result<RingSet, RingError> {
        let mut rings = RingSet::with_config(self.config);
        rings.create_rings()?;
        for program in self.programs {
            rings.register_program(program)?;
        }
        rings.activate()?;
        Ok(rings)
    }
}

impl Default for TestRingBuilder {
    fn default() -> Self {
        Self::new(scenario_config())
    }
}

/// Wait for `n` completions on `cq`, each within [`WAIT`].
pub fn collect(rings: &mut RingSet, cq: CqIndex, n: usize) -> Result<Vec<CompletionEntry>, RingError> {
    (0..n)
        .map(|_| rings.wait_completion(cq, Some(WAIT)))
        .collect()
}

/// Poll metrics until `pred` holds or [`WAIT`] passes. Returns the last
/// snapshot and whether `pred` held.
pub fn wait_for_metrics(rings: &RingSet, pred: impl Fn(&RingMetrics) -> bool) -> (RingMetrics, bool) {
    let deadline = Instant::now() + WAIT;
    loop {
        let m = rings.metrics();
        if pred(&m) {
            return (m, true);
        }
        if Instant::now() > deadline {
            return (m, false);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Assert that `cq` stays empty for `window`.
pub fn assert_quiet(rings: &mut RingSet, cq: CqIndex, window: Duration) {
    match rings.wait_completion(cq, Some(window)) {
        Err(RingError::Timeout) => {}
        other => panic!("expected queue {cq} to stay empty, got {other:?}"),
    }
}
