//! User-facing [`RingSet`] API.
//!
//! A ring set bundles one submission queue, an ordered set of completion
//! queues, the shared counting table and the program registry, and walks
//! them through the lifecycle in [`LifecycleState`].
//!
//! # Architecture
//!
//! ```text
//! Application thread            Dispatcher                 Workers (N)
//!     |                              |                          |
//!     |--allocate_entry/submit------>| source.next_entry()      |
//!     |   [SQ ring, doorbell]        | route / park             |
//!     |                              |--Job-------------------->|
//!     |                              |   [bounded(max_inflight)]| registry.invoke()
//!     |                              |<-JobResult---------------|
//!     |                              | deliver / follow-ups     |
//!     |<--wait_completion------------| sinks.post()             |
//!     |   [CQ rings, per-queue wait] |                          |
//! ```

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hopring_core::{
    CompletionEntry, CounterKey, CountingTable, CqIndex, LifecycleState, ProgramSlot, RingError,
    RingHeader, RingLayout, SetupError, SubmissionEntry,
};
use hopring_program::{ProgramHandle, ProgramLibrary, ProgramRegistry};
use hopring_ring::{
    completion_queues, submission_queue, CompletionQueue, CompletionQueueSet, CompletionSinks,
    SqFlags, SubmissionQueue, SubmissionSource,
};

use crate::config::RingConfig;
use crate::executor::{EngineHandle, EngineParts};
use crate::lifecycle::{Lifecycle, REGISTRATION_OPEN, RINGS_EXIST};
use crate::metrics::{EngineCounters, RingMetrics};

// ── ShutdownReport ───────────────────────────────────────────────

/// Report from [`RingSet::destroy`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Total time spent stopping the engine.
    pub total_ms: u64,
    /// Whether the dispatcher thread was joined (true if it never ran).
    pub dispatcher_joined: bool,
    /// Number of worker threads joined.
    pub workers_joined: usize,
}

// ── Rings ────────────────────────────────────────────────────────

/// Engine-side halves held until activation.
#[derive(Debug)]
struct Staged {
    source: SubmissionSource,
    sinks: CompletionSinks,
    registry: ProgramRegistry,
}

#[derive(Debug)]
struct Rings {
    sq: SubmissionQueue,
    cqs: CompletionQueueSet,
    counters: Arc<CountingTable>,
    layout: RingLayout,
    staged: Option<Staged>,
}

// ── RingSet ──────────────────────────────────────────────────────

/// One submission queue, its completion queues and the engine serving
/// them.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hopring_core::{CqIndex, SubmissionEntry, UserData};
/// use hopring_engine::{RingConfig, RingSet};
/// use hopring_programs::EchoCounter;
///
/// let mut rings = RingSet::with_config(RingConfig::with_queues(8, &[16]));
/// rings.create_rings().unwrap();
/// rings.register_program(std::sync::Arc::new(EchoCounter)).unwrap();
/// rings.activate().unwrap();
///
/// rings.submit_entry(SubmissionEntry::nop(UserData(7))).unwrap();
/// let cqe = rings
///     .wait_completion(CqIndex::PRIMARY, Some(Duration::from_secs(5)))
///     .unwrap();
/// assert_eq!(cqe.user_data, UserData(7));
/// rings.destroy().unwrap();
/// ```
#[derive(Debug)]
pub struct RingSet {
    config: RingConfig,
    lifecycle: Lifecycle,
    rings: Option<Rings>,
    engine: Option<EngineHandle>,
    metrics: Arc<EngineCounters>,
}

impl Default for RingSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RingSet {
    /// An uninitialized ring set with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RingConfig::default())
    }

    /// An uninitialized ring set. `config` is validated by
    /// [`create_rings`](Self::create_rings).
    pub fn with_config(config: RingConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            rings: None,
            engine: None,
            metrics: Arc::new(EngineCounters::default()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// The configuration this set was built with.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    fn violation(&self, operation: &'static str) -> RingError {
        RingError::StateViolation {
            operation,
            state: self.lifecycle.state(),
        }
    }

    fn rings(&self, operation: &'static str) -> Result<&Rings, RingError> {
        self.lifecycle.require(operation, RINGS_EXIST)?;
        self.rings.as_ref().ok_or_else(|| self.violation(operation))
    }

    fn active_rings(&mut self, operation: &'static str) -> Result<&mut Rings, RingError> {
        self.lifecycle.require(operation, &[LifecycleState::Active])?;
        let state = self.lifecycle.state();
        self.rings
            .as_mut()
            .ok_or(RingError::StateViolation { operation, state })
    }

    fn staged(&mut self, operation: &'static str) -> Result<&mut Staged, RingError> {
        let state = self.lifecycle.state();
        self.rings
            .as_mut()
            .and_then(|r| r.staged.as_mut())
            .ok_or(RingError::StateViolation { operation, state })
    }

    // ── Setup ────────────────────────────────────────────────────

    /// Validate the configuration and build the SQ, every CQ and the
    /// counting table.
    ///
    /// Requires [`LifecycleState::Uninitialized`]. On failure the set
    /// stays uninitialized.
    pub fn create_rings(&mut self) -> Result<(), RingError> {
        self.lifecycle
            .require("create_rings", &[LifecycleState::Uninitialized])?;

        let sizes = self.config.resolve().map_err(SetupError::from)?;
        let layout = RingLayout::new(sizes.sq_entries, &sizes.cq_entries).map_err(|e| {
            SetupError::RingCreation {
                reason: e.to_string(),
            }
        })?;
        let (sq, source) = submission_queue(sizes.sq_entries)?;
        let (sinks, cqs) = completion_queues(&sizes.cq_entries)?;

        tracing::info!(
            sq_entries = sizes.sq_entries,
            cq_entries = ?sizes.cq_entries,
            region_bytes = layout.region_size(),
            counters = self.config.counter_slots,
            "rings created"
        );
        self.rings = Some(Rings {
            sq,
            cqs,
            counters: Arc::new(CountingTable::new(self.config.counter_slots)),
            layout,
            staged: Some(Staged {
                source,
                sinks,
                registry: ProgramRegistry::with_capacity(self.config.max_programs),
            }),
        });
        self.lifecycle.advance(LifecycleState::RingsCreated);
        Ok(())
    }

    /// Register one program, returning its slot.
    ///
    /// Valid until [`activate`](Self::activate).
    pub fn register_program(&mut self, program: ProgramHandle) -> Result<ProgramSlot, RingError> {
        self.lifecycle
            .require("register_program", REGISTRATION_OPEN)?;
        let name = program.name().to_string();
        let slot = self.staged("register_program")?.registry.register(program)?;
        tracing::debug!(%slot, %name, "program registered");
        self.lifecycle.advance(LifecycleState::ProgramsRegistered);
        Ok(slot)
    }

    /// Resolve `names` from `library` and register them in order.
    ///
    /// All-or-nothing: an unknown name fails with
    /// [`SetupError::UnresolvedProgram`] before anything is registered.
    pub fn register_programs(
        &mut self,
        library: &ProgramLibrary,
        names: &[&str],
    ) -> Result<Vec<ProgramSlot>, RingError> {
        self.lifecycle
            .require("register_programs", REGISTRATION_OPEN)?;
        let slots = self
            .staged("register_programs")?
            .registry
            .register_from(library, names)?;
        tracing::debug!(programs = ?names, slots = slots.len(), "programs registered");
        self.lifecycle.advance(LifecycleState::ProgramsRegistered);
        Ok(slots)
    }

    /// Start the dispatcher and program workers.
    ///
    /// Requires [`LifecycleState::ProgramsRegistered`]. If a thread cannot
    /// be spawned the engine halves are lost; the set can only be
    /// destroyed afterwards.
    pub fn activate(&mut self) -> Result<(), RingError> {
        self.lifecycle
            .require("activate", &[LifecycleState::ProgramsRegistered])?;
        let state = self.lifecycle.state();
        let rings = self.rings.as_mut().ok_or(RingError::StateViolation {
            operation: "activate",
            state,
        })?;
        let staged = rings.staged.take().ok_or(RingError::StateViolation {
            operation: "activate",
            state,
        })?;

        let parts = EngineParts {
            source: staged.source,
            sinks: staged.sinks,
            registry: Arc::new(staged.registry),
            counters: Arc::clone(&rings.counters),
            metrics: Arc::clone(&self.metrics),
        };
        self.engine = Some(EngineHandle::start(parts, &self.config)?);
        self.lifecycle.advance(LifecycleState::Active);
        Ok(())
    }

    /// Stop the engine and release every ring.
    ///
    /// Valid from every state except [`LifecycleState::Destroyed`].
    /// Completions still queued are discarded.
    pub fn destroy(&mut self) -> Result<ShutdownReport, RingError> {
        if self.lifecycle.state() == LifecycleState::Destroyed {
            return Err(self.violation("destroy"));
        }
        let report = match self.engine.take() {
            Some(mut engine) => engine.shutdown(),
            None => ShutdownReport {
                dispatcher_joined: true,
                ..ShutdownReport::default()
            },
        };
        if !report.dispatcher_joined {
            tracing::warn!("dispatcher thread panicked during shutdown");
        }
        self.rings = None;
        self.lifecycle.advance(LifecycleState::Destroyed);
        tracing::info!(
            total_ms = report.total_ms,
            workers_joined = report.workers_joined,
            "ring set destroyed"
        );
        Ok(report)
    }

    // ── Submission ───────────────────────────────────────────────

    /// Hand out the next free SQ entry without publishing it.
    ///
    /// Returns [`RingError::RingFull`] (and counts a drop) when the SQ
    /// has no free slot.
    pub fn allocate_entry(&mut self) -> Result<&mut SubmissionEntry, RingError> {
        self.active_rings("allocate_entry")?.sq.allocate_entry()
    }

    /// Publish up to `count` allocated entries and wake the engine.
    /// Returns how many were published.
    pub fn submit(&mut self, count: u32) -> Result<u32, RingError> {
        let published = self.active_rings("submit")?.sq.submit(count);
        if published > 0 {
            self.wake_engine();
        }
        Ok(published)
    }

    /// Allocate, fill and publish `entry`, together with any entries
    /// allocated before it.
    pub fn submit_entry(&mut self, entry: SubmissionEntry) -> Result<(), RingError> {
        *self.allocate_entry()? = entry;
        let pending = self.active_rings("submit_entry")?.sq.pending();
        self.submit(pending).map(|_| ())
    }

    /// Entries that can be allocated before the SQ is full.
    pub fn sq_space(&self) -> Result<u32, RingError> {
        Ok(self.rings("sq_space")?.sq.space_left())
    }

    fn wake_engine(&self) {
        let (Some(engine), Some(rings)) = (&self.engine, &self.rings) else {
            return;
        };
        if self.config.sq_poll.is_some() {
            // Pairs with the fence the dispatcher issues after setting
            // NEED_WAKEUP.
            fence(Ordering::SeqCst);
            if !rings.sq.flags().contains(SqFlags::NEED_WAKEUP) {
                return;
            }
        }
        if engine.ring_doorbell() {
            EngineCounters::bump(&self.metrics.doorbells);
        }
    }

    // ── Completion ───────────────────────────────────────────────

    /// Block until completion queue `cq` has an entry, or `timeout`
    /// passes. `None` waits indefinitely.
    pub fn wait_completion(
        &mut self,
        cq: CqIndex,
        timeout: Option<Duration>,
    ) -> Result<CompletionEntry, RingError> {
        self.active_rings("wait_completion")?
            .cqs
            .wait_one(cq, timeout)
    }

    /// Pop the oldest entry of `cq` without blocking.
    pub fn try_completion(&mut self, cq: CqIndex) -> Result<CompletionEntry, RingError> {
        self.active_rings("try_completion")?.cqs.try_pop(cq)
    }

    /// Pop every entry currently queued on `cq`, oldest first.
    pub fn drain(&mut self, cq: CqIndex) -> Result<Vec<CompletionEntry>, RingError> {
        Ok(self.active_rings("drain")?.cqs.get_mut(cq)?.drain())
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Completion queue `cq`, for length and overflow inspection.
    pub fn queue(&self, cq: CqIndex) -> Result<&CompletionQueue, RingError> {
        self.rings("queue")?.cqs.get(cq)
    }

    /// Number of completion queues.
    pub fn queue_count(&self) -> Result<usize, RingError> {
        Ok(self.rings("queue_count")?.cqs.len())
    }

    /// Snapshot of the whole counting table.
    pub fn counters(&self) -> Result<Vec<u64>, RingError> {
        Ok(self.rings("counters")?.counters.snapshot())
    }

    /// Current value of one counter.
    pub fn counter(&self, key: CounterKey) -> Result<u64, RingError> {
        self.rings("counter")?.counters.get(key)
    }

    /// Header words of every ring, as they would appear in ring memory.
    pub fn header(&self) -> Result<RingHeader, RingError> {
        let rings = self.rings("header")?;
        Ok(RingHeader {
            sq: rings.sq.counters(),
            cqs: rings.cqs.counters(),
        })
    }

    /// Byte layout of the ring region.
    pub fn layout(&self) -> Result<&RingLayout, RingError> {
        Ok(&self.rings("layout")?.layout)
    }

    /// Engine metrics. Queue-level counters are zero once the rings are
    /// gone.
    pub fn metrics(&self) -> RingMetrics {
        let mut m = self.metrics.snapshot();
        if let Some(rings) = &self.rings {
            m.sq_dropped = u64::from(rings.sq.dropped());
            m.cq_overflows = rings.cqs.iter().map(|q| u64::from(q.overflow())).sum();
        }
        m
    }
}

impl Drop for RingSet {
    fn drop(&mut self) {
        if self.rings.is_some() || self.engine.is_some() {
            let _ = self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopring_core::{CqeFlags, UserData};
    use hopring_programs::{reference_library, EchoCounter};

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn small() -> RingSet {
        RingSet::with_config(RingConfig {
            worker_count: Some(2),
            ..RingConfig::with_queues(8, &[16, 16])
        })
    }

    #[test]
    fn operations_out_of_order_are_state_violations() {
        let mut rings = small();
        assert!(matches!(
            rings.register_program(Arc::new(EchoCounter)),
            Err(RingError::StateViolation {
                operation: "register_program",
                state: LifecycleState::Uninitialized
            })
        ));
        assert!(rings.counters().is_err());
        rings.create_rings().unwrap();
        assert!(matches!(
            rings.create_rings(),
            Err(RingError::StateViolation { .. })
        ));
        assert!(matches!(
            rings.activate(),
            Err(RingError::StateViolation {
                operation: "activate",
                state: LifecycleState::RingsCreated
            })
        ));
        assert!(matches!(
            rings.submit(1),
            Err(RingError::StateViolation { .. })
        ));
        assert_eq!(rings.counters().unwrap(), vec![0; 10]);
    }

    #[test]
    fn invalid_config_fails_create_and_stays_uninitialized() {
        let mut rings = RingSet::with_config(RingConfig::with_queues(0, &[16]));
        assert!(matches!(
            rings.create_rings(),
            Err(RingError::Setup(SetupError::InvalidConfig { .. }))
        ));
        assert_eq!(rings.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn unresolved_name_registers_nothing() {
        let mut rings = small();
        rings.create_rings().unwrap();
        let lib = reference_library(2).unwrap();
        let err = rings.register_programs(&lib, &["echo_counter", "missing"]);
        assert_eq!(
            err,
            Err(RingError::Setup(SetupError::UnresolvedProgram {
                name: "missing".into()
            }))
        );
        assert_eq!(rings.state(), LifecycleState::RingsCreated);
        let slots = rings.register_programs(&lib, &["ping_pong", "ping_pong"]).unwrap();
        assert_eq!(slots, vec![ProgramSlot(0), ProgramSlot(1)]);
        assert_eq!(rings.state(), LifecycleState::ProgramsRegistered);
    }

    #[test]
    fn full_lifecycle_with_one_nop() {
        let mut rings = small();
        rings.create_rings().unwrap();
        rings.register_program(Arc::new(EchoCounter)).unwrap();
        rings.activate().unwrap();
        assert_eq!(rings.state(), LifecycleState::Active);
        assert!(matches!(
            rings.register_program(Arc::new(EchoCounter)),
            Err(RingError::StateViolation { .. })
        ));

        rings
            .submit_entry(SubmissionEntry::nop(UserData(42)).with_target(CqIndex(1)))
            .unwrap();
        let cqe = rings.wait_completion(CqIndex(1), WAIT).unwrap();
        assert_eq!(cqe.user_data, UserData(42));
        assert_eq!(cqe.result, 0);
        assert_eq!(cqe.flags, CqeFlags::empty());
        assert_eq!(rings.try_completion(CqIndex(1)), Err(RingError::QueueEmpty));

        let report = rings.destroy().unwrap();
        assert!(report.dispatcher_joined);
        assert_eq!(report.workers_joined, 2);
        assert_eq!(rings.state(), LifecycleState::Destroyed);
        assert!(matches!(
            rings.destroy(),
            Err(RingError::StateViolation { .. })
        ));
        assert!(rings.counters().is_err());
    }

    #[test]
    fn allocation_is_not_publication() {
        let mut rings = small();
        rings.create_rings().unwrap();
        rings.register_program(Arc::new(EchoCounter)).unwrap();
        rings.activate().unwrap();

        *rings.allocate_entry().unwrap() = SubmissionEntry::nop(UserData(1));
        *rings.allocate_entry().unwrap() = SubmissionEntry::nop(UserData(2));
        assert_eq!(rings.sq_space().unwrap(), 6);
        assert_eq!(
            rings.wait_completion(CqIndex::PRIMARY, Some(Duration::from_millis(50))),
            Err(RingError::Timeout)
        );
        assert_eq!(rings.submit(5).unwrap(), 2);
        let first = rings.wait_completion(CqIndex::PRIMARY, WAIT).unwrap();
        let second = rings.wait_completion(CqIndex::PRIMARY, WAIT).unwrap();
        assert_eq!((first.user_data, second.user_data), (UserData(1), UserData(2)));
    }

    #[test]
    fn header_matches_layout() {
        let mut rings = small();
        rings.create_rings().unwrap();
        let header = rings.header().unwrap();
        assert_eq!(header.sq.ring_entries, 8);
        assert_eq!(header.cqs.len(), 2);
        assert_eq!(header.cqs[1].ring_mask, 15);
        assert_eq!(rings.layout().unwrap().cq_count(), 2);
    }

    #[test]
    fn destroy_before_create_is_allowed() {
        let mut rings = RingSet::new();
        let report = rings.destroy().unwrap();
        assert!(report.dispatcher_joined);
        assert_eq!(rings.state(), LifecycleState::Destroyed);
    }
}
