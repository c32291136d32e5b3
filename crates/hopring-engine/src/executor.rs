//! Dispatcher thread and program worker pool.
//!
//! The dispatcher owns the engine side of every ring: it is the only
//! consumer of the SQ and the only producer of every CQ. Program
//! invocations run on a pool of workers fed through a bounded crossbeam
//! channel; outcomes come back over a second channel and are routed by
//! the dispatcher. Follow-up submissions never touch the application's
//! SQ: they are queued inside the dispatcher and processed ahead of new
//! SQ entries.
//!
//! # Wakeups
//!
//! Without SQ polling the dispatcher blocks on the doorbell and result
//! channels, and every `submit` rings the doorbell. With polling it scans
//! the SQ on a short interval; after the configured idle time it sets
//! [`SqFlags::NEED_WAKEUP`] and blocks until a doorbell arrives.
//! Dropping the doorbell sender stops the dispatcher in either mode.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvError, Sender, TrySendError};

use hopring_core::{
    errno, CompletionEntry, CountingTable, CqIndex, CqeFlags, Opcode, RingError, SetupError,
    SubmissionEntry, UserData,
};
use hopring_program::{Invocation, ProgramRegistry};
use hopring_ring::{CompletionSinks, SqFlags, SubmissionSource};

use crate::config::RingConfig;
use crate::metrics::EngineCounters;
use crate::ring_set::ShutdownReport;
use crate::routing::{Delivery, Router};

/// How often a polling dispatcher rescans the SQ while not idle.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

// ── Jobs ─────────────────────────────────────────────────────────

/// One program invocation handed to a worker.
#[derive(Debug)]
pub(crate) struct Job {
    pub sqe: SubmissionEntry,
    /// Completion that woke an armed program.
    pub trigger: Option<CompletionEntry>,
}

impl Job {
    fn new(sqe: SubmissionEntry) -> Self {
        Self { sqe, trigger: None }
    }

    /// User data for this job's completion: a woken program answers with
    /// the token of the completion that triggered it.
    fn completion_token(&self) -> UserData {
        self.trigger.map_or(self.sqe.user_data, |t| t.user_data)
    }

    fn is_hop(&self) -> bool {
        self.trigger.is_some()
    }
}

/// Worker reply for one [`Job`].
#[derive(Debug)]
pub(crate) enum JobResult {
    Done { job: Job, invocation: Invocation },
    Panicked { job: Job, message: String },
    Rejected { job: Job, error: RingError },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Main loop of a worker thread. Runs until the job channel closes.
fn worker_loop(
    jobs: Receiver<Job>,
    results: Sender<JobResult>,
    registry: Arc<ProgramRegistry>,
    counters: Arc<CountingTable>,
    queue_count: usize,
) {
    while let Ok(job) = jobs.recv() {
        let slot = job.sqe.program_slot();
        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            registry.invoke(slot, &job.sqe, job.trigger.as_ref(), &counters, queue_count)
        }));
        let result = match run {
            Ok(Ok(invocation)) => JobResult::Done { job, invocation },
            Ok(Err(error)) => JobResult::Rejected { job, error },
            Err(payload) => JobResult::Panicked {
                job,
                message: panic_message(payload.as_ref()),
            },
        };
        if results.send(result).is_err() {
            break;
        }
    }
}

fn chain_flags(entry: CompletionEntry, woken: bool) -> CompletionEntry {
    if woken {
        entry.with_flags(CqeFlags::HOP)
    } else {
        entry
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

struct Dispatcher {
    source: SubmissionSource,
    sinks: CompletionSinks,
    router: Router,
    registry: Arc<ProgramRegistry>,
    metrics: Arc<EngineCounters>,
    jobs: Sender<Job>,
    results: Receiver<JobResult>,
    doorbell: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    sq_poll_idle: Option<Duration>,
    follow_ups: VecDeque<SubmissionEntry>,
}

impl Dispatcher {
    fn run(mut self) {
        tracing::debug!(queues = self.sinks.len(), "dispatcher started");
        let mut last_work = Instant::now();
        loop {
            let worked = self.pump();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if worked {
                last_work = Instant::now();
                continue;
            }
            let keep_going = match self.sq_poll_idle {
                None => self.wait_for_work(None),
                Some(idle) if last_work.elapsed() < idle => self.wait_for_work(Some(POLL_INTERVAL)),
                Some(_) => {
                    let keep_going = self.sleep_until_woken();
                    last_work = Instant::now();
                    keep_going
                }
            };
            if !keep_going {
                break;
            }
        }
        tracing::debug!(parked = self.router.parked_count(), "dispatcher stopped");
    }

    /// One pass over every work source. Returns whether anything was done.
    fn pump(&mut self) -> bool {
        let mut worked = false;
        while let Ok(result) = self.results.try_recv() {
            self.handle_result(result);
            worked = true;
        }
        while let Some(sqe) = self.follow_ups.pop_front() {
            self.dispatch(sqe);
            worked = true;
        }
        while let Some(sqe) = self.source.next_entry() {
            EngineCounters::bump(&self.metrics.submissions);
            self.dispatch(sqe);
            worked = true;
        }
        worked
    }

    /// Block until a result or doorbell arrives, or `timeout` passes.
    /// Returns `false` when the engine should stop.
    fn wait_for_work(&mut self, timeout: Option<Duration>) -> bool {
        let results = self.results.clone();
        let doorbell = self.doorbell.clone();
        match timeout {
            None => select! {
                recv(results) -> msg => self.on_result(msg),
                recv(doorbell) -> msg => msg.is_ok(),
            },
            Some(timeout) => select! {
                recv(results) -> msg => self.on_result(msg),
                recv(doorbell) -> msg => msg.is_ok(),
                default(timeout) => true,
            },
        }
    }

    fn on_result(&mut self, msg: Result<JobResult, RecvError>) -> bool {
        match msg {
            Ok(result) => {
                self.handle_result(result);
                true
            }
            Err(_) => {
                tracing::warn!("all program workers exited, stopping dispatcher");
                false
            }
        }
    }

    /// Idle path of a polling dispatcher.
    fn sleep_until_woken(&mut self) -> bool {
        self.source.insert_flags(SqFlags::NEED_WAKEUP);
        // Pairs with the fence in `RingSet::submit`: either the submitter
        // sees the flag and rings, or we see its entries here.
        fence(Ordering::SeqCst);
        if !self.source.is_empty() {
            self.source.remove_flags(SqFlags::NEED_WAKEUP);
            return true;
        }
        tracing::trace!("sq poller idle, waiting for wakeup");
        let keep_going = self.wait_for_work(None);
        self.source.remove_flags(SqFlags::NEED_WAKEUP);
        EngineCounters::bump(&self.metrics.sq_wakeups);
        keep_going
    }

    fn dispatch(&mut self, sqe: SubmissionEntry) {
        if !self.sinks.contains(sqe.target_cq) {
            EngineCounters::bump(&self.metrics.invalid_queues);
            tracing::warn!(
                user_data = %sqe.user_data,
                target_cq = %sqe.target_cq,
                queues = self.sinks.len(),
                "submission targets a nonexistent completion queue"
            );
            self.post(
                CqIndex::PRIMARY,
                CompletionEntry::error(sqe.user_data, errno::EINVAL),
            );
            return;
        }

        match sqe.opcode {
            Opcode::Nop => {
                EngineCounters::bump(&self.metrics.nops);
                tracing::trace!(user_data = %sqe.user_data, cq = %sqe.target_cq, "nop");
                self.deliver(sqe.target_cq, CompletionEntry::new(sqe.user_data, 0));
            }
            Opcode::Program => {
                if let Err(error) = self.registry.get(sqe.program_slot()) {
                    self.reject(&Job::new(sqe), &error);
                    return;
                }
                if sqe.is_armed() {
                    self.router.park(sqe);
                    self.update_parked();
                    tracing::debug!(
                        slot = %sqe.program_slot(),
                        cq = %sqe.target_cq,
                        "program parked"
                    );
                } else {
                    self.run_program(Job::new(sqe));
                }
            }
        }
    }

    fn reject(&mut self, job: &Job, error: &RingError) {
        EngineCounters::bump(&self.metrics.invalid_slots);
        tracing::warn!(user_data = %job.sqe.user_data, %error, "program submission rejected");
        let entry = CompletionEntry::error(job.completion_token(), errno::EINVAL);
        self.deliver(job.sqe.target_cq, chain_flags(entry, job.is_hop()));
    }

    fn run_program(&mut self, job: Job) {
        if let Err(err) = self.jobs.send(job) {
            let job = err.into_inner();
            tracing::warn!(user_data = %job.sqe.user_data, "no program workers available");
            let entry = CompletionEntry::error(job.completion_token(), errno::EIO);
            self.deliver(job.sqe.target_cq, chain_flags(entry, job.is_hop()));
        }
    }

    /// Route `entry` toward `cq`, waking a parked program if one waits there.
    fn deliver(&mut self, cq: CqIndex, entry: CompletionEntry) {
        match self.router.route(cq, entry) {
            Delivery::Post { cq, entry } => self.post(cq, entry),
            Delivery::Wake { program, trigger } => {
                self.update_parked();
                tracing::debug!(
                    slot = %program.program_slot(),
                    %cq,
                    trigger = %trigger.user_data,
                    "parked program woken"
                );
                self.run_program(Job {
                    sqe: program,
                    trigger: Some(trigger),
                });
            }
        }
    }

    fn post(&mut self, cq: CqIndex, entry: CompletionEntry) {
        match self.sinks.post(cq, entry) {
            Ok(true) => EngineCounters::bump(&self.metrics.completions_posted),
            Ok(false) => tracing::warn!(
                %cq,
                user_data = %entry.user_data,
                "completion queue overflow, completion dropped"
            ),
            Err(error) => tracing::warn!(%error, "completion for a nonexistent queue dropped"),
        }
    }

    fn update_parked(&self) {
        self.metrics
            .parked_programs
            .store(self.router.parked_count() as u64, Ordering::Relaxed);
    }

    fn handle_result(&mut self, result: JobResult) {
        match result {
            JobResult::Done { job, invocation } => {
                let woken = job.is_hop();
                EngineCounters::bump(&self.metrics.invocations);
                if woken {
                    EngineCounters::bump(&self.metrics.hops);
                }

                for (cq, entry) in invocation.emitted {
                    EngineCounters::bump(&self.metrics.emitted);
                    self.deliver(cq, entry);
                }

                let outcome = invocation.outcome;
                let mut flags = outcome.flags;
                if woken {
                    flags |= CqeFlags::HOP;
                }
                let target = match outcome.route {
                    None => job.sqe.target_cq,
                    Some(cq) if cq == job.sqe.target_cq => cq,
                    Some(cq) if self.sinks.contains(cq) => {
                        flags |= CqeFlags::REROUTED;
                        cq
                    }
                    Some(cq) => {
                        EngineCounters::bump(&self.metrics.invalid_queues);
                        tracing::warn!(
                            slot = %job.sqe.program_slot(),
                            route = %cq,
                            "program routed to a nonexistent queue, using the submission's target"
                        );
                        job.sqe.target_cq
                    }
                };
                self.deliver(
                    target,
                    CompletionEntry {
                        user_data: job.completion_token(),
                        result: outcome.result,
                        flags,
                    },
                );

                if let Some(next) = outcome.follow_up {
                    EngineCounters::bump(&self.metrics.follow_ups);
                    tracing::trace!(
                        user_data = %next.user_data,
                        cq = %next.target_cq,
                        "follow-up queued"
                    );
                    self.follow_ups.push_back(next);
                }
            }
            JobResult::Panicked { job, message } => {
                EngineCounters::bump(&self.metrics.program_panics);
                tracing::warn!(
                    slot = %job.sqe.program_slot(),
                    user_data = %job.sqe.user_data,
                    panic = %message,
                    "completion program panicked"
                );
                let entry = CompletionEntry::error(job.completion_token(), errno::EIO);
                self.deliver(job.sqe.target_cq, chain_flags(entry, job.is_hop()));
            }
            JobResult::Rejected { job, error } => {
                self.reject(&job, &error);
            }
        }
    }
}

// ── EngineHandle ─────────────────────────────────────────────────

/// Everything the engine takes ownership of at activation.
pub(crate) struct EngineParts {
    pub source: SubmissionSource,
    pub sinks: CompletionSinks,
    pub registry: Arc<ProgramRegistry>,
    pub counters: Arc<CountingTable>,
    pub metrics: Arc<EngineCounters>,
}

/// Application-side handle to the running engine threads.
#[derive(Debug)]
pub(crate) struct EngineHandle {
    doorbell: Option<Sender<()>>,
    shutdown: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Spawn the worker pool and the dispatcher.
    pub fn start(parts: EngineParts, config: &RingConfig) -> Result<Self, SetupError> {
        let worker_count = config.resolved_worker_count();
        let queue_count = parts.sinks.len();
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(config.max_inflight);
        // Unbounded so workers never block on the dispatcher while the
        // dispatcher blocks on a full job channel.
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<JobResult>();
        let (doorbell_tx, doorbell_rx) = crossbeam_channel::bounded::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let registry = Arc::clone(&parts.registry);
            let counters = Arc::clone(&parts.counters);
            let spawned = thread::Builder::new()
                .name(format!("hopring-worker-{i}"))
                .spawn(move || worker_loop(jobs, results, registry, counters, queue_count));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(job_tx);
                    join_all(workers);
                    return Err(SetupError::ThreadSpawnFailed {
                        reason: format!("program worker {i}: {e}"),
                    });
                }
            }
        }
        drop(job_rx);
        drop(result_tx);

        let dispatcher = Dispatcher {
            source: parts.source,
            router: Router::new(queue_count),
            sinks: parts.sinks,
            registry: parts.registry,
            metrics: parts.metrics,
            jobs: job_tx,
            results: result_rx,
            doorbell: doorbell_rx,
            shutdown: Arc::clone(&shutdown),
            sq_poll_idle: config.sq_poll.as_ref().map(|p| p.idle()),
            follow_ups: VecDeque::new(),
        };
        let dispatcher = thread::Builder::new()
            .name("hopring-dispatch".into())
            .spawn(move || dispatcher.run())
            .map_err(|e| SetupError::ThreadSpawnFailed {
                reason: format!("dispatcher: {e}"),
            });
        let dispatcher = match dispatcher {
            Ok(handle) => handle,
            Err(e) => {
                // The unspawned dispatcher closure owned the job sender;
                // dropping it released the workers.
                join_all(workers);
                return Err(e);
            }
        };

        tracing::info!(
            workers = worker_count,
            queues = queue_count,
            sq_poll = config.sq_poll.is_some(),
            "engine started"
        );
        Ok(Self {
            doorbell: Some(doorbell_tx),
            shutdown,
            dispatcher: Some(dispatcher),
            workers,
        })
    }

    /// Wake the dispatcher. Returns `false` if the engine has stopped.
    pub fn ring_doorbell(&self) -> bool {
        match &self.doorbell {
            Some(tx) => !matches!(tx.try_send(()), Err(TrySendError::Disconnected(_))),
            None => false,
        }
    }

    /// Stop the dispatcher and workers and join them.
    ///
    /// 1. Set the shutdown flag and drop the doorbell, which wakes a
    ///    blocked or idle dispatcher.
    /// 2. Join the dispatcher. Its exit drops the job sender.
    /// 3. Join the workers, whose job channel is now closed.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let start = Instant::now();
        self.shutdown.store(true, Ordering::Release);
        self.doorbell.take();

        let dispatcher_joined = match self.dispatcher.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        };
        let workers_joined = join_all(std::mem::take(&mut self.workers));

        ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            dispatcher_joined,
            workers_joined,
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.dispatcher.is_some() || !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) -> usize {
    handles.into_iter().filter_map(|h| h.join().ok()).count()
}
