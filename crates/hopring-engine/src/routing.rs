//! Completion routing and armed-program parking.
//!
//! Every completion the engine produces passes through [`Router::route`]
//! before it reaches a queue. If an armed program is parked on the
//! destination queue, the completion is handed to that program as its
//! trigger instead of being appended. Parked programs on one queue wake
//! in the order they were parked.

use std::collections::VecDeque;

use hopring_core::{CompletionEntry, CqIndex, SubmissionEntry};

/// Where a routed completion ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Append `entry` to queue `cq`.
    Post {
        cq: CqIndex,
        entry: CompletionEntry,
    },
    /// Consume `trigger` by waking the parked `program`.
    Wake {
        program: SubmissionEntry,
        trigger: CompletionEntry,
    },
}

#[derive(Debug)]
pub(crate) struct Router {
    parked: Vec<VecDeque<SubmissionEntry>>,
}

impl Router {
    pub fn new(queue_count: usize) -> Self {
        Self {
            parked: (0..queue_count).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Park an armed program on its target queue.
    ///
    /// The caller has already checked that the target queue exists.
    pub fn park(&mut self, program: SubmissionEntry) {
        if let Some(waiters) = self.parked.get_mut(program.target_cq.as_usize()) {
            waiters.push_back(program);
        }
    }

    /// Decide where `entry`, bound for `cq`, goes.
    pub fn route(&mut self, cq: CqIndex, entry: CompletionEntry) -> Delivery {
        match self
            .parked
            .get_mut(cq.as_usize())
            .and_then(VecDeque::pop_front)
        {
            Some(program) => Delivery::Wake {
                program,
                trigger: entry,
            },
            None => Delivery::Post { cq, entry },
        }
    }

    /// Programs parked across all queues.
    pub fn parked_count(&self) -> usize {
        self.parked.iter().map(VecDeque::len).sum()
    }
}
