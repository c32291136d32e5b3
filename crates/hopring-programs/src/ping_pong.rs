//! Ping-pong chaining program.
//!
//! Register the same `PingPong` in slots 0 and 1 and arm one submission
//! per slot, each targeting the queue of the same index. A completion
//! arriving on either queue wakes the program parked there, which:
//!
//! 1. increments `counters[idx]`, where `idx` is the submission's offset
//!    (slot and chain index at once),
//! 2. completes on its own queue with the hop number as result,
//! 3. while `token + 1 < max_hops`, sends a `Nop` carrying `token + 1` to
//!    queue `idx ^ 1`, waking its partner.
//!
//! The token is the trigger's user data, or the submission's own when the
//! program runs unarmed.

use hopring_core::{CounterKey, CqIndex, SubmissionEntry};
use hopring_program::{CompletionProgram, InvocationContext, ProgramOutcome};

/// Registered name of [`PingPong`].
pub const NAME: &str = "ping_pong";

/// Bounces a token between queues `idx` and `idx ^ 1`.
#[derive(Clone, Copy, Debug)]
pub struct PingPong {
    max_hops: u64,
}

impl PingPong {
    /// A chain that stops once the token reaches `max_hops - 1`.
    pub fn new(max_hops: u64) -> Self {
        Self { max_hops }
    }

    /// Hop bound.
    pub fn max_hops(&self) -> u64 {
        self.max_hops
    }
}

impl CompletionProgram for PingPong {
    fn name(&self) -> &str {
        NAME
    }

    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        let Ok(idx) = u32::try_from(ctx.submission().offset) else {
            return ProgramOutcome::invalid();
        };
        if ctx.counters().increment(CounterKey(idx)).is_err() {
            return ProgramOutcome::invalid();
        }

        let token = ctx
            .trigger()
            .map_or(ctx.submission().user_data, |t| t.user_data);
        let outcome = ProgramOutcome::complete(i32::try_from(token.0).unwrap_or(i32::MAX));

        let partner = CqIndex(idx ^ 1);
        if token.0.saturating_add(1) < self.max_hops && partner.as_usize() < ctx.queue_count() {
            outcome.then(SubmissionEntry::nop(token.next_hop()).with_target(partner))
        } else {
            outcome
        }
    }
}
