//! Probe programs for engine tests.
//!
//! - [`CountingProbe`]: increments one fixed counter and returns the new value.
//! - [`PanickingProbe`]: panics on every invocation.
//! - [`SlowProbe`]: sleeps before completing.
//! - [`EmittingProbe`]: emits a copy of its completion to another queue.

use std::thread;
use std::time::Duration;

use hopring_core::{errno, CompletionEntry, CounterKey, CqIndex};
use hopring_program::{CompletionProgram, InvocationContext, ProgramOutcome};

/// Increments `key` on every invocation.
pub struct CountingProbe {
    pub key: CounterKey,
}

impl CountingProbe {
    pub fn new(key: u32) -> Self {
        Self {
            key: CounterKey(key),
        }
    }
}

impl CompletionProgram for CountingProbe {
    fn name(&self) -> &str {
        "counting_probe"
    }

    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        match ctx.counters().increment(self.key) {
            Ok(n) => ProgramOutcome::complete(i32::try_from(n).unwrap_or(i32::MAX)),
            Err(_) => ProgramOutcome::invalid(),
        }
    }
}

/// Panics with a fixed message.
pub struct PanickingProbe;

impl CompletionProgram for PanickingProbe {
    fn name(&self) -> &str {
        "panicking_probe"
    }

    fn invoke(&self, _ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        panic!("probe panic");
    }
}

/// Sleeps for `delay`, then completes with 0.
pub struct SlowProbe {
    pub delay: Duration,
}

impl SlowProbe {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl CompletionProgram for SlowProbe {
    fn name(&self) -> &str {
        "slow_probe"
    }

    fn invoke(&self, _ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        thread::sleep(self.delay);
        ProgramOutcome::complete(0)
    }
}

/// Emits `(user_data, 1)` to `to`, then completes with 0 on its own
/// target queue.
pub struct EmittingProbe {
    pub to: CqIndex,
}

impl CompletionProgram for EmittingProbe {
    fn name(&self) -> &str {
        "emitting_probe"
    }

    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        let ud = ctx.submission().user_data;
        match ctx.emit(self.to, CompletionEntry::new(ud, 1)) {
            Ok(()) => ProgramOutcome::complete(0),
            Err(_) => ProgramOutcome::error(errno::EINVAL),
        }
    }
}
