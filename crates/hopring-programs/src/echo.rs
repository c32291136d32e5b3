//! Counting echo program.
//!
//! Each invocation increments the counter keyed by the submission's
//! offset (the program slot for ordinary program submissions) and
//! completes with the new count. Out-of-range keys complete with
//! `-EINVAL` and leave the table untouched.

use hopring_core::CounterKey;
use hopring_program::{CompletionProgram, InvocationContext, ProgramOutcome};

/// Registered name of [`EchoCounter`].
pub const NAME: &str = "echo_counter";

/// Counts invocations per key.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoCounter;

impl CompletionProgram for EchoCounter {
    fn name(&self) -> &str {
        NAME
    }

    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        let Ok(key) = u32::try_from(ctx.submission().offset) else {
            return ProgramOutcome::invalid();
        };
        match ctx.counters().increment(CounterKey(key)) {
            Ok(count) => ProgramOutcome::complete(i32::try_from(count).unwrap_or(i32::MAX)),
            Err(_) => ProgramOutcome::invalid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopring_core::{CountingTable, ProgramSlot, SubmissionEntry, UserData};

    fn run(table: &CountingTable, sqe: &SubmissionEntry) -> ProgramOutcome {
        let mut ctx = InvocationContext::new(sqe, None, table, sqe.program_slot(), 1);
        EchoCounter.invoke(&mut ctx)
    }

    #[test]
    fn counts_by_offset() {
        let table = CountingTable::new(10);
        let sqe = SubmissionEntry::program(ProgramSlot(3), UserData(0));
        assert_eq!(run(&table, &sqe).result, 1);
        assert_eq!(run(&table, &sqe).result, 2);
        assert_eq!(table.get(CounterKey(3)), Ok(2));
        assert_eq!(table.total(), 2);
    }

    #[test]
    fn out_of_range_key_is_einval() {
        let table = CountingTable::new(2);
        let sqe = SubmissionEntry::program(ProgramSlot(5), UserData(0));
        assert_eq!(run(&table, &sqe).result, -22);
        assert_eq!(table.total(), 0);

        let huge = SubmissionEntry {
            offset: u64::MAX,
            ..sqe
        };
        assert_eq!(run(&table, &huge).result, -22);
    }
}
