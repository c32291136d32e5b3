//! Program that reroutes its completion to a fixed queue.

use hopring_core::CqIndex;
use hopring_program::{CompletionProgram, InvocationContext, ProgramOutcome};

/// Registered name of [`Redirect`].
pub const NAME: &str = "redirect";

/// Completes on `target` regardless of the submission's target queue.
///
/// When woken by a trigger, the trigger's result is passed through.
#[derive(Clone, Copy, Debug)]
pub struct Redirect {
    target: CqIndex,
}

impl Redirect {
    /// Redirect every completion to `target`.
    pub fn new(target: CqIndex) -> Self {
        Self { target }
    }

    /// The destination queue.
    pub fn target(&self) -> CqIndex {
        self.target
    }
}

impl CompletionProgram for Redirect {
    fn name(&self) -> &str {
        NAME
    }

    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
        let result = ctx.trigger().map_or(0, |t| t.result);
        ProgramOutcome::complete(result).route_to(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopring_core::{CompletionEntry, CountingTable, ProgramSlot, SubmissionEntry, UserData};

    #[test]
    fn routes_to_target_and_passes_trigger_result() {
        let table = CountingTable::new(0);
        let sqe = SubmissionEntry::program(ProgramSlot(0), UserData(1));
        let trigger = CompletionEntry::new(UserData(2), 17);
        let mut ctx = InvocationContext::new(&sqe, Some(&trigger), &table, ProgramSlot(0), 2);
        let out = Redirect::new(CqIndex(1)).invoke(&mut ctx);
        assert_eq!(out.route, Some(CqIndex(1)));
        assert_eq!(out.result, 17);
        assert_eq!(out.follow_up, None);
    }
}
