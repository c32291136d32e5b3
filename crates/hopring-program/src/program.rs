//! The [`CompletionProgram`] trait and its [`ProgramOutcome`].

use hopring_core::{errno, CqIndex, CqeFlags, SubmissionEntry};

use crate::context::InvocationContext;

/// What one invocation produced.
///
/// The engine turns `result` and `flags` into exactly one completion for
/// the invoking submission, posted to `route` when set and valid, or to
/// the submission's target queue otherwise. A `follow_up` is queued
/// inside the engine as if the application had submitted it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgramOutcome {
    /// Result code of the program's own completion.
    pub result: i32,
    /// Extra completion flags. Only bits from
    /// [`CqeFlags::USER_SHIFT`] upward are meaningful to callers.
    pub flags: CqeFlags,
    /// Queue override for the program's own completion.
    pub route: Option<CqIndex>,
    /// Submission to run next, if the chain continues.
    pub follow_up: Option<SubmissionEntry>,
}

impl ProgramOutcome {
    /// Complete with `result`.
    pub fn complete(result: i32) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    /// Complete with `-errno`.
    pub fn error(errno: i32) -> Self {
        Self::complete(-errno)
    }

    /// Complete with `-EINVAL`.
    pub fn invalid() -> Self {
        Self::error(errno::EINVAL)
    }

    /// Add completion flags.
    pub fn with_flags(mut self, flags: CqeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Send the program's own completion to `cq`.
    pub fn route_to(mut self, cq: CqIndex) -> Self {
        self.route = Some(cq);
        self
    }

    /// Continue the chain with `next`.
    pub fn then(mut self, next: SubmissionEntry) -> Self {
        self.follow_up = Some(next);
        self
    }
}

/// Logic attached to a registry slot and run at completion time.
///
/// # Contract
///
/// - `&self`: programs are shared across worker threads. Mutable state
///   goes through the [`CountingTable`](hopring_core::CountingTable).
/// - Each invocation yields exactly one [`ProgramOutcome`].
/// - A panic is contained by the engine and reported as `-EIO`.
///
/// # Examples
///
/// ```
/// use hopring_program::{CompletionProgram, InvocationContext, ProgramOutcome};
///
/// struct Always(i32);
///
/// impl CompletionProgram for Always {
///     fn name(&self) -> &str { "always" }
///
///     fn invoke(&self, _ctx: &mut InvocationContext<'_>) -> ProgramOutcome {
///         ProgramOutcome::complete(self.0)
///     }
/// }
///
/// assert_eq!(Always(3).name(), "always");
/// ```
pub trait CompletionProgram: Send + Sync + 'static {
    /// Name used for resolution and logging.
    fn name(&self) -> &str;

    /// Run once for one submission.
    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> ProgramOutcome;
}
