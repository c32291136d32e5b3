//! Setup/teardown state machine of a ring set.
//!
//! ```text
//! Uninitialized ─create_rings─▶ RingsCreated ─register─▶ ProgramsRegistered
//!                                                              │ activate
//!      any state except Destroyed ──destroy──▶ Destroyed ◀── Active
//! ```

use hopring_core::{LifecycleState, RingError};

/// States in which the rings exist and can be inspected.
pub(crate) const RINGS_EXIST: &[LifecycleState] = &[
    LifecycleState::RingsCreated,
    LifecycleState::ProgramsRegistered,
    LifecycleState::Active,
];

/// States that accept program registration.
pub(crate) const REGISTRATION_OPEN: &[LifecycleState] = &[
    LifecycleState::RingsCreated,
    LifecycleState::ProgramsRegistered,
];

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Fail with [`RingError::StateViolation`] unless the current state is
    /// in `allowed`.
    pub fn require(
        &self,
        operation: &'static str,
        allowed: &[LifecycleState],
    ) -> Result<(), RingError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RingError::StateViolation {
                operation,
                state: self.state,
            })
        }
    }

    /// Move to `next`. States never move backwards; re-entering the
    /// current state is a no-op.
    pub fn advance(&mut self, next: LifecycleState) {
        debug_assert!(next >= self.state, "lifecycle moved backwards");
        if next != self.state {
            tracing::info!(from = %self.state, to = %next, "ring lifecycle transition");
            self.state = next;
        }
    }
}
