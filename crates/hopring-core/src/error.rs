//! Error types for the hopring protocol.
//!
//! [`RingError`] is the single error surfaced by ring operations. Its
//! variants split into transient conditions the caller handles locally
//! (`RingFull`, `QueueEmpty`, `Timeout`) and fatal ones that mean the
//! protocol instance is misconfigured (`Setup`, `StateViolation`).

use std::error::Error;
use std::fmt;

use crate::id::{CounterKey, CqIndex, ProgramSlot};

/// Lifecycle of a ring set. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleState {
    /// No rings exist yet.
    Uninitialized,
    /// The SQ, CQs and counting table exist; no programs registered.
    RingsCreated,
    /// At least one registration call has completed.
    ProgramsRegistered,
    /// The execution engine is running and accepts submissions.
    Active,
    /// All ring memory has been released.
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::RingsCreated => "rings-created",
            Self::ProgramsRegistered => "programs-registered",
            Self::Active => "active",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Failures while creating rings or registering programs.
///
/// Always fatal: the caller must not proceed to submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetupError {
    /// The ring configuration failed validation.
    InvalidConfig {
        /// Description of the violated constraint.
        reason: String,
    },
    /// Ring memory could not be created.
    RingCreation {
        /// Description of the failure.
        reason: String,
    },
    /// A program name could not be resolved in the supplied library.
    UnresolvedProgram {
        /// The name that failed to resolve.
        name: String,
    },
    /// A program could not be loaded into a library.
    ProgramLoad {
        /// Description of the failure.
        reason: String,
    },
    /// The registry has no free slots.
    RegistryFull {
        /// Maximum number of programs the registry accepts.
        capacity: usize,
    },
    /// A background thread could not be spawned.
    ThreadSpawnFailed {
        /// Which thread failed.
        reason: String,
    },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid ring config: {reason}"),
            Self::RingCreation { reason } => write!(f, "ring creation failed: {reason}"),
            Self::UnresolvedProgram { name } => {
                write!(f, "program '{name}' could not be resolved")
            }
            Self::ProgramLoad { reason } => write!(f, "program load failed: {reason}"),
            Self::RegistryFull { capacity } => {
                write!(f, "program registry is full ({capacity} slots)")
            }
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
        }
    }
}

impl Error for SetupError {}

/// Errors returned by ring operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RingError {
    /// The ring has no free slot. Non-fatal: retry or accept the drop,
    /// which has already been counted.
    RingFull,
    /// The queue holds no entries. Non-fatal.
    QueueEmpty,
    /// A blocking wait reached its deadline with nothing to return.
    Timeout,
    /// A submission referenced a slot with no registered program.
    InvalidSlot {
        /// The referenced slot.
        slot: ProgramSlot,
        /// Number of programs registered.
        registered: usize,
    },
    /// A completion queue index is out of range.
    InvalidQueue {
        /// The referenced queue.
        index: CqIndex,
        /// Number of completion queues in the set.
        count: usize,
    },
    /// A counting-table key is out of range.
    InvalidCounterKey {
        /// The referenced key.
        key: CounterKey,
        /// Number of counters in the table.
        len: usize,
    },
    /// Ring creation or program registration failed.
    Setup(SetupError),
    /// An operation was attempted out of lifecycle order.
    StateViolation {
        /// The attempted operation.
        operation: &'static str,
        /// The state the ring set was in.
        state: LifecycleState,
    },
}

impl RingError {
    /// Whether the caller may retry or ignore this error locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RingFull | Self::QueueEmpty | Self::Timeout)
    }

    /// Whether this error must abort the operation sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::StateViolation { .. })
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingFull => write!(f, "ring is full"),
            Self::QueueEmpty => write!(f, "queue is empty"),
            Self::Timeout => write!(f, "timed out waiting for a completion"),
            Self::InvalidSlot { slot, registered } => write!(
                f,
                "program slot {slot} is not registered ({registered} programs)"
            ),
            Self::InvalidQueue { index, count } => {
                write!(f, "completion queue {index} out of range ({count} queues)")
            }
            Self::InvalidCounterKey { key, len } => {
                write!(f, "counter key {key} out of range ({len} counters)")
            }
            Self::Setup(e) => write!(f, "setup: {e}"),
            Self::StateViolation { operation, state } => {
                write!(f, "'{operation}' is not valid in state {state}")
            }
        }
    }
}

impl Error for RingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Setup(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SetupError> for RingError {
    fn from(e: SetupError) -> Self {
        Self::Setup(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_fatal_are_disjoint() {
        let all = [
            RingError::RingFull,
            RingError::QueueEmpty,
            RingError::Timeout,
            RingError::InvalidSlot {
                slot: ProgramSlot(1),
                registered: 0,
            },
            RingError::InvalidQueue {
                index: CqIndex(4),
                count: 2,
            },
            RingError::Setup(SetupError::RegistryFull { capacity: 4 }),
            RingError::StateViolation {
                operation: "submit",
                state: LifecycleState::RingsCreated,
            },
        ];
        for e in &all {
            assert!(!(e.is_transient() && e.is_fatal()), "{e}");
        }
        assert!(RingError::Timeout.is_transient());
        assert!(all[6].is_fatal());
    }

    #[test]
    fn setup_error_is_source() {
        let e = RingError::from(SetupError::UnresolvedProgram {
            name: "echo".into(),
        });
        assert!(e.source().is_some());
        assert_eq!(e.to_string(), "setup: program 'echo' could not be resolved");
    }

    #[test]
    fn state_violation_names_operation_and_state() {
        let e = RingError::StateViolation {
            operation: "register_program",
            state: LifecycleState::Uninitialized,
        };
        assert_eq!(
            e.to_string(),
            "'register_program' is not valid in state uninitialized"
        );
    }

    #[test]
    fn lifecycle_states_are_ordered() {
        assert!(LifecycleState::Uninitialized < LifecycleState::RingsCreated);
        assert!(LifecycleState::ProgramsRegistered < LifecycleState::Active);
        assert!(LifecycleState::Active < LifecycleState::Destroyed);
    }
}
