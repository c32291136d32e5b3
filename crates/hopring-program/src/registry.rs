//! Program library and slot registry.
//!
//! [`ProgramLibrary`] is the loaded-object side: programs keyed by name,
//! in load order. [`ProgramRegistry`] is the ring side: an integer-indexed
//! table filled at registration time and read-only afterwards.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use hopring_core::{
    CompletionEntry, CountingTable, ProgramSlot, RingError, SetupError, SubmissionEntry,
};

use crate::context::{Emitted, InvocationContext};
use crate::program::{CompletionProgram, ProgramOutcome};

/// Shared handle to a program.
pub type ProgramHandle = Arc<dyn CompletionProgram>;

/// Named programs available for registration.
#[derive(Default)]
pub struct ProgramLibrary {
    programs: IndexMap<String, ProgramHandle>,
}

impl ProgramLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `program` under its own name.
    ///
    /// Fails with [`SetupError::ProgramLoad`] if the name is taken.
    pub fn load<P: CompletionProgram>(&mut self, program: P) -> Result<(), SetupError> {
        let name = program.name().to_string();
        self.load_as(name, Arc::new(program))
    }

    /// Add `handle` under `name`.
    pub fn load_as(&mut self, name: impl Into<String>, handle: ProgramHandle) -> Result<(), SetupError> {
        let name = name.into();
        if self.programs.contains_key(&name) {
            return Err(SetupError::ProgramLoad {
                reason: format!("duplicate program name '{name}'"),
            });
        }
        self.programs.insert(name, handle);
        Ok(())
    }

    /// Look up `name`.
    pub fn resolve(&self, name: &str) -> Result<ProgramHandle, SetupError> {
        self.programs
            .get(name)
            .cloned()
            .ok_or_else(|| SetupError::UnresolvedProgram {
                name: name.to_string(),
            })
    }

    /// Program names in load order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    /// Number of programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl fmt::Debug for ProgramLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.programs.keys()).finish()
    }
}

/// Result of one [`ProgramRegistry::invoke`] call.
#[derive(Debug)]
pub struct Invocation {
    /// The program's own outcome.
    pub outcome: ProgramOutcome,
    /// Extra completions the program emitted.
    pub emitted: Emitted,
}

/// Slot-indexed table of registered programs.
pub struct ProgramRegistry {
    programs: Vec<ProgramHandle>,
    capacity: usize,
}

impl ProgramRegistry {
    /// An empty registry accepting at most `capacity` programs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            programs: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append `program`, returning its slot.
    pub fn register(&mut self, program: ProgramHandle) -> Result<ProgramSlot, SetupError> {
        if self.programs.len() >= self.capacity {
            return Err(SetupError::RegistryFull {
                capacity: self.capacity,
            });
        }
        let slot = ProgramSlot(self.programs.len() as u32);
        self.programs.push(program);
        Ok(slot)
    }

    /// Resolve every name in `names` from `library`, then register them
    /// in order.
    ///
    /// All-or-nothing: an unknown name or insufficient capacity leaves the
    /// registry unchanged. A name may appear more than once; each
    /// occurrence takes its own slot.
    pub fn register_from(
        &mut self,
        library: &ProgramLibrary,
        names: &[&str],
    ) -> Result<Vec<ProgramSlot>, SetupError> {
        let handles = names
            .iter()
            .map(|name| library.resolve(name))
            .collect::<Result<Vec<_>, _>>()?;
        if self.programs.len() + handles.len() > self.capacity {
            return Err(SetupError::RegistryFull {
                capacity: self.capacity,
            });
        }
        handles.into_iter().map(|h| self.register(h)).collect()
    }

    /// The program at `slot`.
    pub fn get(&self, slot: ProgramSlot) -> Result<&ProgramHandle, RingError> {
        self.programs
            .get(slot.0 as usize)
            .ok_or(RingError::InvalidSlot {
                slot,
                registered: self.programs.len(),
            })
    }

    /// Run the program at `slot` for `submission`.
    pub fn invoke(
        &self,
        slot: ProgramSlot,
        submission: &SubmissionEntry,
        trigger: Option<&CompletionEntry>,
        counters: &CountingTable,
        queue_count: usize,
    ) -> Result<Invocation, RingError> {
        let program = self.get(slot)?;
        let mut ctx = InvocationContext::new(submission, trigger, counters, slot, queue_count);
        let outcome = program.invoke(&mut ctx);
        Ok(Invocation {
            outcome,
            emitted: ctx.into_emitted(),
        })
    }

    /// Number of registered programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Maximum number of programs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registered program names, by slot.
    pub fn names(&self) -> Vec<&str> {
        self.programs.iter().map(|p| p.name()).collect()
    }
}

impl fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.names())
            .field("capacity", &self.capacity)
            .finish()
    }
}
