//! Integrity-verified finite state machine engine.
//!
//! The engine is name-driven and generic: states and transitions are
//! registered at runtime, and callers request transitions by name. The
//! protocol layer wires a specific topology on top ([`crate::session`]),
//! but nothing here knows about frames or connections.
//!
//! # Integrity model
//!
//! Every state carries a self-checksum over all of its fields except the
//! checksum itself, recomputed by the engine after each sanctioned
//! mutation. [`StateMachine::verify_state_integrity`] re-derives the
//! digest and compares; a mismatch means the state was edited outside the
//! engine (memory corruption, a misbehaving hook) and is reported rather
//! than repaired. An optional external predicate can layer additional
//! checks on top.
//!
//! # Hook discipline
//!
//! A successful transition runs exactly `on_exit(from)`, then the edge
//! action, then `on_enter(to)`, in that order, never interleaved with
//! another transition on the same machine. A panicking hook aborts the
//! transition: the machine stays in the source state and the panic is
//! reported as [`MachineError::HookPanic`].

mod error;
mod snapshot;
mod state;
mod transition;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

pub use error::{MachineError, Result};
pub use snapshot::StateSnapshot;
pub use state::{Guard, Hook, MAX_NAME_LENGTH, State};
pub use transition::Transition;

/// Maximum number of states per machine
pub const MAX_STATES: usize = 32;

/// Maximum number of transitions per machine
pub const MAX_TRANSITIONS: usize = 64;

/// External integrity predicate, consulted by
/// [`StateMachine::verify_state_integrity`] after the checksum comparison.
pub type IntegrityCheck<C> = Arc<dyn Fn(&State<C>) -> bool + Send + Sync>;

/// Machine-level diagnostic counters. Monotonic for the life of the
/// machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Transitions rejected by lookup, validity, current-state, or guard
    /// checks, or aborted by a panicking hook
    pub failed_transitions: u32,
    /// Integrity verifications that found a mismatch
    pub integrity_violations: u32,
    /// Unix timestamp of the most recent integrity verification
    pub last_verification: u64,
}

/// Point-in-time diagnostic view of a single state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDiagnostics {
    /// State id
    pub state_id: usize,
    /// Unix timestamp of the last mutation
    pub last_modified: u64,
    /// Current mutation counter
    pub version: u32,
    /// Whether the state is locked
    pub is_locked: bool,
    /// Stored self-checksum
    pub checksum: u32,
}

/// Clock used for state timestamps, overridable for deterministic tests
type Clock = fn() -> u64;

fn system_clock() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Owning container for states and transitions.
///
/// `C` is the hook context: an application value handed mutably to entry,
/// exit and action hooks. The machine itself never reads it.
pub struct StateMachine<C> {
    states: Vec<State<C>>,
    transitions: Vec<Transition<C>>,
    current: usize,
    integrity_check: Option<IntegrityCheck<C>>,
    checksum: u32,
    diagnostics: Diagnostics,
    clock: Clock,
}

impl<C> Default for StateMachine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> StateMachine<C> {
    /// Create an empty machine. The current state id starts at 0 and
    /// becomes meaningful once the first state is added.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            transitions: Vec::new(),
            current: 0,
            integrity_check: None,
            checksum: 0,
            diagnostics: Diagnostics::default(),
            clock: system_clock,
        }
    }

    /// Create a machine with an external integrity predicate, consulted
    /// on every [`StateMachine::verify_state_integrity`] call.
    #[must_use]
    pub fn with_integrity_check(check: IntegrityCheck<C>) -> Self {
        Self { integrity_check: Some(check), ..Self::new() }
    }

    /// Replace the timestamp clock. Tests pin this to a fixed function to
    /// make digests reproducible.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Register a new state and return its id.
    ///
    /// Ids are assigned densely in insertion order, so the returned id
    /// always equals the number of previously registered states.
    ///
    /// # Errors
    ///
    /// - [`MachineError::MaxStatesReached`] at capacity
    /// - [`MachineError::InvalidState`] for an empty, oversized,
    ///   NUL-containing, or duplicate name
    pub fn add_state(
        &mut self,
        name: &str,
        on_enter: Option<Hook<C>>,
        on_exit: Option<Hook<C>>,
        is_final: bool,
    ) -> Result<usize> {
        if self.states.len() >= MAX_STATES {
            return Err(MachineError::MaxStatesReached { max: MAX_STATES });
        }
        Self::validate_name(name)?;
        if self.states.iter().any(|s| s.name == name) {
            return Err(MachineError::InvalidState(format!("duplicate state name '{name}'")));
        }

        let id = self.states.len();
        let mut state = State {
            name: name.to_string(),
            on_enter,
            on_exit,
            is_final,
            id,
            checksum: 0,
            timestamp: (self.clock)(),
            version: 1,
            is_locked: false,
        };
        state.checksum = state.digest();
        self.states.push(state);
        self.refresh_machine_checksum();

        debug!(state = name, id, is_final, "state registered");
        Ok(id)
    }

    /// Register a directed transition between two existing states.
    ///
    /// # Errors
    ///
    /// - [`MachineError::MaxTransitionsReached`] at capacity
    /// - [`MachineError::InvalidState`] if either endpoint id is out of
    ///   range
    /// - [`MachineError::InvalidTransition`] for a duplicate name or a
    ///   source state that is final
    pub fn add_transition(
        &mut self,
        name: &str,
        from: usize,
        to: usize,
        action: Option<Hook<C>>,
        guard: Option<Guard<C>>,
    ) -> Result<()> {
        if self.transitions.len() >= MAX_TRANSITIONS {
            return Err(MachineError::MaxTransitionsReached { max: MAX_TRANSITIONS });
        }
        Self::validate_name(name)?;
        if from >= self.states.len() || to >= self.states.len() {
            return Err(MachineError::InvalidState(format!(
                "transition '{name}' references state out of range ({from} -> {to})"
            )));
        }
        if self.states[from].is_final {
            return Err(MachineError::InvalidTransition(format!(
                "'{name}' leaves final state '{}'",
                self.states[from].name
            )));
        }
        if self.transitions.iter().any(|t| t.name == name) {
            return Err(MachineError::InvalidTransition(format!(
                "duplicate transition name '{name}'"
            )));
        }

        self.transitions.push(Transition { name: name.to_string(), from, to, action, guard, is_valid: true });

        debug!(transition = name, from, to, "transition registered");
        Ok(())
    }

    /// Execute a transition by name.
    ///
    /// Preconditions, checked in order: the transition exists and is
    /// valid; the machine's current state equals the edge's source
    /// (transitions are pre-committed edges, not requests to move
    /// anywhere); neither endpoint is locked; the guard, if any, accepts.
    ///
    /// On success the hooks run as `on_exit(from)`, action, `on_enter(to)`,
    /// then the current state moves to the target, whose timestamp,
    /// version and checksum are refreshed.
    ///
    /// # Errors
    ///
    /// - [`MachineError::InvalidTransition`] for lookup/validity/current
    ///   -state/guard failures (each increments `failed_transitions`)
    /// - [`MachineError::StateLocked`] if either endpoint is locked
    /// - [`MachineError::HookPanic`] if a hook panicked; the machine
    ///   remains in the source state
    pub fn execute_transition(&mut self, name: &str, ctx: &mut C) -> Result<()> {
        let Some(t) = self.transitions.iter().find(|t| t.name == name) else {
            self.diagnostics.failed_transitions += 1;
            return Err(MachineError::InvalidTransition(format!("unknown transition '{name}'")));
        };

        if !t.is_valid {
            self.diagnostics.failed_transitions += 1;
            return Err(MachineError::InvalidTransition(format!(
                "transition '{name}' has been invalidated"
            )));
        }

        let (from, to) = (t.from, t.to);
        let (action, guard) = (t.action.clone(), t.guard.clone());

        if self.current != from {
            self.diagnostics.failed_transitions += 1;
            return Err(MachineError::InvalidTransition(format!(
                "transition '{name}' departs from '{}' but machine is in '{}'",
                self.states[from].name, self.states[self.current].name
            )));
        }

        if self.states[from].is_locked {
            return Err(MachineError::StateLocked { state: self.states[from].name.clone() });
        }
        if self.states[to].is_locked {
            return Err(MachineError::StateLocked { state: self.states[to].name.clone() });
        }

        if let Some(guard) = guard {
            if !guard(&self.states[from], &self.states[to]) {
                self.diagnostics.failed_transitions += 1;
                return Err(MachineError::InvalidTransition(format!(
                    "guard rejected transition '{name}'"
                )));
            }
        }

        let on_exit = self.states[from].on_exit.clone();
        let on_enter = self.states[to].on_enter.clone();

        // Hooks run before any machine mutation, so a panic leaves the
        // machine in the source state with nothing to undo.
        let hooks = [on_exit, action, on_enter];
        for hook in hooks.into_iter().flatten() {
            if catch_unwind(AssertUnwindSafe(|| hook(ctx))).is_err() {
                self.diagnostics.failed_transitions += 1;
                warn!(transition = name, "hook panicked, transition aborted");
                return Err(MachineError::HookPanic { transition: name.to_string() });
            }
        }

        self.current = to;
        let now = (self.clock)();
        self.states[to].touch(now);
        self.refresh_machine_checksum();

        debug!(
            transition = name,
            from = %self.states[from].name,
            to = %self.states[to].name,
            "transition executed"
        );
        Ok(())
    }

    /// Execute the first-registered transition whose endpoints are
    /// `(from, to)`.
    ///
    /// Convenience wrapper over [`StateMachine::execute_transition`]; all
    /// of its preconditions apply unchanged.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidTransition`] if no edge connects the pair,
    /// plus anything the named execution can return.
    pub fn execute_transition_between(&mut self, from: usize, to: usize, ctx: &mut C) -> Result<()> {
        let Some(name) = self
            .transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.name.clone())
        else {
            self.diagnostics.failed_transitions += 1;
            return Err(MachineError::InvalidTransition(format!(
                "no transition from state {from} to state {to}"
            )));
        };
        self.execute_transition(&name, ctx)
    }

    /// Mark a transition as no longer executable.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidTransition`] for an unknown name.
    pub fn invalidate_transition(&mut self, name: &str) -> Result<()> {
        let Some(t) = self.transitions.iter_mut().find(|t| t.name == name) else {
            return Err(MachineError::InvalidTransition(format!("unknown transition '{name}'")));
        };
        t.is_valid = false;
        Ok(())
    }

    /// Verify a state's stored checksum and the external predicate, if
    /// one is registered.
    ///
    /// # Errors
    ///
    /// - [`MachineError::InvalidState`] if `id` is out of range
    /// - [`MachineError::IntegrityCheckFailed`] on any mismatch; the
    ///   `integrity_violations` counter increments and the machine state
    ///   is otherwise untouched (escalation is caller policy)
    pub fn verify_state_integrity(&mut self, id: usize) -> Result<()> {
        if id >= self.states.len() {
            return Err(MachineError::InvalidState(format!("state id {id} out of range")));
        }
        self.diagnostics.last_verification = (self.clock)();

        let state = &self.states[id];
        let name = state.name.clone();
        // Checksum first; the external predicate only sees states whose
        // stored digest still matches.
        let intact = state.digest() == state.checksum
            && self.integrity_check.as_ref().map_or(true, |check| check(state));

        if !intact {
            self.diagnostics.integrity_violations += 1;
            warn!(state = %name, "state integrity verification failed");
            return Err(MachineError::IntegrityCheckFailed { state: name });
        }

        Ok(())
    }

    /// Verify every state plus the machine-level checksum.
    ///
    /// # Errors
    ///
    /// The first per-state failure, or
    /// [`MachineError::IntegrityCheckFailed`] if the machine checksum
    /// itself disagrees.
    pub fn verify_integrity(&mut self) -> Result<()> {
        for id in 0..self.states.len() {
            self.verify_state_integrity(id)?;
        }
        if self.machine_digest() != self.checksum {
            self.diagnostics.integrity_violations += 1;
            return Err(MachineError::IntegrityCheckFailed { state: "<machine>".to_string() });
        }
        Ok(())
    }

    /// Lock a state, blocking transitions into and out of it.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidState`] if `id` is out of range.
    pub fn lock_state(&mut self, id: usize) -> Result<()> {
        self.set_locked(id, true)
    }

    /// Unlock a previously locked state.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidState`] if `id` is out of range.
    pub fn unlock_state(&mut self, id: usize) -> Result<()> {
        self.set_locked(id, false)
    }

    fn set_locked(&mut self, id: usize, locked: bool) -> Result<()> {
        let now = (self.clock)();
        let state = self
            .states
            .get_mut(id)
            .ok_or_else(|| MachineError::InvalidState(format!("state id {id} out of range")))?;
        state.is_locked = locked;
        state.touch(now);
        self.refresh_machine_checksum();
        Ok(())
    }

    /// Capture a deep copy of a state for later restore.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidState`] if `id` is out of range.
    pub fn create_state_snapshot(&self, id: usize) -> Result<StateSnapshot<C>> {
        let state = self
            .states
            .get(id)
            .ok_or_else(|| MachineError::InvalidState(format!("state id {id} out of range")))?;

        Ok(StateSnapshot {
            state: state.clone(),
            timestamp: (self.clock)(),
            checksum: state.digest(),
        })
    }

    /// Restore a state from a snapshot taken earlier.
    ///
    /// The restore is fenced: it only applies while the live state's
    /// version still equals the snapshot's, so any interleaved mutation
    /// invalidates the capture. On success the state is overwritten, its
    /// timestamp refreshed and its version bumped past the snapshot's.
    ///
    /// # Errors
    ///
    /// - [`MachineError::InvalidState`] if the snapshot's id is out of
    ///   range
    /// - [`MachineError::StateLocked`] if the live state is locked
    /// - [`MachineError::VersionMismatch`] if the live state mutated
    ///   since capture
    pub fn restore_state_from_snapshot(&mut self, snapshot: &StateSnapshot<C>) -> Result<()> {
        let id = snapshot.state.id;
        let now = (self.clock)();
        let Some(live) = self.states.get_mut(id) else {
            return Err(MachineError::InvalidState(format!("snapshot state id {id} out of range")));
        };

        if live.is_locked {
            return Err(MachineError::StateLocked { state: live.name.clone() });
        }
        if live.version != snapshot.state.version {
            return Err(MachineError::VersionMismatch {
                live: live.version,
                snapshot: snapshot.state.version,
            });
        }

        *live = snapshot.state.clone();
        live.touch(now);
        self.refresh_machine_checksum();
        Ok(())
    }

    /// Current mutation counter of a state.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidState`] if `id` is out of range.
    pub fn state_version(&self, id: usize) -> Result<u32> {
        self.states
            .get(id)
            .map(|s| s.version)
            .ok_or_else(|| MachineError::InvalidState(format!("state id {id} out of range")))
    }

    /// Diagnostic view of a single state.
    ///
    /// # Errors
    ///
    /// [`MachineError::InvalidState`] if `id` is out of range.
    pub fn state_diagnostics(&self, id: usize) -> Result<StateDiagnostics> {
        self.states
            .get(id)
            .map(|s| StateDiagnostics {
                state_id: s.id,
                last_modified: s.timestamp,
                version: s.version,
                is_locked: s.is_locked,
                checksum: s.checksum,
            })
            .ok_or_else(|| MachineError::InvalidState(format!("state id {id} out of range")))
    }

    /// Id of the current state
    #[must_use]
    pub fn current_state_id(&self) -> usize {
        self.current
    }

    /// The current state, or `None` before any state is registered
    #[must_use]
    pub fn current_state(&self) -> Option<&State<C>> {
        self.states.get(self.current)
    }

    /// Look up a state by id
    #[must_use]
    pub fn state(&self, id: usize) -> Option<&State<C>> {
        self.states.get(id)
    }

    /// Look up a state by name
    #[must_use]
    pub fn state_by_name(&self, name: &str) -> Option<&State<C>> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Look up a transition by name
    #[must_use]
    pub fn transition(&self, name: &str) -> Option<&Transition<C>> {
        self.transitions.iter().find(|t| t.name == name)
    }

    /// Number of registered states
    #[must_use]
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Number of registered transitions
    #[must_use]
    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Machine-level diagnostic counters
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Machine-level checksum folding every state's self-checksum
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    fn machine_digest(&self) -> u32 {
        self.states.iter().fold(0u32, |d, s| {
            s.checksum
                .to_le_bytes()
                .iter()
                .fold(d, |d, &b| d.rotate_left(8).wrapping_add(u32::from(b)))
        })
    }

    fn refresh_machine_checksum(&mut self) {
        self.checksum = self.machine_digest();
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(MachineError::InvalidState("empty name".to_string()));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(MachineError::InvalidState(format!(
                "name '{name}' exceeds {MAX_NAME_LENGTH} bytes"
            )));
        }
        if name.contains('\0') {
            return Err(MachineError::InvalidState("name contains NUL".to_string()));
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper_name(&mut self, id: usize, name: &str) {
        self.states[id].name = name.to_string();
    }
}

impl<C> fmt::Debug for StateMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.states)
            .field("transitions", &self.transitions)
            .field("current", &self.current)
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}
