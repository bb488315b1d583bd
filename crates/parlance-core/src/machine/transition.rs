//! Directed, named edges between states.

use std::fmt;

use super::state::{Guard, Hook};

/// A directed, named edge in the state machine.
///
/// Endpoints are fixed at registration; name lookup resolves the edge at
/// execution time. The optional guard is consulted after lock checks and
/// may veto the transition; the optional action runs between the source's
/// exit hook and the target's entry hook.
pub struct Transition<C> {
    pub(crate) name: String,
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) action: Option<Hook<C>>,
    pub(crate) guard: Option<Guard<C>>,
    pub(crate) is_valid: bool,
}

impl<C> Transition<C> {
    /// Transition name, unique within the owning machine
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the source state
    #[must_use]
    pub fn from_state(&self) -> usize {
        self.from
    }

    /// Id of the target state
    #[must_use]
    pub fn to_state(&self) -> usize {
        self.to
    }

    /// Whether this edge may still fire. Cleared by
    /// [`StateMachine::invalidate_transition`](super::StateMachine::invalidate_transition).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }
}

impl<C> Clone for Transition<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            from: self.from,
            to: self.to,
            action: self.action.clone(),
            guard: self.guard.clone(),
            is_valid: self.is_valid,
        }
    }
}

impl<C> fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("is_valid", &self.is_valid)
            .field("action", &self.action.as_ref().map(|_| "…"))
            .field("guard", &self.guard.as_ref().map(|_| "…"))
            .finish()
    }
}
