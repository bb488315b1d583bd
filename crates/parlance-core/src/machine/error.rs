//! Error types for the state machine engine.

use thiserror::Error;

/// Errors returned by [`StateMachine`](super::StateMachine) operations.
///
/// Every failure is returned, never panicked; the machine is left in its
/// pre-call state for all error paths.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// A state name or id was rejected
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A transition was rejected (unknown name, duplicate, guard refusal,
    /// or the current state does not match the edge's source)
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// State capacity exhausted
    #[error("state capacity reached: at most {max} states")]
    MaxStatesReached {
        /// Configured state capacity
        max: usize,
    },

    /// Transition capacity exhausted
    #[error("transition capacity reached: at most {max} transitions")]
    MaxTransitionsReached {
        /// Configured transition capacity
        max: usize,
    },

    /// An endpoint of the requested transition is locked
    #[error("state '{state}' is locked")]
    StateLocked {
        /// Name of the locked state
        state: String,
    },

    /// Stored checksum or external predicate disagrees with the state
    #[error("integrity check failed for state '{state}'")]
    IntegrityCheckFailed {
        /// Name of the failing state
        state: String,
    },

    /// Snapshot is stale: the live state mutated since capture
    #[error("snapshot version mismatch: live version {live}, snapshot version {snapshot}")]
    VersionMismatch {
        /// Version of the live state
        live: u32,
        /// Version recorded in the snapshot
        snapshot: u32,
    },

    /// A hook panicked mid-transition; the machine was rolled back to the
    /// source state
    #[error("hook panicked during transition '{transition}'")]
    HookPanic {
        /// Name of the transition whose hook panicked
        transition: String,
    },
}

/// Convenient Result type alias for machine operations
pub type Result<T> = std::result::Result<T, MachineError>;
