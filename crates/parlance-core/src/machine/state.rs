//! State nodes with tamper-evident self-checksums.

use std::fmt;
use std::sync::Arc;

/// Maximum state or transition name length in bytes, excluding any
/// terminator. Names longer than this are rejected at registration.
pub const MAX_NAME_LENGTH: usize = 31;

/// Opaque callable invoked at a documented point of a transition.
///
/// Used for state entry/exit hooks and transition actions. The hook
/// receives the machine's user context; it must not assume it can observe
/// or mutate the machine itself.
pub type Hook<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

/// Guard predicate deciding whether a transition may fire, given its
/// source and target states.
pub type Guard<C> = Arc<dyn Fn(&State<C>, &State<C>) -> bool + Send + Sync>;

/// A named node in the state machine.
///
/// Every mutation (locking, restoration, being entered by a transition)
/// refreshes the timestamp, bumps the version and recomputes the
/// self-checksum, so silent out-of-band edits are detectable by
/// [`StateMachine::verify_state_integrity`](super::StateMachine::verify_state_integrity).
pub struct State<C> {
    pub(crate) name: String,
    pub(crate) on_enter: Option<Hook<C>>,
    pub(crate) on_exit: Option<Hook<C>>,
    pub(crate) is_final: bool,
    pub(crate) id: usize,
    pub(crate) checksum: u32,
    pub(crate) timestamp: u64,
    pub(crate) version: u32,
    pub(crate) is_locked: bool,
}

impl<C> State<C> {
    /// State name, unique within the owning machine
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable numeric id, equal to the insertion index
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether this state terminates the machine (no outgoing edges)
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Whether transitions touching this state are currently blocked
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    /// Mutation counter, starting at 1 when the state is registered
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Unix timestamp of the last mutation
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Stored self-checksum
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Compute the state's digest over every field except `checksum`.
    ///
    /// Fields are serialized explicitly in declaration order with
    /// fixed-width little-endian encoding and folded with a rotate-left-8
    /// add. Hooks contribute their presence (closures have no stable byte
    /// representation to hash), which still detects a hook being attached
    /// or detached out of band.
    #[must_use]
    pub(crate) fn digest(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let mut d = fold(0, &(self.name.len() as u32).to_le_bytes());
        d = fold(d, self.name.as_bytes());
        d = fold(d, &[u8::from(self.on_enter.is_some())]);
        d = fold(d, &[u8::from(self.on_exit.is_some())]);
        d = fold(d, &[u8::from(self.is_final)]);
        #[allow(clippy::cast_possible_truncation)]
        let id_bytes = (self.id as u32).to_le_bytes();
        d = fold(d, &id_bytes);
        d = fold(d, &self.timestamp.to_le_bytes());
        d = fold(d, &self.version.to_le_bytes());
        fold(d, &[u8::from(self.is_locked)])
    }

    /// Refresh the timestamp, bump the version and re-seal the checksum.
    /// Called after every engine mutation of this state.
    pub(crate) fn touch(&mut self, now: u64) {
        self.timestamp = now;
        self.version = self.version.wrapping_add(1);
        self.checksum = self.digest();
    }
}

#[inline]
fn fold(mut digest: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        digest = digest.rotate_left(8).wrapping_add(u32::from(b));
    }
    digest
}

// Manual Clone: hooks are shared via Arc, everything else is a deep copy.
impl<C> Clone for State<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            on_enter: self.on_enter.clone(),
            on_exit: self.on_exit.clone(),
            is_final: self.is_final,
            id: self.id,
            checksum: self.checksum,
            timestamp: self.timestamp,
            version: self.version,
            is_locked: self.is_locked,
        }
    }
}

// Manual Debug: hooks are not Debug.
impl<C> fmt::Debug for State<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("is_final", &self.is_final)
            .field("is_locked", &self.is_locked)
            .field("version", &self.version)
            .field("timestamp", &self.timestamp)
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .field("on_enter", &self.on_enter.as_ref().map(|_| "…"))
            .field("on_exit", &self.on_exit.as_ref().map(|_| "…"))
            .finish()
    }
}
