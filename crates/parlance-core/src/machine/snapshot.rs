//! Point-in-time state capture and restore.

use super::state::State;

/// An immutable copy of a single state, captured for later restore.
///
/// A snapshot is only restorable while the live state's version still
/// equals the captured version; any mutation in between (a transition
/// entering the state, a lock, another restore) fences the snapshot off
/// with a `VersionMismatch`.
pub struct StateSnapshot<C> {
    pub(crate) state: State<C>,
    pub(crate) timestamp: u64,
    pub(crate) checksum: u32,
}

// Manual Clone/Debug: `State<C>` implements both without requiring
// anything of `C`, and the derives would add spurious bounds.
impl<C> Clone for StateSnapshot<C> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone(), timestamp: self.timestamp, checksum: self.checksum }
    }
}

impl<C> std::fmt::Debug for StateSnapshot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSnapshot")
            .field("state", &self.state)
            .field("timestamp", &self.timestamp)
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .finish()
    }
}

impl<C> StateSnapshot<C> {
    /// The captured state
    #[must_use]
    pub fn state(&self) -> &State<C> {
        &self.state
    }

    /// Unix timestamp at capture time
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Digest of the state at capture time
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}
