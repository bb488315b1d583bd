//! Session configuration.

use std::time::Duration;

/// Per-connection protocol configuration.
///
/// The defaults match the protocol's documented parameters; drivers
/// typically tweak only the timeouts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hard cap on accepted and produced payload sizes, in bytes.
    /// May be lower than the wire-level maximum, never higher.
    pub max_message_size: usize,

    /// How long a sent COMMAND (or AUTH) waits for its correlated reply
    /// before the waiter is rejected with a timeout.
    pub response_timeout: Duration,

    /// Interval between advisory HEARTBEAT frames while ready.
    pub heartbeat_interval: Duration,

    /// Reserved configuration bits, carried for wire-compatible peers.
    pub flags: u32,

    /// Advisory capacity hint for drivers that preallocate buffers.
    pub memory_pool_size: usize,
}

impl SessionConfig {
    /// Default payload size cap (bytes)
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

    /// Default reply timeout
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default heartbeat interval
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: Self::DEFAULT_MAX_MESSAGE_SIZE,
            response_timeout: Self::DEFAULT_RESPONSE_TIMEOUT,
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            flags: 0,
            memory_pool_size: 0,
        }
    }
}
