//! Frame flags for the Parlance protocol.
//!
//! Flags mark optional per-frame properties. They are carried in a 16-bit
//! little-endian field; only the low four bits are assigned.

use bitflags::bitflags;

bitflags! {
    /// Frame feature flags (16 bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u16 {
        /// Payload is encrypted (advisory; no cipher is specified)
        const ENCRYPTED = 0x0001;

        /// Payload is compressed
        const COMPRESSED = 0x0002;

        /// High priority delivery
        const URGENT = 0x0004;

        /// Delivery confirmation requested
        const RELIABLE = 0x0008;
    }
}

impl FrameFlags {
    /// Create flags from the raw wire value.
    ///
    /// Infallible: all 65536 values are valid. Bits outside the assigned
    /// set are preserved through a round-trip but never checked, so future
    /// protocol revisions can assign them without breaking old peers.
    #[must_use]
    pub const fn from_wire(value: u16) -> Self {
        Self::from_bits_retain(value)
    }

    /// Convert to the raw wire value, including any unknown bits
    #[must_use]
    pub const fn to_wire(self) -> u16 {
        self.bits()
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}
