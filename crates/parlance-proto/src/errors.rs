//! Error types for the Parlance wire format.
//!
//! All errors are structured and carry the expected/actual values needed to
//! diagnose a malformed peer without re-parsing the input.

use thiserror::Error;

/// Protocol-level errors that can occur during frame parsing and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input is shorter than the fixed header size
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unsupported protocol version in the header
    #[error("unsupported protocol version: expected 1, got {0}")]
    UnsupportedVersion(u8),

    /// Unknown message type byte
    #[error("unknown message type: {0:#04x}")]
    UnknownMsgType(u8),

    /// Declared payload length exceeds the maximum allowed size
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Header claims more payload bytes than are available
    #[error("frame truncated: header claims {expected} payload bytes, but only {actual} available")]
    FrameTruncated {
        /// Payload size declared in the header
        expected: usize,
        /// Bytes actually available after the header
        actual: usize,
    },

    /// Recomputed payload checksum does not match the header
    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header
        expected: u32,
        /// Checksum recomputed over the received payload
        actual: u32,
    },

    /// Handshake payload carries the wrong magic constant
    #[error("invalid handshake magic: expected 0x00504C43 (\"PLC\")")]
    InvalidMagic,

    /// Handshake payload has the wrong length
    #[error("invalid handshake payload: expected {expected} bytes, got {actual}")]
    InvalidHandshakePayload {
        /// Expected payload size
        expected: usize,
        /// Actual payload size
        actual: usize,
    },
}

/// Convenient Result type alias for wire-format operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
