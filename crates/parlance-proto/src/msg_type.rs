//! Message types for Parlance frames.
//!
//! The type byte selects how a frame is dispatched: lifecycle messages
//! (handshake, auth) drive the connection state machine, COMMAND/RESPONSE
//! carry the request/reply traffic, and HEARTBEAT is an advisory liveness
//! signal.

/// Frame message types.
///
/// Serialized as a single byte at offset 1 of the header. `#[repr(u8)]`
/// pins the numeric values for wire compatibility.
///
/// Unknown type bytes MUST be rejected at decode time with
/// [`ProtocolError::UnknownMsgType`](crate::ProtocolError::UnknownMsgType);
/// there is no default handling for unrecognized types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Connection opening (and its reply, see the session layer)
    Handshake = 0x01,
    /// Credential presentation
    Auth = 0x02,
    /// Application command, expects a correlated reply
    Command = 0x03,
    /// Successful reply, echoes the command's sequence number
    Response = 0x04,
    /// Failure reply, echoes the triggering sequence number
    Error = 0x05,
    /// Advisory keepalive, empty payload
    Heartbeat = 0x06,
}

impl MsgType {
    /// Convert to the raw wire byte
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from a raw wire byte.
    ///
    /// Total over all byte values; returns `None` for anything outside
    /// `0x01..=0x06` so callers reject unknown types explicitly.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Handshake),
            0x02 => Some(Self::Auth),
            0x03 => Some(Self::Command),
            0x04 => Some(Self::Response),
            0x05 => Some(Self::Error),
            0x06 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}
