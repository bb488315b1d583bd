//! Error types for the protocol session layer.
//!
//! Codec errors ([`parlance_proto::ProtocolError`]) and engine errors
//! ([`MachineError`](crate::machine::MachineError)) are returned by their
//! own layers; `SessionError` is the session-level taxonomy that wraps
//! both and adds the connection-lifecycle failures. We avoid
//! `std::io::Error` for protocol logic and only convert at the driver
//! boundary.

use std::{fmt, io, time::Duration};

use parlance_proto::{MsgType, ProtocolError};

use crate::machine::MachineError;
use crate::session::SessionState;

/// Errors that can occur during session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation is not legal in the current session state
    InvalidState {
        /// State when the error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Received a message type that is not legal for the current state
    ProtocolViolation {
        /// State when the frame arrived
        state: SessionState,
        /// Message type of the offending frame
        msg_type: MsgType,
    },

    /// Frame-level failure (framing, version, checksum, handshake payload)
    Protocol(ProtocolError),

    /// State machine refused a transition
    Machine(MachineError),

    /// The peer answered a request with an ERROR frame
    Rejected {
        /// Message carried by the peer's ERROR payload
        message: String,
    },

    /// A pending reply did not arrive in time
    Timeout {
        /// Sequence number of the abandoned request
        sequence: u32,
        /// How long the waiter was prepared to wait
        waited: Duration,
    },

    /// The connection closed while requests were outstanding
    ConnectionClosed,

    /// Underlying transport error
    Transport(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { state, operation } => {
                write!(f, "invalid state: cannot {operation} from {state}")
            }
            Self::ProtocolViolation { state, msg_type } => {
                write!(f, "protocol violation: {msg_type:?} frame is not legal in state {state}")
            }
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Machine(err) => write!(f, "state machine error: {err}"),
            Self::Rejected { message } => write!(f, "rejected by peer: {message}"),
            Self::Timeout { sequence, waited } => {
                write!(f, "request {sequence} timed out after {waited:?}")
            }
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Machine(err) => Some(err),
            _ => None,
        }
    }
}

impl SessionError {
    /// Returns true if this error is transient and the operation may
    /// succeed after a reconnect or retry.
    ///
    /// Protocol violations and malformed frames are never transient: they
    /// indicate a broken or hostile peer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout { .. }
                | SessionError::ConnectionClosed
                | SessionError::Transport(_)
        )
    }
}

/// Convert session errors to io::Error at async I/O boundaries.
impl From<SessionError> for io::Error {
    fn from(err: SessionError) -> Self {
        let kind = match &err {
            SessionError::Timeout { .. } => io::ErrorKind::TimedOut,
            SessionError::ConnectionClosed => io::ErrorKind::ConnectionReset,
            SessionError::Transport(_) => io::ErrorKind::Other,
            SessionError::Rejected { .. } => io::ErrorKind::PermissionDenied,
            SessionError::InvalidState { .. }
            | SessionError::ProtocolViolation { .. }
            | SessionError::Protocol(_)
            | SessionError::Machine(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err.to_string())
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        SessionError::Protocol(err)
    }
}

impl From<MachineError> for SessionError {
    fn from(err: MachineError) -> Self {
        SessionError::Machine(err)
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_disconnects_are_transient() {
        assert!(
            SessionError::Timeout { sequence: 7, waited: Duration::from_secs(5) }.is_transient()
        );
        assert!(SessionError::ConnectionClosed.is_transient());
        assert!(SessionError::Transport("reset by peer".to_string()).is_transient());
    }

    #[test]
    fn protocol_failures_are_fatal() {
        assert!(
            !SessionError::ProtocolViolation {
                state: SessionState::Init,
                msg_type: MsgType::Command,
            }
            .is_transient()
        );
        assert!(!SessionError::Protocol(ProtocolError::UnsupportedVersion(2)).is_transient());
        assert!(
            !SessionError::InvalidState { state: SessionState::Ready, operation: "handshake" }
                .is_transient()
        );
    }

    #[test]
    fn io_conversion_maps_kinds() {
        let io_err: io::Error =
            SessionError::Timeout { sequence: 1, waited: Duration::from_secs(5) }.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);

        let io_err: io::Error = SessionError::Protocol(ProtocolError::InvalidMagic).into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }
}
