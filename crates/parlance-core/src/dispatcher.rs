//! Message admission: which frame types are legal in which states.
//!
//! The dispatcher sits between the codec and the session logic. Its only
//! job is to decide whether a structurally valid frame is *semantically*
//! admissible right now; the session then acts on admitted frames. An
//! inadmissible frame is a protocol violation and drives the session to
//! its error state.

use parlance_proto::MsgType;

use crate::error::SessionError;
use crate::session::SessionState;

/// Check whether `msg_type` is admissible in `state`.
///
/// The matrix:
///
/// | Type | Legal states |
/// |---|---|
/// | HANDSHAKE | `init` (peer opening), `handshake` (peer replying) |
/// | AUTH | `handshake`, `auth` |
/// | COMMAND | `ready` |
/// | RESPONSE | `auth` (auth verdict), `ready` |
/// | ERROR | any non-final state |
/// | HEARTBEAT | `auth`, `ready` |
///
/// # Errors
///
/// [`SessionError::ProtocolViolation`] naming the state and type.
pub fn admit(state: SessionState, msg_type: MsgType) -> Result<(), SessionError> {
    use SessionState::{Auth, Handshake, Init, Ready};

    let legal = match msg_type {
        MsgType::Handshake => matches!(state, Init | Handshake),
        MsgType::Auth => matches!(state, Handshake | Auth),
        MsgType::Command => matches!(state, Ready),
        MsgType::Response => matches!(state, Auth | Ready),
        MsgType::Error => !state.is_final() && state != SessionState::Error,
        MsgType::Heartbeat => matches!(state, Auth | Ready),
    };

    if legal { Ok(()) } else { Err(SessionError::ProtocolViolation { state, msg_type }) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_admission() {
        assert!(admit(SessionState::Init, MsgType::Handshake).is_ok());
        assert!(admit(SessionState::Handshake, MsgType::Handshake).is_ok());
        assert!(admit(SessionState::Ready, MsgType::Handshake).is_err());
    }

    #[test]
    fn auth_outside_handshake_is_violation() {
        assert!(admit(SessionState::Handshake, MsgType::Auth).is_ok());
        assert!(admit(SessionState::Auth, MsgType::Auth).is_ok());
        assert!(admit(SessionState::Init, MsgType::Auth).is_err());
        assert!(admit(SessionState::Ready, MsgType::Auth).is_err());
    }

    #[test]
    fn commands_only_when_ready() {
        assert!(admit(SessionState::Ready, MsgType::Command).is_ok());
        for state in [
            SessionState::Init,
            SessionState::Handshake,
            SessionState::Auth,
            SessionState::Error,
            SessionState::Closed,
        ] {
            assert!(admit(state, MsgType::Command).is_err(), "{state} should reject COMMAND");
        }
    }

    #[test]
    fn response_legal_during_auth_and_ready() {
        assert!(admit(SessionState::Auth, MsgType::Response).is_ok());
        assert!(admit(SessionState::Ready, MsgType::Response).is_ok());
        assert!(admit(SessionState::Init, MsgType::Response).is_err());
    }

    #[test]
    fn error_frames_admitted_while_live() {
        assert!(admit(SessionState::Init, MsgType::Error).is_ok());
        assert!(admit(SessionState::Ready, MsgType::Error).is_ok());
        assert!(admit(SessionState::Closed, MsgType::Error).is_err());
        assert!(admit(SessionState::Error, MsgType::Error).is_err());
    }

    #[test]
    fn nothing_admitted_when_closed() {
        for msg_type in [
            MsgType::Handshake,
            MsgType::Auth,
            MsgType::Command,
            MsgType::Response,
            MsgType::Error,
            MsgType::Heartbeat,
        ] {
            assert!(admit(SessionState::Closed, msg_type).is_err());
        }
    }
}
