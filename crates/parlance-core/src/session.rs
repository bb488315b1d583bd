//! Per-connection protocol session.
//!
//! A [`Session`] couples one transport endpoint to one state machine
//! instance. It owns the sequence counter, the pending-response table and
//! the receive buffer, and it drives the connection-lifecycle FSM from
//! protocol events.
//!
//! # Architecture: action-based state machine
//!
//! The session performs no I/O and never reads a clock:
//! - Methods accept `now: Instant` as a parameter
//! - Methods return `Result<Vec<SessionAction>, SessionError>`
//! - Driver code executes the actions (write frames, resolve waiters,
//!   invoke application callbacks)
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────┐ begin_handshake ┌───────────┐ peer reply  ┌──────┐ auth ok ┌───────┐
//! │ init │────────────────>│ handshake │────────────>│ auth │────────>│ ready │
//! └──────┘                 └───────────┘             └──────┘         └───────┘
//!     │                         │                       │                │
//!     │      fatal decode / validation error            │                │
//!     └────────────┬────────────┴───────────────────────┴────────────────┤
//!                  ▼                                                     ▼
//!              ┌───────┐                disconnect                  ┌────────┐
//!              │ error │───────────────────────────────────────────>│ closed │
//!              └───────┘          (from any state)                  └────────┘
//! ```
//!
//! Every lifecycle move is a real FSM transition: the wired machine has an
//! edge to `error` and to `closed` from each non-final state, and the
//! session state always mirrors the machine's current state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parlance_proto::{
    Frame, FrameDecoder, FrameFlags, HandshakeHello, MsgType, ProtocolError, version_compatible,
};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::dispatcher;
use crate::error::SessionError;
use crate::machine::StateMachine;

/// Which side of the connection this session is.
///
/// The initiator opens the handshake, authenticates and sends heartbeats;
/// the responder answers. Message admission is otherwise symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client side: opens the handshake, owns the heartbeat timer
    Initiator,
    /// Server side: answers the handshake, rules on credentials
    Responder,
}

/// Protocol lifecycle states, mirroring the wired state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connection created, nothing sent yet
    Init,
    /// Handshake in flight
    Handshake,
    /// Handshake complete, credentials outstanding
    Auth,
    /// Authenticated, command traffic flows
    Ready,
    /// A fatal protocol failure occurred
    Error,
    /// Connection terminated (final)
    Closed,
}

impl SessionState {
    /// All states, in FSM registration order (index == state id)
    pub const ALL: [SessionState; 6] = [
        SessionState::Init,
        SessionState::Handshake,
        SessionState::Auth,
        SessionState::Ready,
        SessionState::Error,
        SessionState::Closed,
    ];

    /// FSM state id for this lifecycle state
    #[must_use]
    pub fn id(self) -> usize {
        match self {
            SessionState::Init => 0,
            SessionState::Handshake => 1,
            SessionState::Auth => 2,
            SessionState::Ready => 3,
            SessionState::Error => 4,
            SessionState::Closed => 5,
        }
    }

    /// FSM state name for this lifecycle state
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Handshake => "handshake",
            SessionState::Auth => "auth",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }

    /// Whether this state terminates the lifecycle
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, SessionState::Closed)
    }

    fn from_id(id: usize) -> SessionState {
        Self::ALL.get(id).copied().unwrap_or(SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actions returned by the session state machine.
///
/// The driver executes frame sends and surfaces the event variants to the
/// application; the session itself never calls back into user code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this frame to the transport
    SendFrame(Frame),

    /// The lifecycle moved between states
    StateChanged {
        /// State before the transition
        from: SessionState,
        /// State after the transition
        to: SessionState,
    },

    /// The handshake exchange completed; credentials may now be sent
    HandshakeEstablished,

    /// Responder: the peer presented credentials; rule on them with
    /// [`Session::accept_auth`] or [`Session::reject_auth`]
    AuthRequest(Bytes),

    /// Initiator: the peer accepted our credentials
    AuthAccepted,

    /// Initiator: the peer rejected our credentials
    AuthRejected {
        /// Reason given by the peer
        message: String,
    },

    /// A command arrived; answer it with [`Session::send_response`] or
    /// [`Session::send_error`], echoing the sequence number
    CommandReceived {
        /// Sequence number to echo in the reply
        sequence: u32,
        /// Opaque command payload
        payload: Bytes,
    },

    /// A RESPONSE frame arrived (emitted whether or not a waiter matched)
    ResponseReceived {
        /// Sequence number the peer echoed
        sequence: u32,
        /// Opaque response payload
        payload: Bytes,
    },

    /// A waiter registered for `sequence` got its reply
    PendingResolved {
        /// Sequence number of the resolved request
        sequence: u32,
        /// Reply payload
        payload: Bytes,
    },

    /// A waiter registered for `sequence` was rejected by a peer ERROR
    /// frame or by disconnect
    PendingRejected {
        /// Sequence number of the rejected request
        sequence: u32,
        /// Failure message
        message: String,
    },

    /// A waiter registered for `sequence` hit its deadline
    PendingTimedOut {
        /// Sequence number of the abandoned request
        sequence: u32,
    },

    /// An ERROR frame arrived
    ErrorReceived {
        /// Sequence number carried by the frame
        sequence: u32,
        /// Peer-supplied error message
        message: String,
    },

    /// An advisory HEARTBEAT arrived; peer liveness was refreshed
    HeartbeatReceived,

    /// The connection should be torn down
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Message attached to waiters rejected because the connection went away.
/// Drivers match on this to distinguish disconnect rejections from peer
/// ERROR frames.
pub const CONNECTION_CLOSED_MESSAGE: &str = "connection closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Command,
    Auth,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    deadline: Instant,
    kind: PendingKind,
}

/// Per-connection protocol context.
///
/// Owns the lifecycle FSM, the wrapping sequence counter (first assigned
/// sequence is 1), the pending-response table and the frame reassembly
/// buffer. One logical task owns a `Session`; nothing here is shared.
#[derive(Debug)]
pub struct Session {
    machine: StateMachine<()>,
    role: Role,
    config: SessionConfig,
    next_sequence: u32,
    pending: HashMap<u32, Pending>,
    decoder: FrameDecoder,
    peer_auth_sequence: Option<u32>,
    last_heartbeat: Option<Instant>,
    last_activity: Instant,
}

impl Session {
    /// Create a session in the `init` state.
    pub fn new(now: Instant, role: Role, config: SessionConfig) -> Self {
        Self {
            machine: wire_machine(),
            role,
            config,
            next_sequence: 1,
            pending: HashMap::new(),
            decoder: FrameDecoder::new(),
            peer_auth_sequence: None,
            last_heartbeat: None,
            last_activity: now,
        }
    }

    /// Current lifecycle state (mirrors the FSM)
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_id(self.machine.current_state_id())
    }

    /// Which side of the connection this session is
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read access to the underlying state machine (diagnostics,
    /// integrity verification)
    #[must_use]
    pub fn machine(&self) -> &StateMachine<()> {
        &self.machine
    }

    /// Mutable access to the underlying state machine, for integrity
    /// verification and state locking. Locks are honored by every
    /// lifecycle transition the session attempts.
    pub fn machine_mut(&mut self) -> &mut StateMachine<()> {
        &mut self.machine
    }

    /// True from handshake until a fatal error or close
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Handshake | SessionState::Auth | SessionState::Ready
        )
    }

    /// True once the peer accepted our credentials (or we theirs)
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Number of requests awaiting replies
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Instant of the last frame received from the peer
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Open the handshake: move `init → handshake` and emit the HANDSHAKE
    /// frame carrying the protocol magic.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside `init`, or a machine error
    /// if the wired transition is blocked (e.g. a locked state).
    pub fn begin_handshake(&mut self, now: Instant) -> Result<Vec<SessionAction>, SessionError> {
        if self.state() != SessionState::Init {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "begin_handshake",
            });
        }
        self.last_activity = now;

        let changed = self.transition_to(SessionState::Handshake)?;
        let frame = self.next_frame(
            MsgType::Handshake,
            FrameFlags::RELIABLE,
            Bytes::copy_from_slice(&HandshakeHello::new().encode()),
        );

        Ok(vec![changed, SessionAction::SendFrame(frame)])
    }

    /// Present credentials to the peer.
    ///
    /// Registers a pending entry for the AUTH sequence so the peer's
    /// RESPONSE (accept) or ERROR (reject) correlates back; acceptance
    /// moves the session to `ready`.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside `auth`, or
    /// [`ProtocolError::PayloadTooLarge`] via [`SessionError::Protocol`]
    /// for oversized credentials.
    pub fn authenticate(
        &mut self,
        credentials: impl Into<Bytes>,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state() != SessionState::Auth {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "authenticate",
            });
        }

        let credentials = credentials.into();
        self.check_payload_size(credentials.len())?;

        let frame = self.next_frame(
            MsgType::Auth,
            FrameFlags::ENCRYPTED | FrameFlags::RELIABLE,
            credentials,
        );
        self.pending.insert(
            frame.header.sequence(),
            Pending { deadline: now + self.config.response_timeout, kind: PendingKind::Auth },
        );

        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Responder: accept the credentials most recently surfaced by an
    /// [`SessionAction::AuthRequest`]. Moves to `ready` and answers the
    /// peer with a RESPONSE echoing the AUTH sequence.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside `auth` or when no AUTH
    /// frame is awaiting a ruling.
    pub fn accept_auth(&mut self, _now: Instant) -> Result<Vec<SessionAction>, SessionError> {
        if self.state() != SessionState::Auth {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "accept_auth",
            });
        }
        let Some(sequence) = self.peer_auth_sequence.take() else {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "accept_auth",
            });
        };

        let changed = self.transition_to(SessionState::Ready)?;
        let frame =
            Self::reply_frame(MsgType::Response, FrameFlags::RELIABLE, sequence, Bytes::new());

        Ok(vec![changed, SessionAction::SendFrame(frame)])
    }

    /// Responder: reject the pending credentials with an ERROR frame
    /// echoing the AUTH sequence. The session stays in `auth`; the peer
    /// may retry or disconnect.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] when no AUTH frame is awaiting a
    /// ruling.
    pub fn reject_auth(
        &mut self,
        message: &str,
        _now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let Some(sequence) = self.peer_auth_sequence.take() else {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "reject_auth",
            });
        };

        let frame = Self::reply_frame(
            MsgType::Error,
            FrameFlags::RELIABLE,
            sequence,
            Bytes::copy_from_slice(message.as_bytes()),
        );
        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Send a command and register a waiter for its reply.
    ///
    /// Returns the assigned sequence number so the driver can associate a
    /// completion handle with the eventual `PendingResolved`,
    /// `PendingRejected` or `PendingTimedOut` action.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside `ready`, or an oversized
    /// payload error.
    pub fn send_command(
        &mut self,
        payload: impl Into<Bytes>,
        now: Instant,
    ) -> Result<(u32, Vec<SessionAction>), SessionError> {
        if self.state() != SessionState::Ready {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "send_command",
            });
        }

        let payload = payload.into();
        self.check_payload_size(payload.len())?;

        let frame = self.next_frame(MsgType::Command, FrameFlags::RELIABLE, payload);
        let sequence = frame.header.sequence();
        self.pending.insert(
            sequence,
            Pending { deadline: now + self.config.response_timeout, kind: PendingKind::Command },
        );

        Ok((sequence, vec![SessionAction::SendFrame(frame)]))
    }

    /// Answer a received command with a RESPONSE frame reusing the
    /// command's sequence number.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside `ready`, or an oversized
    /// payload error.
    pub fn send_response(
        &mut self,
        sequence: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state() != SessionState::Ready {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "send_response",
            });
        }
        let payload = payload.into();
        self.check_payload_size(payload.len())?;

        let frame = Self::reply_frame(MsgType::Response, FrameFlags::empty(), sequence, payload);
        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Answer a received command with an ERROR frame reusing the
    /// command's sequence number.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside `ready`.
    pub fn send_error(
        &mut self,
        sequence: u32,
        message: &str,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state() != SessionState::Ready {
            return Err(SessionError::InvalidState {
                state: self.state(),
                operation: "send_error",
            });
        }

        let frame = Self::reply_frame(
            MsgType::Error,
            FrameFlags::empty(),
            sequence,
            Bytes::copy_from_slice(message.as_bytes()),
        );
        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Feed received transport bytes and dispatch every complete frame.
    ///
    /// Frames are processed in wire order. A framing, checksum or
    /// validation failure moves the session to `error` and surfaces the
    /// failure; remaining buffered bytes are not trusted after that.
    ///
    /// # Errors
    ///
    /// The first fatal decode or dispatch error encountered.
    pub fn handle_bytes(
        &mut self,
        data: &[u8],
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.decoder.feed(data);

        let mut actions = Vec::new();
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => actions.extend(self.handle_frame(&frame, now)?),
                Ok(None) => break,
                Err(err) => {
                    self.fail(&format!("frame decode failed: {err}"));
                    return Err(err.into());
                }
            }
        }
        Ok(actions)
    }

    /// Dispatch a single decoded frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::ProtocolViolation`] for a frame that is not legal
    /// in the current state, or a validation failure for handshake
    /// payloads; both move the session to `error` first.
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.last_activity = now;

        let Some(msg_type) = frame.header.msg_type() else {
            let raw = frame.header.msg_type_raw();
            self.fail(&format!("unknown message type {raw:#04x}"));
            return Err(ProtocolError::UnknownMsgType(raw).into());
        };

        if frame.payload.len() > self.config.max_message_size {
            self.fail("oversized payload");
            return Err(ProtocolError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_message_size,
            }
            .into());
        }

        if let Err(err) = dispatcher::admit(self.state(), msg_type) {
            self.fail(&format!("inadmissible {msg_type:?} frame in state {}", self.state()));
            return Err(err);
        }

        debug!(?msg_type, sequence = frame.header.sequence(), state = %self.state(), "frame dispatched");

        match msg_type {
            MsgType::Handshake => self.on_handshake_frame(frame),
            MsgType::Auth => {
                self.peer_auth_sequence = Some(frame.header.sequence());
                Ok(vec![SessionAction::AuthRequest(frame.payload.clone())])
            }
            MsgType::Command => Ok(vec![SessionAction::CommandReceived {
                sequence: frame.header.sequence(),
                payload: frame.payload.clone(),
            }]),
            MsgType::Response => Ok(self.on_response_frame(frame)),
            MsgType::Error => Ok(self.on_error_frame(frame)),
            MsgType::Heartbeat => Ok(vec![SessionAction::HeartbeatReceived]),
        }
    }

    /// Advance timers: expire pending waiters past their deadline, and
    /// emit a HEARTBEAT when the interval elapsed (initiator, `ready`).
    pub fn tick(&mut self, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        let mut expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(&seq, _)| seq)
            .collect();
        expired.sort_unstable();
        for sequence in expired {
            self.pending.remove(&sequence);
            warn!(sequence, "pending request timed out");
            actions.push(SessionAction::PendingTimedOut { sequence });
        }

        if self.role == Role::Initiator && self.state() == SessionState::Ready {
            let due = match self.last_heartbeat {
                None => true,
                Some(last) => now.duration_since(last) >= self.config.heartbeat_interval,
            };
            if due {
                let frame = self.next_frame(MsgType::Heartbeat, FrameFlags::empty(), Bytes::new());
                self.last_heartbeat = Some(now);
                actions.push(SessionAction::SendFrame(frame));
            }
        }

        actions
    }

    /// Tear the session down: move to `closed` (from any live state) and
    /// reject every outstanding waiter with "connection closed".
    pub fn disconnect(&mut self, reason: &str, _now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        let state = self.state();
        if !state.is_final() {
            if let Ok(changed) = self.transition_to(SessionState::Closed) {
                actions.push(changed);
            }
        }

        let mut orphaned: Vec<u32> = self.pending.keys().copied().collect();
        orphaned.sort_unstable();
        for sequence in orphaned {
            self.pending.remove(&sequence);
            actions.push(SessionAction::PendingRejected {
                sequence,
                message: CONNECTION_CLOSED_MESSAGE.to_string(),
            });
        }

        actions.push(SessionAction::Close { reason: reason.to_string() });
        actions
    }

    // Frame handlers

    fn on_handshake_frame(&mut self, frame: &Frame) -> Result<Vec<SessionAction>, SessionError> {
        if let Err(err) = HandshakeHello::decode(&frame.payload) {
            self.fail(&format!("handshake payload rejected: {err}"));
            return Err(err.into());
        }
        if !version_compatible(frame.header.version()) {
            let version = frame.header.version();
            self.fail(&format!("incompatible peer version {version}"));
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }

        match self.state() {
            // Responder: peer opened. Reply in kind, then both sides sit
            // at auth awaiting credentials.
            SessionState::Init => {
                let mut actions = vec![self.transition_to(SessionState::Handshake)?];
                let reply = self.next_frame(
                    MsgType::Handshake,
                    FrameFlags::RELIABLE,
                    Bytes::copy_from_slice(&HandshakeHello::new().encode()),
                );
                actions.push(SessionAction::SendFrame(reply));
                actions.push(self.transition_to(SessionState::Auth)?);
                actions.push(SessionAction::HandshakeEstablished);
                Ok(actions)
            }
            // Initiator: this is the peer's reply.
            SessionState::Handshake => {
                let changed = self.transition_to(SessionState::Auth)?;
                Ok(vec![changed, SessionAction::HandshakeEstablished])
            }
            // dispatcher::admit restricts handshakes to the two states above
            state => Err(SessionError::ProtocolViolation { state, msg_type: MsgType::Handshake }),
        }
    }

    fn on_response_frame(&mut self, frame: &Frame) -> Vec<SessionAction> {
        let sequence = frame.header.sequence();
        let mut actions = Vec::new();

        match self.pending.remove(&sequence) {
            Some(pending) => {
                actions.push(SessionAction::PendingResolved {
                    sequence,
                    payload: frame.payload.clone(),
                });
                if pending.kind == PendingKind::Auth && self.state() == SessionState::Auth {
                    match self.transition_to(SessionState::Ready) {
                        Ok(changed) => {
                            actions.push(changed);
                            actions.push(SessionAction::AuthAccepted);
                        }
                        Err(err) => warn!(%err, "auth acceptance could not advance the machine"),
                    }
                }
            }
            None => {
                warn!(sequence, "discarding response with no matching request");
            }
        }

        actions.push(SessionAction::ResponseReceived { sequence, payload: frame.payload.clone() });
        actions
    }

    fn on_error_frame(&mut self, frame: &Frame) -> Vec<SessionAction> {
        let sequence = frame.header.sequence();
        let message = String::from_utf8_lossy(&frame.payload).into_owned();
        let mut actions = Vec::new();

        if let Some(pending) = self.pending.remove(&sequence) {
            actions.push(SessionAction::PendingRejected { sequence, message: message.clone() });
            if pending.kind == PendingKind::Auth {
                actions.push(SessionAction::AuthRejected { message: message.clone() });
            }
        }

        actions.push(SessionAction::ErrorReceived { sequence, message });
        actions
    }

    // Internals

    /// Build a frame with a freshly assigned sequence number.
    fn next_frame(&mut self, msg_type: MsgType, flags: FrameFlags, payload: Bytes) -> Frame {
        let mut frame = Frame::build(msg_type, flags, payload);
        frame.set_sequence(self.assign_sequence());
        frame
    }

    /// Build a reply frame reusing the triggering frame's sequence.
    fn reply_frame(msg_type: MsgType, flags: FrameFlags, sequence: u32, payload: Bytes) -> Frame {
        let mut frame = Frame::build(msg_type, flags, payload);
        frame.set_sequence(sequence);
        frame
    }

    fn assign_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    fn check_payload_size(&self, size: usize) -> Result<(), SessionError> {
        if size > self.config.max_message_size {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.config.max_message_size,
            }
            .into());
        }
        Ok(())
    }

    fn transition_to(&mut self, to: SessionState) -> Result<SessionAction, SessionError> {
        let from = self.state();
        self.machine.execute_transition_between(from.id(), to.id(), &mut ())?;
        Ok(SessionAction::StateChanged { from, to })
    }

    /// Drive the machine to `error` after a fatal failure. Best-effort:
    /// if the machine cannot move (already failed, state locked), the
    /// caller still surfaces the original error.
    fn fail(&mut self, reason: &str) {
        let state = self.state();
        if state == SessionState::Error || state.is_final() {
            return;
        }
        tracing::error!(from = %state, reason, "session entering error state");
        if let Err(err) = self.machine.execute_transition_between(
            state.id(),
            SessionState::Error.id(),
            &mut (),
        ) {
            warn!(%err, "could not record error transition");
        }
    }
}

/// Wire the protocol topology into a fresh state machine.
///
/// Entry hooks trace each lifecycle state; the interesting work happens
/// in the session methods, which keep their own state mirror in sync by
/// construction.
fn wire_machine() -> StateMachine<()> {
    const EDGES: [(SessionState, SessionState); 12] = [
        (SessionState::Init, SessionState::Handshake),
        (SessionState::Handshake, SessionState::Auth),
        (SessionState::Auth, SessionState::Ready),
        (SessionState::Ready, SessionState::Error),
        (SessionState::Ready, SessionState::Closed),
        (SessionState::Error, SessionState::Closed),
        (SessionState::Init, SessionState::Error),
        (SessionState::Handshake, SessionState::Error),
        (SessionState::Auth, SessionState::Error),
        (SessionState::Init, SessionState::Closed),
        (SessionState::Handshake, SessionState::Closed),
        (SessionState::Auth, SessionState::Closed),
    ];

    let mut machine = StateMachine::new();
    for state in SessionState::ALL {
        let name = state.name();
        machine
            .add_state(
                name,
                Some(Arc::new(move |(): &mut ()| debug!(state = name, "protocol state entered"))),
                None,
                state.is_final(),
            )
            .unwrap_or_else(|_| unreachable!("static topology fits machine capacity"));
    }
    for (from, to) in EDGES {
        machine
            .add_transition(
                &format!("{}_to_{}", from.name(), to.name()),
                from.id(),
                to.id(),
                None,
                None,
            )
            .unwrap_or_else(|_| unreachable!("static topology fits machine capacity"));
    }
    machine
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parlance_proto::HANDSHAKE_PAYLOAD_SIZE;

    use super::*;

    fn pair(now: Instant) -> (Session, Session) {
        (
            Session::new(now, Role::Initiator, SessionConfig::default()),
            Session::new(now, Role::Responder, SessionConfig::default()),
        )
    }

    fn sent_frames(actions: &[SessionAction]) -> Vec<Frame> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::SendFrame(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    fn wire_bytes(frames: &[Frame]) -> Vec<u8> {
        let mut wire = Vec::new();
        for frame in frames {
            frame.encode(&mut wire).unwrap();
        }
        wire
    }

    /// Drive both sessions to `ready`: handshake, credentials, acceptance.
    fn establish(client: &mut Session, server: &mut Session, now: Instant) {
        let hello = sent_frames(&client.begin_handshake(now).unwrap());
        let server_actions = server.handle_bytes(&wire_bytes(&hello), now).unwrap();
        let reply = sent_frames(&server_actions);
        client.handle_bytes(&wire_bytes(&reply), now).unwrap();

        let auth = sent_frames(&client.authenticate(&b"secret"[..], now).unwrap());
        let server_actions = server.handle_bytes(&wire_bytes(&auth), now).unwrap();
        assert!(server_actions.iter().any(|a| matches!(a, SessionAction::AuthRequest(_))));

        let verdict = sent_frames(&server.accept_auth(now).unwrap());
        client.handle_bytes(&wire_bytes(&verdict), now).unwrap();
    }

    #[test]
    fn handshake_happy_path() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);

        let actions = client.begin_handshake(now).unwrap();
        assert_eq!(client.state(), SessionState::Handshake);

        let hello = sent_frames(&actions);
        assert_eq!(hello.len(), 1);
        assert_eq!(hello[0].header.msg_type(), Some(MsgType::Handshake));
        assert_eq!(hello[0].header.sequence(), 1);
        assert_eq!(hello[0].payload.len(), HANDSHAKE_PAYLOAD_SIZE);

        // Server accepts and replies with its own HANDSHAKE, seq 1.
        let server_actions = server.handle_bytes(&wire_bytes(&hello), now).unwrap();
        assert_eq!(server.state(), SessionState::Auth);
        let reply = sent_frames(&server_actions);
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].header.sequence(), 1);
        assert!(server_actions.iter().any(|a| matches!(a, SessionAction::HandshakeEstablished)));

        // Client consumes the reply and lands in auth.
        let client_actions = client.handle_bytes(&wire_bytes(&reply), now).unwrap();
        assert_eq!(client.state(), SessionState::Auth);
        assert!(client_actions.iter().any(|a| matches!(a, SessionAction::HandshakeEstablished)));
        assert!(client.is_connected());
        assert!(!client.is_authenticated());
    }

    #[test]
    fn bad_version_rejected_and_machine_errors() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);

        let mut wire = wire_bytes(&sent_frames(&client.begin_handshake(now).unwrap()));
        wire[0] = 2; // corrupt the version byte

        let result = server.handle_bytes(&wire, now);
        assert_eq!(
            result,
            Err(SessionError::Protocol(ProtocolError::UnsupportedVersion(2)))
        );
        assert_eq!(server.state(), SessionState::Error);
        assert!(!server.is_connected());
    }

    #[test]
    fn bad_magic_rejected() {
        let now = Instant::now();
        let (_, mut server) = pair(now);

        let mut frame = Frame::build(
            MsgType::Handshake,
            FrameFlags::RELIABLE,
            vec![0xFFu8; HANDSHAKE_PAYLOAD_SIZE],
        );
        frame.set_sequence(1);

        let result = server.handle_bytes(&wire_bytes(&[frame]), now);
        assert_eq!(result, Err(SessionError::Protocol(ProtocolError::InvalidMagic)));
        assert_eq!(server.state(), SessionState::Error);
    }

    #[test]
    fn checksum_corruption_is_fatal() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);

        let mut wire = wire_bytes(&sent_frames(&client.begin_handshake(now).unwrap()));
        let last = wire.len() - 1;
        wire[last] ^= 0x40;

        let result = server.handle_bytes(&wire, now);
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::ChecksumMismatch { .. }))
        ));
        assert_eq!(server.state(), SessionState::Error);
    }

    #[test]
    fn full_establishment_reaches_ready_on_both_sides() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        assert_eq!(client.state(), SessionState::Ready);
        assert_eq!(server.state(), SessionState::Ready);
        assert!(client.is_authenticated());
        assert_eq!(client.pending_len(), 0, "auth waiter resolved");
    }

    #[test]
    fn auth_rejection_surfaces_and_stays_in_auth() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);

        let hello = sent_frames(&client.begin_handshake(now).unwrap());
        let reply = sent_frames(&server.handle_bytes(&wire_bytes(&hello), now).unwrap());
        client.handle_bytes(&wire_bytes(&reply), now).unwrap();

        let auth = sent_frames(&client.authenticate(&b"wrong"[..], now).unwrap());
        server.handle_bytes(&wire_bytes(&auth), now).unwrap();
        let verdict = sent_frames(&server.reject_auth("bad credentials", now).unwrap());

        let actions = client.handle_bytes(&wire_bytes(&verdict), now).unwrap();
        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::AuthRejected { message } if message == "bad credentials"
        )));
        assert_eq!(client.state(), SessionState::Auth);
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn command_response_correlation() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        let (sequence, actions) = client.send_command(&b"status"[..], now).unwrap();
        assert_eq!(client.pending_len(), 1);

        let server_actions = server.handle_bytes(&wire_bytes(&sent_frames(&actions)), now).unwrap();
        let received = server_actions
            .iter()
            .find_map(|a| match a {
                SessionAction::CommandReceived { sequence, payload } => {
                    Some((*sequence, payload.clone()))
                }
                _ => None,
            })
            .expect("server saw the command");
        assert_eq!(received.0, sequence);
        assert_eq!(&received.1[..], b"status");

        let reply = sent_frames(&server.send_response(received.0, &b"ok"[..]).unwrap());
        assert_eq!(reply[0].header.sequence(), sequence, "reply echoes the command sequence");

        let actions = client.handle_bytes(&wire_bytes(&reply), now).unwrap();
        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::PendingResolved { sequence: s, payload } if *s == sequence && &payload[..] == b"ok"
        )));
        assert_eq!(client.pending_len(), 0, "pending table drained");
    }

    #[test]
    fn command_timeout_and_late_response_discard() {
        let now = Instant::now();
        let config = SessionConfig {
            response_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let mut client = Session::new(now, Role::Initiator, config);
        let mut server = Session::new(now, Role::Responder, SessionConfig::default());
        establish(&mut client, &mut server, now);

        let (sequence, _) = client.send_command(&b"slow"[..], now).unwrap();

        // Nothing expires before the deadline (the tick may still carry
        // the first heartbeat).
        let early = client.tick(now + Duration::from_millis(99));
        assert!(!early.iter().any(|a| matches!(a, SessionAction::PendingTimedOut { .. })));

        let actions = client.tick(now + Duration::from_millis(100));
        assert_eq!(actions, vec![SessionAction::PendingTimedOut { sequence }]);
        assert_eq!(client.pending_len(), 0);

        // A late reply no longer matches anything; only the generic
        // response event fires.
        let late = sent_frames(&server.send_response(sequence, &b"too late"[..]).unwrap());
        let actions = client
            .handle_bytes(&wire_bytes(&late), now + Duration::from_millis(200))
            .unwrap();
        assert!(!actions.iter().any(|a| matches!(a, SessionAction::PendingResolved { .. })));
        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::ResponseReceived { sequence: s, .. } if *s == sequence
        )));
    }

    #[test]
    fn peer_error_rejects_waiter() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        let (sequence, actions) = client.send_command(&b"forbidden"[..], now).unwrap();
        server.handle_bytes(&wire_bytes(&sent_frames(&actions)), now).unwrap();

        let reply = sent_frames(&server.send_error(sequence, "denied").unwrap());
        let actions = client.handle_bytes(&wire_bytes(&reply), now).unwrap();

        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::PendingRejected { sequence: s, message } if *s == sequence && message == "denied"
        )));
        assert!(actions.iter().any(|a| matches!(a, SessionAction::ErrorReceived { .. })));
        assert_eq!(client.pending_len(), 0);
        // A peer ERROR frame is not a local fatal failure.
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[test]
    fn outbound_sequences_increase_by_one() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        let mut sequences = Vec::new();
        for _ in 0..4 {
            let (sequence, _) = client.send_command(&b"n"[..], now).unwrap();
            sequences.push(sequence);
        }
        for window in sequences.windows(2) {
            assert_eq!(window[1], window[0].wrapping_add(1));
        }
    }

    #[test]
    fn heartbeats_fire_on_interval_when_ready() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);

        // No heartbeats before the session is ready.
        assert!(client.tick(now + Duration::from_secs(60)).is_empty());

        establish(&mut client, &mut server, now);

        let first = client.tick(now);
        let frames = sent_frames(&first);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.msg_type(), Some(MsgType::Heartbeat));
        assert!(frames[0].payload.is_empty());

        // Within the interval: quiet. At the interval: next beat.
        assert!(client.tick(now + Duration::from_secs(4)).is_empty());
        let next = client.tick(now + Duration::from_secs(5));
        assert_eq!(sent_frames(&next).len(), 1);

        // The responder never originates heartbeats.
        assert!(sent_frames(&server.tick(now + Duration::from_secs(60))).is_empty());
    }

    #[test]
    fn heartbeat_refreshes_peer_liveness_without_transition() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        let later = now + Duration::from_secs(3);
        let beat = sent_frames(&client.tick(later));
        let actions = server.handle_bytes(&wire_bytes(&beat), later).unwrap();

        assert!(actions.iter().any(|a| matches!(a, SessionAction::HeartbeatReceived)));
        assert!(!actions.iter().any(|a| matches!(a, SessionAction::StateChanged { .. })));
        assert_eq!(server.last_activity(), later);
        assert_eq!(server.state(), SessionState::Ready);
    }

    #[test]
    fn disconnect_rejects_all_pending() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        let (first, _) = client.send_command(&b"a"[..], now).unwrap();
        let (second, _) = client.send_command(&b"b"[..], now).unwrap();

        let actions = client.disconnect("shutdown", now);
        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(client.pending_len(), 0);

        for sequence in [first, second] {
            assert!(actions.iter().any(|a| matches!(
                a,
                SessionAction::PendingRejected { sequence: s, message }
                    if *s == sequence && message == "connection closed"
            )));
        }
        assert!(actions.iter().any(|a| matches!(a, SessionAction::Close { .. })));
    }

    #[test]
    fn disconnect_from_error_state_closes() {
        let now = Instant::now();
        let (_, mut server) = pair(now);

        let garbage = [0u8; 32]; // version byte 0
        assert!(server.handle_bytes(&garbage, now).is_err());
        assert_eq!(server.state(), SessionState::Error);

        server.disconnect("teardown after failure", now);
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[test]
    fn command_before_ready_is_a_violation() {
        let now = Instant::now();
        let (_, mut server) = pair(now);

        let mut frame = Frame::build(MsgType::Command, FrameFlags::empty(), &b"early"[..]);
        frame.set_sequence(1);

        let result = server.handle_bytes(&wire_bytes(&[frame]), now);
        assert_eq!(
            result,
            Err(SessionError::ProtocolViolation {
                state: SessionState::Init,
                msg_type: MsgType::Command,
            })
        );
        assert_eq!(server.state(), SessionState::Error);
    }

    #[test]
    fn oversized_inbound_payload_is_fatal() {
        let now = Instant::now();
        let config =
            SessionConfig { max_message_size: 16, ..SessionConfig::default() };
        let mut server = Session::new(now, Role::Responder, config);

        let mut frame =
            Frame::build(MsgType::Handshake, FrameFlags::empty(), vec![0u8; 64]);
        frame.set_sequence(1);

        let result = server.handle_bytes(&wire_bytes(&[frame]), now);
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::PayloadTooLarge { size: 64, max: 16 }))
        ));
        assert_eq!(server.state(), SessionState::Error);
    }

    #[test]
    fn oversized_outbound_command_rejected_without_state_change() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);
        establish(&mut client, &mut server, now);

        let result = client.send_command(vec![0u8; 5000], now);
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::PayloadTooLarge { .. }))
        ));
        assert_eq!(client.state(), SessionState::Ready);
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn partial_frames_buffer_until_complete() {
        let now = Instant::now();
        let (mut client, mut server) = pair(now);

        let wire = wire_bytes(&sent_frames(&client.begin_handshake(now).unwrap()));
        let (head, tail) = wire.split_at(10);

        assert!(server.handle_bytes(head, now).unwrap().is_empty());
        assert_eq!(server.state(), SessionState::Init);

        let actions = server.handle_bytes(tail, now).unwrap();
        assert!(!actions.is_empty());
        assert_eq!(server.state(), SessionState::Auth);
    }

    #[test]
    fn locked_machine_state_blocks_lifecycle() {
        let now = Instant::now();
        let (mut client, _) = pair(now);

        client.machine_mut().lock_state(SessionState::Handshake.id()).unwrap();
        let result = client.begin_handshake(now);
        assert!(matches!(
            result,
            Err(SessionError::Machine(crate::machine::MachineError::StateLocked { .. }))
        ));
        assert_eq!(client.state(), SessionState::Init);

        client.machine_mut().unlock_state(SessionState::Handshake.id()).unwrap();
        client.begin_handshake(now).unwrap();
        assert_eq!(client.state(), SessionState::Handshake);
    }

    #[test]
    fn begin_handshake_twice_is_invalid() {
        let now = Instant::now();
        let (mut client, _) = pair(now);
        client.begin_handshake(now).unwrap();

        let result = client.begin_handshake(now);
        assert_eq!(
            result,
            Err(SessionError::InvalidState {
                state: SessionState::Handshake,
                operation: "begin_handshake",
            })
        );
    }
}
