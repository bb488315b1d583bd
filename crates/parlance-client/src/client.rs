//! Client connection orchestrator.
//!
//! [`Client::connect`] spawns a Tokio task that owns the transport stream
//! and a [`Session`], and returns a cheap [`ClientHandle`] for issuing
//! commands. The task drives the whole lifecycle:
//!
//! - dial, handshake, authenticate with the configured credentials
//! - pump received bytes through the session and execute its actions
//! - resolve `command()` futures from RESPONSE/ERROR frames by sequence
//! - send heartbeats and expire pending requests on a timer
//! - on disconnect, reject in-flight waiters, keep queued commands, and
//!   redial with linear backoff while retries remain
//!
//! Commands issued while the connection is down (or before the session
//! reaches `ready`) are queued and replayed after the next successful
//! handshake and authentication.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parlance_core::{
    Role, Session, SessionAction, SessionConfig, SessionError, SessionState,
    session::CONNECTION_CLOSED_MESSAGE,
    transport::Transport,
};
use parlance_proto::MessageHeader;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How often the driver advances session timers (heartbeats, pending
/// deadlines). Granularity, not precision: deadlines fire on the first
/// tick at or after expiry.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Read chunk size for the receive loop
const READ_CHUNK: usize = 4096;

/// Client configuration: where to connect and how persistently.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Whether to redial after an unexpected disconnect
    pub reconnect: bool,
    /// How many consecutive redials to attempt before giving up
    pub max_retries: u32,
    /// Session-level protocol configuration
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Default server host
    pub const DEFAULT_HOST: &'static str = "localhost";

    /// Default server port
    pub const DEFAULT_PORT: u16 = 8080;

    /// Default redial budget
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Dial address in `host:port` form
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            reconnect: true,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            session: SessionConfig::default(),
        }
    }
}

/// Application callbacks, invoked from the connection task.
///
/// All methods have default no-op implementations; implement what you
/// need. Callbacks must not block: they run on the connection's event
/// loop.
pub trait Handler: Send + 'static {
    /// The handshake exchange completed
    fn on_handshake(&mut self) {}

    /// The peer presented credentials (server-initiated auth); return
    /// whether to accept them
    fn on_auth_request(&mut self, _credentials: &[u8]) -> bool {
        true
    }

    /// A command arrived from the peer; return the response payload
    fn on_command(&mut self, _payload: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    /// An error was reported (peer ERROR frame, auth rejection, or a
    /// fatal protocol failure)
    fn on_error(&mut self, _message: &str) {}

    /// The session lifecycle moved between states
    fn on_state_change(&mut self, _old: SessionState, _new: SessionState) {}
}

/// Handler that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

type CommandReply = oneshot::Sender<Result<Bytes, SessionError>>;

enum Op {
    Command { payload: Bytes, reply: CommandReply },
    Shutdown { done: oneshot::Sender<()> },
}

/// Entry point for client connections.
#[derive(Debug, Clone, Copy)]
pub struct Client;

impl Client {
    /// Spawn a connection task and return its handle.
    ///
    /// The task dials `config.addr()`, performs the handshake, presents
    /// `credentials`, and then serves commands until [`ClientHandle::shutdown`]
    /// or the retry budget is exhausted. The handle is available
    /// immediately; commands issued before the session is ready are
    /// queued and replayed once it is.
    pub fn connect<T, H>(
        transport: T,
        config: ClientConfig,
        credentials: impl Into<Bytes>,
        handler: H,
    ) -> ClientHandle
    where
        T: Transport,
        H: Handler,
    {
        let (ops_tx, ops_rx) = mpsc::channel(32);
        let worker = Worker {
            transport,
            config,
            credentials: credentials.into(),
            handler,
            ops: ops_rx,
            queue: VecDeque::new(),
            waiters: HashMap::new(),
            reconnect_enabled: true,
            attempts: 0,
        };
        tokio::spawn(worker.run());
        ClientHandle { ops: ops_tx }
    }
}

/// Handle to a running client connection task.
///
/// Cloneable; all clones talk to the same connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    ops: mpsc::Sender<Op>,
}

impl ClientHandle {
    /// Send a command and await its correlated reply.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Timeout`] if no reply arrived within the
    ///   configured response timeout
    /// - [`SessionError::Rejected`] if the peer answered with an ERROR
    ///   frame
    /// - [`SessionError::ConnectionClosed`] if the connection went away
    ///   (and, for queued commands, could not be re-established)
    pub async fn command(&self, payload: impl Into<Bytes>) -> Result<Bytes, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Op::Command { payload: payload.into(), reply })
            .await
            .map_err(|_| SessionError::ConnectionClosed)?;
        rx.await.map_err(|_| SessionError::ConnectionClosed)?
    }

    /// Gracefully shut the connection down: disable reconnection, reject
    /// queued and in-flight commands, close the transport, and stop the
    /// task. Resolves once the task has exited its connection.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.ops.send(Op::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

enum ConnOutcome {
    Shutdown,
    Disconnected(String),
}

struct Worker<T: Transport, H: Handler> {
    transport: T,
    config: ClientConfig,
    credentials: Bytes,
    handler: H,
    ops: mpsc::Receiver<Op>,
    /// Commands awaiting a live, authenticated session
    queue: VecDeque<(Bytes, CommandReply)>,
    /// In-flight commands by sequence number
    waiters: HashMap<u32, CommandReply>,
    reconnect_enabled: bool,
    /// Consecutive connection attempts that never reached `ready`.
    /// Reset on successful authentication, not on raw TCP connect, so a
    /// server that accepts and drops still exhausts the retry budget.
    attempts: u32,
}

/// Current instant, virtual under simulation.
fn now_instant() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl<T: Transport, H: Handler> Worker<T, H> {
    async fn run(mut self) {
        loop {
            let addr = self.config.addr();
            match self.transport.connect(&addr).await {
                Ok(stream) => match self.drive(stream).await {
                    ConnOutcome::Shutdown => return,
                    ConnOutcome::Disconnected(reason) => {
                        debug!(reason, "connection ended");
                    }
                },
                Err(err) => warn!(%err, addr, "connect failed"),
            }

            if !self.reconnect_enabled
                || !self.config.reconnect
                || self.attempts >= self.config.max_retries
            {
                self.reject_everything();
                return;
            }

            self.attempts += 1;
            let backoff = Duration::from_secs(u64::from(self.attempts));
            debug!(attempt = self.attempts, ?backoff, "scheduling reconnect");
            if !self.wait_through_backoff(backoff).await {
                return;
            }
        }
    }

    /// Sleep out the backoff while still queueing commands and honoring
    /// shutdown. Returns false if the worker should stop.
    async fn wait_through_backoff(&mut self, backoff: Duration) -> bool {
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                op = self.ops.recv() => match op {
                    Some(Op::Command { payload, reply }) => {
                        self.queue.push_back((payload, reply));
                    }
                    Some(Op::Shutdown { done }) => {
                        self.reject_everything();
                        let _ = done.send(());
                        return false;
                    }
                    None => {
                        self.reject_everything();
                        return false;
                    }
                },
            }
        }
    }

    /// Drive one established transport connection to completion.
    async fn drive(&mut self, stream: T::Stream) -> ConnOutcome {
        let now = now_instant();
        let mut session = Session::new(now, Role::Initiator, self.config.session.clone());
        let (mut reader, mut writer) = tokio::io::split(stream);

        match session.begin_handshake(now) {
            Ok(actions) => {
                if let Err(err) = self.perform(&mut session, &mut writer, actions).await {
                    return self.teardown(&mut session, err.to_string()).await;
                }
            }
            Err(err) => return ConnOutcome::Disconnected(err.to_string()),
        }

        let mut read_buf = vec![0u8; READ_CHUNK];
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = reader.read(&mut read_buf) => match result {
                    Ok(0) => {
                        return self.teardown(&mut session, "peer closed the stream".to_string()).await;
                    }
                    Ok(n) => {
                        let outcome = session.handle_bytes(&read_buf[..n], now_instant());
                        match outcome {
                            Ok(actions) => {
                                if let Err(err) =
                                    self.perform(&mut session, &mut writer, actions).await
                                {
                                    return self.teardown(&mut session, err.to_string()).await;
                                }
                            }
                            Err(err) => {
                                // Fatal protocol failure; the session is in
                                // its error state and framing is untrusted.
                                self.handler.on_error(&err.to_string());
                                return self.teardown(&mut session, err.to_string()).await;
                            }
                        }
                    }
                    Err(err) => {
                        return self.teardown(&mut session, err.to_string()).await;
                    }
                },
                _ = tick.tick() => {
                    let actions = session.tick(now_instant());
                    if let Err(err) = self.perform(&mut session, &mut writer, actions).await {
                        return self.teardown(&mut session, err.to_string()).await;
                    }
                },
                op = self.ops.recv() => match op {
                    Some(Op::Command { payload, reply }) => {
                        if session.is_authenticated() {
                            self.submit_command(&mut session, payload, reply, &mut writer).await;
                        } else {
                            self.queue.push_back((payload, reply));
                        }
                    }
                    Some(Op::Shutdown { done }) => {
                        self.reconnect_enabled = false;
                        let actions = session.disconnect("client shutdown", now_instant());
                        let _ = self.perform(&mut session, &mut writer, actions).await;
                        let _ = writer.shutdown().await;
                        self.reject_everything();
                        let _ = done.send(());
                        return ConnOutcome::Shutdown;
                    }
                    None => {
                        // Every handle dropped: nothing can observe this
                        // client anymore.
                        self.reconnect_enabled = false;
                        let actions = session.disconnect("all handles dropped", now_instant());
                        let _ = self.perform(&mut session, &mut writer, actions).await;
                        let _ = writer.shutdown().await;
                        return ConnOutcome::Shutdown;
                    }
                },
            }
        }
    }

    async fn submit_command<W: AsyncWrite + Unpin + Send>(
        &mut self,
        session: &mut Session,
        payload: Bytes,
        reply: CommandReply,
        writer: &mut W,
    ) {
        match session.send_command(payload, now_instant()) {
            Ok((sequence, actions)) => {
                self.waiters.insert(sequence, reply);
                if let Err(err) = self.perform(session, writer, actions).await {
                    if let Some(reply) = self.waiters.remove(&sequence) {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Close out a failed connection: reject in-flight waiters (queued
    /// commands survive for replay after reconnect) and report why.
    async fn teardown(&mut self, session: &mut Session, reason: String) -> ConnOutcome {
        let actions = session.disconnect(&reason, now_instant());
        // The transport is already gone; execute only the bookkeeping
        // actions (waiter rejections), ignoring frame writes.
        let mut sink = tokio::io::sink();
        let _ = self.perform(session, &mut sink, actions).await;
        ConnOutcome::Disconnected(reason)
    }

    /// Execute session actions: write frames, resolve waiters, invoke
    /// handler callbacks. Actions produced while executing (auth after
    /// handshake, queue replay after auth) are appended to the worklist.
    async fn perform<W: AsyncWrite + Unpin + Send>(
        &mut self,
        session: &mut Session,
        writer: &mut W,
        actions: Vec<SessionAction>,
    ) -> Result<(), SessionError> {
        let mut worklist = VecDeque::from(actions);
        while let Some(action) = worklist.pop_front() {
            match action {
                SessionAction::SendFrame(frame) => {
                    let mut wire = Vec::with_capacity(MessageHeader::SIZE + frame.payload.len());
                    frame.encode(&mut wire)?;
                    writer.write_all(&wire).await.map_err(SessionError::from)?;
                }
                SessionAction::StateChanged { from, to } => {
                    self.handler.on_state_change(from, to);
                }
                SessionAction::HandshakeEstablished => {
                    self.handler.on_handshake();
                    worklist.extend(session.authenticate(self.credentials.clone(), now_instant())?);
                }
                SessionAction::AuthAccepted => {
                    self.attempts = 0;
                    debug!(queued = self.queue.len(), "authenticated, replaying queue");
                    while let Some((payload, reply)) = self.queue.pop_front() {
                        match session.send_command(payload, now_instant()) {
                            Ok((sequence, actions)) => {
                                self.waiters.insert(sequence, reply);
                                worklist.extend(actions);
                            }
                            Err(err) => {
                                let _ = reply.send(Err(err));
                            }
                        }
                    }
                }
                SessionAction::AuthRejected { message } => {
                    self.handler.on_error(&message);
                    // Retrying with the same credentials cannot succeed.
                    self.reconnect_enabled = false;
                    return Err(SessionError::Rejected { message });
                }
                SessionAction::AuthRequest(credentials) => {
                    let actions = if self.handler.on_auth_request(&credentials) {
                        session.accept_auth(now_instant())?
                    } else {
                        session.reject_auth("credentials rejected", now_instant())?
                    };
                    worklist.extend(actions);
                }
                SessionAction::CommandReceived { sequence, payload } => {
                    let response = self.handler.on_command(&payload);
                    worklist.extend(session.send_response(sequence, response)?);
                }
                SessionAction::PendingResolved { sequence, payload } => {
                    if let Some(reply) = self.waiters.remove(&sequence) {
                        let _ = reply.send(Ok(payload));
                    }
                }
                SessionAction::PendingRejected { sequence, message } => {
                    if let Some(reply) = self.waiters.remove(&sequence) {
                        let err = if message == CONNECTION_CLOSED_MESSAGE {
                            SessionError::ConnectionClosed
                        } else {
                            SessionError::Rejected { message }
                        };
                        let _ = reply.send(Err(err));
                    }
                }
                SessionAction::PendingTimedOut { sequence } => {
                    let timeout = SessionError::Timeout {
                        sequence,
                        waited: self.config.session.response_timeout,
                    };
                    if let Some(reply) = self.waiters.remove(&sequence) {
                        let _ = reply.send(Err(timeout));
                    } else if !session.is_authenticated() {
                        // The auth request itself timed out; tear the
                        // connection down so the retry budget applies.
                        return Err(timeout);
                    }
                }
                SessionAction::ErrorReceived { message, .. } => {
                    self.handler.on_error(&message);
                }
                SessionAction::ResponseReceived { .. } | SessionAction::HeartbeatReceived => {}
                SessionAction::Close { reason } => {
                    debug!(reason, "session closed");
                }
            }
        }
        Ok(())
    }

    /// Reject every queued and in-flight command with `ConnectionClosed`.
    fn reject_everything(&mut self) {
        for (_, reply) in self.queue.drain(..) {
            let _ = reply.send(Err(SessionError::ConnectionClosed));
        }
        for (_, reply) in self.waiters.drain() {
            let _ = reply.send(Err(SessionError::ConnectionClosed));
        }
    }
}
