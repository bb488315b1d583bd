//! Minimal responder driver for simulation tests.
//!
//! Drives a [`Session`] in the responder role over a Turmoil stream:
//! answers handshakes, rules on credentials, and maps commands through a
//! caller-supplied function. Tests that need finer control (corrupting
//! frames, counting heartbeats) drive streams by hand instead.

use std::collections::VecDeque;
use std::io;
use std::time::Instant;

use parlance_core::{Role, Session, SessionAction, SessionConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use turmoil::net::{TcpListener, TcpStream};

/// Configurable responder for simulation tests.
///
/// The command function's `Ok` payloads become RESPONSE frames and `Err`
/// messages become ERROR frames, both echoing the command's sequence
/// number.
pub struct SimServer {
    /// Whether presented credentials are accepted
    pub accept_auth: bool,
    /// Whether commands are answered at all (disable for timeout tests)
    pub respond_to_commands: bool,
}

impl Default for SimServer {
    fn default() -> Self {
        Self { accept_auth: true, respond_to_commands: true }
    }
}

fn now_instant() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl SimServer {
    /// Bind `addr` and serve connections one at a time, forever.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if binding or accepting fails; a failure
    /// on an individual connection just drops that connection.
    pub async fn serve<F>(mut self, addr: &str, mut on_command: F) -> io::Result<()>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, String> + Send,
    {
        let listener = TcpListener::bind(addr).await?;
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(?peer, "connection accepted");
            if let Err(err) = self.serve_connection(stream, &mut on_command).await {
                debug!(%err, "connection dropped");
            }
        }
    }

    /// Serve a single already-accepted connection until the peer hangs up
    /// or a protocol failure ends it.
    ///
    /// # Errors
    ///
    /// Transport errors, or protocol failures converted through
    /// `SessionError`'s `io::Error` mapping.
    pub async fn serve_connection<F>(
        &mut self,
        stream: TcpStream,
        on_command: &mut F,
    ) -> io::Result<()>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, String> + Send,
    {
        let mut session = Session::new(now_instant(), Role::Responder, SessionConfig::default());
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = vec![0u8; 4096];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            let actions =
                session.handle_bytes(&buf[..n], now_instant()).map_err(io::Error::from)?;

            let mut worklist = VecDeque::from(actions);
            while let Some(action) = worklist.pop_front() {
                match action {
                    SessionAction::SendFrame(frame) => {
                        let mut wire = Vec::new();
                        frame.encode(&mut wire).map_err(|e| {
                            io::Error::new(io::ErrorKind::InvalidData, e.to_string())
                        })?;
                        writer.write_all(&wire).await?;
                    }
                    SessionAction::AuthRequest(_credentials) => {
                        let actions = if self.accept_auth {
                            session.accept_auth(now_instant())
                        } else {
                            session.reject_auth("credentials rejected", now_instant())
                        }
                        .map_err(io::Error::from)?;
                        worklist.extend(actions);
                    }
                    SessionAction::CommandReceived { sequence, payload } => {
                        if !self.respond_to_commands {
                            debug!(sequence, "swallowing command");
                            continue;
                        }
                        let actions = match on_command(&payload) {
                            Ok(response) => session.send_response(sequence, response),
                            Err(message) => session.send_error(sequence, &message),
                        }
                        .map_err(io::Error::from)?;
                        worklist.extend(actions);
                    }
                    other => debug!(?other, "unhandled action"),
                }
            }
        }
    }
}
