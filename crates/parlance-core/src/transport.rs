//! Transport abstraction for network I/O.
//!
//! The protocol treats its transport as a reliable, ordered, bidirectional
//! byte stream with connect and disconnect events; everything else
//! (framing, sequencing, timeouts) is layered on top by the session. The
//! `Transport` trait captures exactly that seam so drivers can swap the
//! real network for a deterministic simulation:
//!
//! - **`TcpTransport`** (production, `parlance-client`): Tokio TCP streams
//! - **`SimTransport`** (testing, `parlance-harness`): Turmoil's simulated
//!   TCP with virtual time and fault injection
//!
//! Protocol logic never touches this trait; only driver code does. What
//! the simulation exercises is therefore the protocol's correctness under
//! reordering of *events* (connects, disconnects, delays), not TCP itself.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Abstract stream-oriented transport.
///
/// # Lifecycle
///
/// ```text
/// Server:                       Client:
/// Transport::bind(addr)         Transport::connect(addr)
///   ↓                             ↓
/// Listener::accept()            [Stream returned]
///   ↓
/// [Stream returned]
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connected byte stream to a peer
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Listener handle accepting inbound streams
    type Listener: TransportListener<Stream = Self::Stream>;

    /// Connect to a remote endpoint and complete the transport-level
    /// handshake (TCP three-way, or its simulation).
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the remote endpoint is unreachable,
    /// refuses the connection, or the address cannot be resolved.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;

    /// Bind a listener on the given address.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the address is in use or invalid.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;
}

/// Accepting side of a [`Transport`].
#[async_trait]
pub trait TransportListener: Send + Sync + 'static {
    /// Stream type produced by this listener
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the listener is shut down or the
    /// accept fails.
    async fn accept(&self) -> io::Result<Self::Stream>;
}
