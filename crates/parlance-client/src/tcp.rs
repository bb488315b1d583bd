//! Production TCP transport.

use std::io;

use async_trait::async_trait;
use parlance_core::transport::{Transport, TransportListener};
use tokio::net::TcpStream;

/// Tokio TCP implementation of the [`Transport`] seam.
///
/// Nagle's algorithm is disabled on outbound connections: frames are
/// small and request/reply latency dominates throughput for this
/// protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Listener half of [`TcpTransport`]
#[derive(Debug)]
pub struct TcpTransportListener {
    inner: tokio::net::TcpListener,
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpTransportListener;

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(TcpTransportListener { inner })
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<Self::Stream> {
        let (stream, _addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
