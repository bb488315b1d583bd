//! Tokio driver for the Parlance protocol.
//!
//! This crate supplies the I/O half the sans-IO core deliberately omits:
//! a production TCP transport and a client orchestrator that owns one
//! connection task per [`Client::connect`] call.
//!
//! ```no_run
//! use parlance_client::{Client, ClientConfig, NoopHandler, TcpTransport};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(
//!     TcpTransport,
//!     ClientConfig::default(),
//!     &b"api-token"[..],
//!     NoopHandler,
//! );
//!
//! let reply = client.command(&b"status"[..]).await?;
//! println!("server said: {:?}", reply);
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod tcp;

pub use client::{Client, ClientConfig, ClientHandle, Handler, NoopHandler};
pub use parlance_core::{SessionConfig, SessionError, SessionState};
pub use tcp::TcpTransport;
