//! Deterministic simulation harness for Parlance protocol testing.
//!
//! This crate provides a Turmoil-backed implementation of the
//! [`Transport`](parlance_core::transport::Transport) seam plus a small
//! responder driver, enabling deterministic, reproducible testing of the
//! full client stack: handshake, authentication, command correlation,
//! timeouts and reconnection, all under virtual time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_server;
pub mod sim_transport;

pub use sim_server::SimServer;
pub use sim_transport::{SimListener, SimTransport};
