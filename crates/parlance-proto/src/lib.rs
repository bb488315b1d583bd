//! # Parlance Protocol: Wire Format
//!
//! This crate implements the binary framing layer for the Parlance
//! protocol runtime.
//!
//! ## Protocol Design
//!
//! Every message on the wire is a frame: a fixed 16-byte little-endian
//! [`MessageHeader`] followed by an opaque payload. The header alone
//! carries everything the runtime needs to route a frame (type, flags,
//! sequence number) and to verify it (version, payload length, payload
//! checksum), so classification never touches payload bytes.
//!
//! ## Implementation Notes
//!
//! - **Zero-copy parsing**: [`zerocopy`](https://docs.rs/zerocopy) casts
//!   network bytes directly to [`MessageHeader`] references with
//!   compile-time layout verification. Malformed headers are rejected
//!   before any payload is copied.
//!
//! - **Streaming reassembly**: stream transports deliver bytes, not
//!   frames; [`FrameDecoder`] buffers partial input and yields complete,
//!   checksum-verified frames.
//!
//! - **Size limits**: `payload_length` is capped at 4096 bytes on both
//!   encode and decode, bounding per-frame memory for untrusted input.
//!
//! - **Corruption detection, not authentication**: the payload checksum is
//!   a rotate-add fold ([`wire_checksum`]). It catches framing corruption;
//!   it is not a MAC and the `ENCRYPTED` flag is advisory only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checksum;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod handshake;
pub mod header;
pub mod msg_type;

pub use checksum::wire_checksum;
pub use errors::{ProtocolError, Result};
pub use flags::FrameFlags;
pub use frame::{Frame, FrameDecoder};
pub use handshake::{HANDSHAKE_MAGIC, HANDSHAKE_PAYLOAD_SIZE, HandshakeHello, version_compatible};
pub use header::MessageHeader;
pub use msg_type::MsgType;
