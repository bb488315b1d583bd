//! Frame type combining header and payload, plus the streaming decoder.
//!
//! A `Frame` is the atomic unit on the wire: a 16-byte little-endian header
//! followed by an opaque payload. The runtime never interprets payload
//! bytes itself; they are handed to the application as-is.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    FrameFlags, MessageHeader, MsgType,
    checksum::wire_checksum,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// Wire layout: `[MessageHeader: 16 bytes] + [payload: variable]`.
///
/// # Invariants
///
/// - `header.payload_length()` equals `payload.len()`. [`Frame::new`]
///   establishes this and [`Frame::decode`] verifies it against the input.
/// - `header.checksum()` equals `wire_checksum(&payload)`. Established by
///   [`Frame::new`], verified by [`Frame::decode`]; a mismatch on decode is
///   a [`ProtocolError::ChecksumMismatch`] and the frame is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (16 bytes)
    pub header: MessageHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, fixing up the header's payload length and
    /// checksum from the actual payload.
    ///
    /// The sequence number is left untouched; the session layer assigns it
    /// via [`Frame::set_sequence`] just before the frame is sent.
    #[must_use]
    pub fn new(mut header: MessageHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        #[allow(clippy::cast_possible_truncation)]
        {
            header.payload_length = (payload.len() as u32).to_le_bytes();
        }
        header.checksum = wire_checksum(&payload).to_le_bytes();

        Self { header, payload }
    }

    /// Shorthand for a frame with a freshly built header
    #[must_use]
    pub fn build(msg_type: MsgType, flags: FrameFlags, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageHeader::new(msg_type, flags), payload)
    }

    /// Set the sequence number in the header
    pub fn set_sequence(&mut self, sequence: u32) {
        self.header.sequence = sequence.to_le_bytes();
    }

    /// Encode the frame into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    /// [`MessageHeader::MAX_PAYLOAD_SIZE`]. This is the enforcement point
    /// for the outbound size cap.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > MessageHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MessageHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode one frame from wire bytes.
    ///
    /// Validates the header, requires the full declared payload to be
    /// present, then recomputes the payload checksum against the header.
    /// Trailing bytes beyond the frame are ignored.
    ///
    /// # Errors
    ///
    /// Any header validation error from [`MessageHeader::from_bytes`],
    /// [`ProtocolError::FrameTruncated`] if the payload is short, or
    /// [`ProtocolError::ChecksumMismatch`] if the payload does not hash to
    /// the header's checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = MessageHeader::from_bytes(bytes)?;

        let payload_length = header.payload_length() as usize;
        let total = MessageHeader::SIZE + payload_length;

        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_length,
                actual: bytes.len().saturating_sub(MessageHeader::SIZE),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[MessageHeader::SIZE..total]);

        let actual = wire_checksum(&payload);
        if actual != header.checksum() {
            return Err(ProtocolError::ChecksumMismatch {
                expected: header.checksum(),
                actual,
            });
        }

        Ok(Self { header: *header, payload })
    }
}

/// Incremental frame decoder for stream transports.
///
/// TCP delivers bytes, not frames. The decoder buffers whatever arrives
/// and yields complete frames as they become available:
///
/// ```
/// # use parlance_proto::{Frame, FrameDecoder, FrameFlags, MsgType};
/// let mut wire = Vec::new();
/// Frame::build(MsgType::Heartbeat, FrameFlags::empty(), Vec::new())
///     .encode(&mut wire)
///     .unwrap();
///
/// let mut decoder = FrameDecoder::new();
/// decoder.feed(&wire[..7]); // partial header
/// assert!(decoder.next_frame().unwrap().is_none());
/// decoder.feed(&wire[7..]);
/// assert!(decoder.next_frame().unwrap().is_some());
/// ```
///
/// A short read is `Ok(None)` (keep buffering); malformed input is an
/// error and the caller should tear the connection down, since framing can
/// no longer be trusted after a bad header.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Append received bytes to the internal buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a frame
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to decode the next complete frame from the buffer.
    ///
    /// # Errors
    ///
    /// Propagates header validation and checksum errors. After an error
    /// the buffer contents are unspecified; the connection should be
    /// closed rather than resynchronized.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < MessageHeader::SIZE {
            return Ok(None);
        }

        let header = MessageHeader::from_bytes(&self.buf)?;
        let total = MessageHeader::SIZE + header.payload_length() as usize;

        if self.buf.len() < total {
            return Ok(None);
        }

        let frame_bytes = self.buf.split_to(total);
        Frame::decode(&frame_bytes).map(Some)
    }
}
