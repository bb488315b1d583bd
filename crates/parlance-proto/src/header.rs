//! Message header with zero-copy parsing.
//!
//! The `MessageHeader` is a fixed 16-byte structure serialized as raw
//! binary (little endian). The dispatcher can classify a frame from the
//! header alone, without touching the payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    FrameFlags, MsgType,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (little-endian byte order).
///
/// Wire layout:
///
/// ```text
/// ┌────────────┬─────────┬──────────┬──────────────┬──────────────────┬──────────────┐
/// │ version(1) │ type(1) │ flags(2) │ sequence(4)  │ payload_len(4)   │ checksum(4)  │
/// └────────────┴─────────┴──────────┴──────────────┴──────────────────┴──────────────┘
/// ```
///
/// Multi-byte fields are stored as raw byte arrays to avoid alignment
/// issues with `#[repr(C, packed)]`; the accessor methods perform the
/// little-endian conversion.
///
/// # Zero-Copy Safety
///
/// The `zerocopy` traits verify at compile time that every 16-byte pattern
/// is a structurally valid `MessageHeader` (no invalid bit patterns), so
/// casting untrusted network bytes cannot cause undefined behavior.
/// Semantic validity (version, message type, payload size) is checked by
/// [`MessageHeader::from_bytes`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    version: u8,
    msg_type: u8,
    flags: [u8; 2],
    pub(crate) sequence: [u8; 4],
    pub(crate) payload_length: [u8; 4],
    pub(crate) checksum: [u8; 4],
}

impl MessageHeader {
    /// Size of the serialized header (16 bytes)
    pub const SIZE: usize = 16;

    /// Current protocol version
    pub const VERSION: u8 = 1;

    /// Maximum payload size in bytes (hard cap on `payload_length`)
    pub const MAX_PAYLOAD_SIZE: u32 = 4096;

    /// Create a new header for the given message type and flags.
    ///
    /// Sequence, payload length and checksum start at zero; the framing
    /// layer fills them in when the frame is built.
    #[must_use]
    pub fn new(msg_type: MsgType, flags: FrameFlags) -> Self {
        Self {
            version: Self::VERSION,
            msg_type: msg_type.to_u8(),
            flags: flags.to_wire().to_le_bytes(),
            sequence: [0; 4],
            payload_length: [0; 4],
            checksum: [0; 4],
        }
    }

    /// Parse a header from network bytes (zero-copy).
    ///
    /// Validation order is cheapest first: length, version, message type,
    /// payload size. Nothing is copied; the returned reference points into
    /// `bytes`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than 16 bytes are given
    /// - [`ProtocolError::UnsupportedVersion`] if the version byte is not 1
    /// - [`ProtocolError::UnknownMsgType`] for an unassigned type byte
    /// - [`ProtocolError::PayloadTooLarge`] if the declared payload length
    ///   exceeds [`MessageHeader::MAX_PAYLOAD_SIZE`]
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if MsgType::from_u8(header.msg_type).is_none() {
            return Err(ProtocolError::UnknownMsgType(header.msg_type));
        }

        let payload_length = u32::from_le_bytes(header.payload_length);
        if payload_length > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to its 16-byte wire form
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Get the protocol version
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Get the message type.
    ///
    /// Headers built by this crate or accepted by [`MessageHeader::from_bytes`]
    /// always carry a known type, so this is infallible for validated
    /// headers; an unvalidated header with an unknown byte returns `None`.
    #[must_use]
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msg_type)
    }

    /// Get the raw message type byte
    #[must_use]
    pub fn msg_type_raw(&self) -> u8 {
        self.msg_type
    }

    /// Get the frame flags
    #[must_use]
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_wire(u16::from_le_bytes(self.flags))
    }

    /// Get the sequence number
    #[must_use]
    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.sequence)
    }

    /// Get the declared payload length
    #[must_use]
    pub fn payload_length(&self) -> u32 {
        u32::from_le_bytes(self.payload_length)
    }

    /// Get the payload checksum carried in the header
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHeader")
            .field("version", &self.version())
            .field("msg_type", &format!("{:#04x}", self.msg_type_raw()))
            .field("flags", &self.flags())
            .field("sequence", &self.sequence())
            .field("payload_length", &self.payload_length())
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for MessageHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for MessageHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn msg_type_strategy() -> impl Strategy<Value = MsgType> {
        prop_oneof![
            Just(MsgType::Handshake),
            Just(MsgType::Auth),
            Just(MsgType::Command),
            Just(MsgType::Response),
            Just(MsgType::Error),
            Just(MsgType::Heartbeat),
        ]
    }

    impl Arbitrary for MessageHeader {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (
                msg_type_strategy(),
                any::<u16>(),                          // flags (unknown bits included)
                any::<u32>(),                          // sequence
                0u32..=MessageHeader::MAX_PAYLOAD_SIZE, // payload_length
                any::<u32>(),                          // checksum
            )
                .prop_map(|(msg_type, flags, sequence, payload_length, checksum)| {
                    MessageHeader {
                        version: MessageHeader::VERSION,
                        msg_type: msg_type.to_u8(),
                        flags: flags.to_le_bytes(),
                        sequence: sequence.to_le_bytes(),
                        payload_length: payload_length.to_le_bytes(),
                        checksum: checksum.to_le_bytes(),
                    }
                })
                .boxed()
        }
    }

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<MessageHeader>(), MessageHeader::SIZE);
        assert_eq!(MessageHeader::SIZE, 16);
    }

    #[test]
    fn field_offsets_match_wire_layout() {
        let mut header = MessageHeader::new(MsgType::Command, FrameFlags::URGENT);
        header.sequence = 0x0403_0201u32.to_le_bytes();
        header.payload_length = 7u32.to_le_bytes();
        header.checksum = 0xDDCC_BBAAu32.to_le_bytes();

        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 1); // version
        assert_eq!(bytes[1], 0x03); // type
        assert_eq!(&bytes[2..4], &0x0004u16.to_le_bytes()); // flags
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]); // sequence LE
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0xDDCC_BBAAu32.to_le_bytes());
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<MessageHeader>()) {
            let bytes = header.to_bytes();
            let parsed = MessageHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(&header, parsed);
        }

        #[test]
        fn header_accessors(header in any::<MessageHeader>()) {
            prop_assert_eq!(header.version(), MessageHeader::VERSION);
            prop_assert!(header.msg_type().is_some());
            prop_assert!(header.payload_length() <= MessageHeader::MAX_PAYLOAD_SIZE);
        }
    }

    #[test]
    fn reject_short_buffer() {
        let short = [0u8; 10];
        let result = MessageHeader::from_bytes(&short);
        assert_eq!(
            result,
            Err(ProtocolError::FrameTooShort { expected: 16, actual: 10 })
        );
    }

    #[test]
    fn reject_bad_version() {
        let mut bytes = MessageHeader::new(MsgType::Handshake, FrameFlags::empty()).to_bytes();
        bytes[0] = 2;
        let result = MessageHeader::from_bytes(&bytes);
        assert_eq!(result, Err(ProtocolError::UnsupportedVersion(2)));
    }

    #[test]
    fn reject_unknown_type() {
        let mut bytes = MessageHeader::new(MsgType::Handshake, FrameFlags::empty()).to_bytes();
        bytes[1] = 0x42;
        let result = MessageHeader::from_bytes(&bytes);
        assert_eq!(result, Err(ProtocolError::UnknownMsgType(0x42)));
    }

    #[test]
    fn reject_oversized_payload() {
        let mut header = MessageHeader::new(MsgType::Command, FrameFlags::empty());
        header.payload_length = (MessageHeader::MAX_PAYLOAD_SIZE + 1).to_le_bytes();
        let bytes = header.to_bytes();
        let result = MessageHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
