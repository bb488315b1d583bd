//! Payload checksum for framing-corruption detection.

/// Computes the 32-bit rotate-left-5 add checksum over `data`.
///
/// Starting from zero, each byte folds in as `c = rotl5(c) + b` with
/// wrapping arithmetic. The empty slice hashes to zero.
///
/// This is a framing integrity check, not a cryptographic hash. It catches
/// truncation and byte corruption on the wire; it does not resist a peer
/// that deliberately forges both payload and checksum.
#[must_use]
pub fn wire_checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |c, &b| c.rotate_left(5).wrapping_add(u32::from(b)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(wire_checksum(&[]), 0);
    }

    #[test]
    fn single_byte_is_identity() {
        assert_eq!(wire_checksum(&[0x00]), 0);
        assert_eq!(wire_checksum(&[0x41]), 0x41);
        assert_eq!(wire_checksum(&[0xFF]), 0xFF);
    }

    #[test]
    fn two_bytes_fold() {
        // rotl5(1) + 2 = 32 + 2
        assert_eq!(wire_checksum(&[1, 2]), 34);
    }

    #[test]
    fn order_sensitive() {
        assert_ne!(wire_checksum(b"ab"), wire_checksum(b"ba"));
    }

    proptest! {
        #[test]
        fn incremental_fold(prefix in any::<Vec<u8>>(), last in any::<u8>()) {
            let mut full = prefix.clone();
            full.push(last);
            let expected =
                wire_checksum(&prefix).rotate_left(5).wrapping_add(u32::from(last));
            prop_assert_eq!(wire_checksum(&full), expected);
        }

        #[test]
        fn deterministic(data in any::<Vec<u8>>()) {
            prop_assert_eq!(wire_checksum(&data), wire_checksum(&data));
        }
    }
}
