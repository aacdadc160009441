//! Variable-length integer encoding (LEB128).
//!
//! Cell lengths are stored as varints so small keys and values cost a
//! single length byte.

/// Append `value` to `buf` as a varint.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Encode a u64 as a standalone varint.
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(varint_size(value));
    put_varint(&mut buf, value);
    buf
}

/// Decode a varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// encoding is truncated or longer than 10 bytes.
pub fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;

    for (i, &byte) in bytes.iter().enumerate().take(10) {
        let shift = 7 * i as u32;
        let bits = (byte & 0x7F) as u64;
        if shift == 63 && bits > 1 {
            return None;
        }
        value |= bits << shift;

        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }

    None
}

/// Number of bytes `value` occupies when encoded.
pub fn varint_size(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for &value in &[0u64, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let encoded = encode_varint(value);
            assert_eq!(encoded.len(), varint_size(value), "size for {}", value);
            assert_eq!(decode_varint(&encoded), Some((value, encoded.len())));
        }
    }

    #[test]
    fn test_varint_size() {
        assert_eq!(varint_size(0), 1);
        assert_eq!(varint_size(127), 1);
        assert_eq!(varint_size(128), 2);
        assert_eq!(varint_size(u64::MAX), 10);
    }

    #[test]
    fn test_decode_truncated() {
        assert!(decode_varint(&[]).is_none());
        assert!(decode_varint(&[0x80, 0x80]).is_none());
    }
}
