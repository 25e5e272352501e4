use crate::dex::error::DexError;

/// Longest LEB128 encoding of a 32-bit value.
pub const MAX_LEB128_LENGTH: usize = 5;

pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::with_capacity(MAX_LEB128_LENGTH);
    let mut remaining = value;

    if remaining == 0 {
        result.push(0);
        return result;
    }

    while remaining != 0 {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);
    }

    result
}

/// Decodes an unsigned LEB128 value.
///
/// Padded (non-canonical) encodings are accepted and bits above the 32nd are
/// dropped, matching how dex tooling treats wide index deltas. Running out of
/// input, or a fifth byte that still has its continuation bit set, is an error.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Result<(u32, usize), DexError> {
    let mut value: u32 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in encoded.iter().take(MAX_LEB128_LENGTH).enumerate() {
        value = value.wrapping_add(((byte & 0x7F) as u32).wrapping_shl(shift));
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    if encoded.len() < MAX_LEB128_LENGTH {
        fail!("Unexpected end of stream in uleb128 value");
    }
    fail!("Invalid uleb128 integer: continuation bit set after {} bytes", MAX_LEB128_LENGTH);
}

pub(crate) fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::with_capacity(MAX_LEB128_LENGTH);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let mut value: i32 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in encoded.iter().take(MAX_LEB128_LENGTH).enumerate() {
        value |= ((byte & 0x7F) as i32).wrapping_shl(shift);
        shift += 7;
        if byte & 0x80 == 0 {
            // sign-extend from the last payload bit when fewer than 32 bits were read
            if (byte & 0x40) != 0 && shift < 32 {
                value |= (-1i32).wrapping_shl(shift);
            }
            return Ok((value, i + 1));
        }
    }

    if encoded.len() < MAX_LEB128_LENGTH {
        fail!("Unexpected end of stream in sleb128 value");
    }
    fail!("Invalid sleb128 integer: continuation bit set after {} bytes", MAX_LEB128_LENGTH);
}

pub(crate) fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128(value.wrapping_add(1) as u32)
}

pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let (v, c) = decode_uleb128(encoded)?;
    Ok(((v as i32).wrapping_sub(1), c))
}

pub(crate) fn uleb128_size(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (0x7fff_ffff, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_uleb128(value), expected);
            assert_eq!(uleb128_size(value), expected.len());
        }
    }

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], 127),
            (vec![0x80, 0x01], 128),
            (vec![0x80, 0x7F], 16256),
            (vec![0xE5, 0x8E, 0x26], 624485),
            (vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07], 0x7fff_ffff),
        ];

        for (encoded, expected) in cases {
            let (v, c) = decode_uleb128(&encoded).expect("valid uleb128");
            assert_eq!(v, expected);
            assert_eq!(c, encoded.len());
        }
    }

    #[test]
    fn padded_uleb128_decodes_and_reencodes_short() {
        let (v, c) = decode_uleb128(&[0x85, 0x80, 0x80, 0x80, 0x00]).expect("padded uleb128");
        assert_eq!((v, c), (5, 5));
        assert_eq!(encode_uleb128(v), vec![0x05]);
    }

    #[test]
    fn oversized_uleb128_wraps() {
        // 0xf in the fifth byte pushes bits past 32; they are dropped
        let (v, _) = decode_uleb128(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]).expect("wide uleb128");
        assert_eq!(v, 0xffff_ffff);
    }

    #[test]
    fn uleb128_rejects_sixth_byte() {
        assert!(decode_uleb128(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]).is_err());
        assert!(decode_uleb128(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn test_encode_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
            (-128, vec![0x80, 0x7F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_sleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_sleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], -1),
            (vec![0xFF, 0x00], 127),
            (vec![0x80, 0x7F], -128),
            (vec![0xC0, 0xBB, 0x78], -123456),
            (vec![0x80, 0x80, 0x80, 0x80, 0x78], i32::MIN),
        ];

        for (encoded, expected) in cases {
            let (v, _) = decode_sleb128(&encoded).expect("valid sleb128");
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn uleb128p1_maps_minus_one_to_zero() {
        assert_eq!(encode_uleb128p1(-1), vec![0x00]);
        assert_eq!(decode_uleb128p1(&[0x00]).expect("p1"), (-1, 1));
        assert_eq!(decode_uleb128p1(&[0x2b]).expect("p1"), (42, 1));
    }
}
