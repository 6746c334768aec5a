//! Common Utilities
//!
//! Bit-level value helpers and streaming sample word packing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Interpret the low `width` bits of `raw` as a two's complement value
pub fn sign_extend(raw: u64, width: u8) -> i64 {
    let shift = 64 - width as u32;
    ((raw << shift) as i64) >> shift
}

/// Low `width` bits of a value, as stored in a register field
pub fn to_field(value: i64, width: u8) -> u32 {
    let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    (value as u32) & mask
}

/// Drop the `bits` least significant bits (arithmetic shift)
pub fn truncate_value(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        if value < 0 { -1 } else { 0 }
    } else {
        value >> bits
    }
}

/// Pack a sample into a 32-bit stream word: I in [15:0], Q in [31:16]
pub fn pack_sample_word(i: i64, q: i64) -> u32 {
    (to_field(q, 16) << 16) | to_field(i, 16)
}

/// Unpack a 32-bit stream word into signed `(i, q)`
pub fn unpack_sample_word(word: u32) -> (i64, i64) {
    (
        sign_extend((word & 0xffff) as u64, 16),
        sign_extend((word >> 16) as u64, 16),
    )
}

/// Serialize stream words as little-endian bytes for host transfer
pub fn pack_words(words: &[u32]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(words.len() * 4);

    for &word in words {
        bytes.put_u32_le(word);
    }

    trace!("Packed {} stream words", words.len());
    bytes.freeze()
}

/// Parse little-endian bytes back into stream words, ignoring a partial tail
pub fn unpack_words(mut data: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity(data.len() / 4);

    while data.remaining() >= 4 {
        words.push(data.get_u32_le());
    }

    words
}

/// Convert stream words to a hex string for debugging
pub fn words_to_hex(words: &[u32]) -> String {
    words
        .iter()
        .map(|w| format!("{:08x}", w))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x3ff, 10), -1);
        assert_eq!(sign_extend(0x1ff, 10), 511);
        assert_eq!(sign_extend(0x200, 10), -512);
    }

    #[test]
    fn test_to_field() {
        assert_eq!(to_field(-1, 10), 0x3ff);
        assert_eq!(to_field(5, 10), 5);
        assert_eq!(to_field(-1, 32), u32::MAX);
    }

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value(1023, 3), 127);
        assert_eq!(truncate_value(-1, 3), -1);
        assert_eq!(truncate_value(-9, 3), -2);
        assert_eq!(truncate_value(-9, 70), -1);
    }

    #[test]
    fn test_sample_word_layout() {
        let word = pack_sample_word(-2, 3);
        assert_eq!(word, 0x0003_fffe);
        assert_eq!(unpack_sample_word(word), (-2, 3));
    }

    #[test]
    fn test_word_stream() {
        let packed = pack_words(&[0x0403_0201, 0xdead_beef]);
        assert_eq!(&packed[..4], &[1, 2, 3, 4]);
        assert_eq!(unpack_words(&packed), vec![0x0403_0201, 0xdead_beef]);
        assert_eq!(unpack_words(&packed[..7]), vec![0x0403_0201]);
        assert_eq!(words_to_hex(&[0x1, 0xabcd]), "00000001 0000abcd");
    }
}
