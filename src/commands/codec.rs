//! Bit and counter helpers shared by the value commands.
//!
//! Values are treated as big-endian bit strings: bit offset 0 is the most
//! significant bit of byte 0. Counters are stored as canonical base-10 text.

use bytes::Bytes;

/// Population count for every possible byte.
static POPCOUNT: [u8; 256] = build_popcount_table();

const fn build_popcount_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).count_ones() as u8;
        i += 1;
    }
    table
}

/// Mask selecting `offset`'s bit inside its byte.
#[inline]
pub const fn bit_mask(offset: u64) -> u8 {
    0x80 >> (offset % 8)
}

/// Number of set bits in `bytes`.
pub fn count_bits(bytes: &[u8]) -> u64 {
    bytes.iter().map(|&b| POPCOUNT[b as usize] as u64).sum()
}

/// Reads the bit at `offset`. Bits past the end of `value` are 0.
pub fn get_bit(value: &[u8], offset: u64) -> u8 {
    let index = (offset / 8) as usize;
    match value.get(index) {
        Some(byte) if byte & bit_mask(offset) != 0 => 1,
        _ => 0,
    }
}

/// Sets or clears the bit at `offset`, zero-extending `value` to reach it.
/// Returns the bit's previous value.
pub fn set_bit(value: &mut Vec<u8>, offset: u64, on: bool) -> u8 {
    let index = (offset / 8) as usize;
    if value.len() <= index {
        value.resize(index + 1, 0);
    }

    let mask = bit_mask(offset);
    let previous = u8::from(value[index] & mask != 0);
    if on {
        value[index] |= mask;
    } else {
        value[index] &= !mask;
    }
    previous
}

/// Resolves an inclusive `[start, end]` byte range against a value of
/// `len` bytes. Negative indexes count back from the end. Returns `None`
/// when the range selects nothing.
pub fn clamp_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let resolve = |i: i64| if i < 0 { (len + i).max(0) } else { i };

    let start = resolve(start);
    let end = resolve(end).min(len - 1);
    if start > end {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Parses canonical base-10 text: an optional `-` and digits with no
/// leading zeros. `"-0"`, `"+1"`, `" 1"` and out-of-range values are rejected.
pub fn parse_i64(text: &[u8]) -> Option<i64> {
    let digits = text.strip_prefix(b"-").unwrap_or(text);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits[0] == b'0' && (digits.len() > 1 || digits.len() != text.len()) {
        return None;
    }
    std::str::from_utf8(text).ok()?.parse().ok()
}

/// Formats `n` the way counters are stored.
pub fn format_i64(n: i64) -> Bytes {
    Bytes::from(n.to_string())
}
