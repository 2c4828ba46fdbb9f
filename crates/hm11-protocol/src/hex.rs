//! Uppercase hex conversions used throughout the AT protocol.
//!
//! The module reports identifiers as uppercase ASCII hex and expects them in the
//! same form. These helpers work nibble by nibble on ASCII bytes.

/// Convert a nibble (0..=15) to its uppercase hex character.
fn nibble_to_hex(nibble: u8) -> u8 {
    if nibble > 9 {
        nibble - 10 + b'A'
    } else {
        nibble + b'0'
    }
}

/// Convert an uppercase hex character to its nibble value.
///
/// Characters outside `[0-9A-F]` produce an unspecified value.
fn hex_to_nibble(c: u8) -> u8 {
    if c >= b'A' {
        c.wrapping_sub(b'A').wrapping_add(10)
    } else {
        c.wrapping_sub(b'0')
    }
}

/// Encode a byte as two uppercase hex characters.
pub fn byte_to_hex(b: u8) -> [u8; 2] {
    [nibble_to_hex(b >> 4), nibble_to_hex(b & 0x0F)]
}

/// Decode two uppercase hex characters into a byte.
///
/// This is the inverse of [`byte_to_hex`]. Input outside `[0-9A-F]{2}` yields a
/// meaningless value rather than an error; callers only apply it to text that is
/// already known to be uppercase hex (see [`is_upper_hex`]).
pub fn hex_to_byte(s: [u8; 2]) -> u8 {
    ((hex_to_nibble(s[0]) << 4) & 0xF0) | (hex_to_nibble(s[1]) & 0x0F)
}

/// Encode a `u16` as four uppercase hex characters, most significant byte first.
pub fn u16_to_hex(value: u16) -> String {
    let [hi, lo] = value.to_be_bytes();
    let mut out = String::with_capacity(4);
    for b in [hi, lo] {
        let [a, b] = byte_to_hex(b);
        out.push(a as char);
        out.push(b as char);
    }
    out
}

/// Decode four uppercase hex characters into a `u16`.
///
/// Same contract as [`hex_to_byte`]: the input must already be known to be hex.
pub fn hex_to_u16(s: &[u8; 4]) -> u16 {
    (u16::from(hex_to_byte([s[0], s[1]])) << 8) | u16::from(hex_to_byte([s[2], s[3]]))
}

/// Check that every byte is an uppercase hex digit.
pub fn is_upper_hex(s: &[u8]) -> bool {
    s.iter().all(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F'))
}
