//! HPACK primitive representations (RFC 7541 Section 5)
//!
//! Prefix integers and length-prefixed, optionally Huffman-coded strings.

use super::{decode_error, huffman};
use crate::http::h2::error::{Error, Result};

fn prefix_mask(prefix_bits: u8) -> Result<u8> {
    if !(1..=8).contains(&prefix_bits) {
        return Err(Error::Internal(format!(
            "integer prefix of {} bits is outside 1..=8",
            prefix_bits
        )));
    }
    Ok(((1u16 << prefix_bits) - 1) as u8)
}

/// Encode `value` as a prefix integer.
///
/// `prefix_byte` supplies the bits above the prefix (the representation
/// tag); it must not overlap the prefix itself.
pub fn encode_int(value: usize, prefix_bits: u8, prefix_byte: u8) -> Result<Vec<u8>> {
    let mask = prefix_mask(prefix_bits)?;
    if prefix_byte & mask != 0 {
        return Err(Error::Internal(format!(
            "prefix byte {:#04x} overlaps a {}-bit prefix",
            prefix_byte, prefix_bits
        )));
    }

    let max = mask as usize;
    if value < max {
        return Ok(vec![prefix_byte | value as u8]);
    }

    let mut out = vec![prefix_byte | mask];
    let mut rest = value - max;
    while rest >= 0x80 {
        out.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    out.push(rest as u8);
    Ok(out)
}

/// Decode a prefix integer.
///
/// Returns the bits above the prefix, the value, and the unread input.
pub fn decode_int(input: &[u8], prefix_bits: u8) -> Result<(u8, usize, &[u8])> {
    let mask = prefix_mask(prefix_bits)?;
    let (&first, mut rest) = input
        .split_first()
        .ok_or_else(|| decode_error("integer expected, input exhausted"))?;

    let prefix_byte = first & !mask;
    let mut value = (first & mask) as u64;
    if value < mask as u64 {
        return Ok((prefix_byte, value as usize, rest));
    }

    let mut shift = 0u32;
    loop {
        let (&byte, tail) = rest
            .split_first()
            .ok_or_else(|| decode_error("integer continuation truncated"))?;
        rest = tail;
        if shift > 56 {
            return Err(decode_error("integer overflow"));
        }
        value = value
            .checked_add(((byte & 0x7F) as u64) << shift)
            .ok_or_else(|| decode_error("integer overflow"))?;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    let value = usize::try_from(value).map_err(|_| decode_error("integer overflow"))?;
    Ok((prefix_byte, value, rest))
}

/// Encode a string literal, Huffman-coding it only when that is strictly shorter
pub fn encode_string(s: &[u8]) -> Vec<u8> {
    let huffman_len = huffman::encoded_len(s);
    // prefix_byte is 0x80 or 0 and never overlaps the 7-bit prefix, so
    // encode_int cannot fail here.
    let (mut out, body) = if huffman_len < s.len() {
        (int_unchecked(huffman_len, 0x80), huffman::encode(s))
    } else {
        (int_unchecked(s.len(), 0x00), s.to_vec())
    };
    out.extend_from_slice(&body);
    out
}

fn int_unchecked(value: usize, prefix_byte: u8) -> Vec<u8> {
    encode_int(value, 7, prefix_byte).unwrap_or_default()
}

/// Decode a string literal, returning it and the unread input
pub fn decode_string(input: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let (flags, len, rest) = decode_int(input, 7)?;
    if rest.len() < len {
        return Err(decode_error(format!(
            "string of {} bytes but only {} remain",
            len,
            rest.len()
        )));
    }
    let (raw, rest) = rest.split_at(len);
    let s = if flags & 0x80 != 0 {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((s, rest))
}
