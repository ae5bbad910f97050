//! Huffman codec for HPACK string literals (RFC 7541 Appendix B)

use super::decode_error;
use crate::http::h2::error::Result;
use std::sync::OnceLock;

/// `(code, bit length)` per symbol; index 256 is EOS.
static CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

const EOS: u16 = 256;

/// Decode tree node: child indices, or a symbol for leaves
#[derive(Clone, Copy)]
enum Node {
    Branch([u32; 2]),
    Leaf(u16),
}

fn tree() -> &'static [Node] {
    static TREE: OnceLock<Vec<Node>> = OnceLock::new();
    TREE.get_or_init(build_tree)
}

fn build_tree() -> Vec<Node> {
    // Index 0 is the root; a child index of 0 means "no child yet".
    let mut nodes = vec![Node::Branch([0, 0])];
    for (sym, &(code, bits)) in CODES.iter().enumerate() {
        let mut at = 0usize;
        for shift in (0..bits).rev() {
            let bit = ((code >> shift) & 1) as usize;
            let Node::Branch(children) = nodes[at] else {
                break;
            };
            if shift == 0 {
                nodes.push(Node::Leaf(sym as u16));
            } else if children[bit] != 0 {
                at = children[bit] as usize;
                continue;
            } else {
                nodes.push(Node::Branch([0, 0]));
            }
            let child = (nodes.len() - 1) as u32;
            if let Node::Branch(ref mut c) = nodes[at] {
                c[bit] = child;
            }
            at = child as usize;
        }
    }
    nodes
}

/// Length of the Huffman encoding of `data` in bytes
pub fn encoded_len(data: &[u8]) -> usize {
    let bits: usize = data.iter().map(|&b| CODES[b as usize].1 as usize).sum();
    bits.div_ceil(8)
}

/// Huffman-encode `data`, padding the last byte with the EOS prefix
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(data));
    let mut acc: u64 = 0;
    let mut pending = 0u32;

    for &byte in data {
        let (code, bits) = CODES[byte as usize];
        acc = (acc << bits) | code as u64;
        pending += bits as u32;
        while pending >= 8 {
            pending -= 8;
            out.push((acc >> pending) as u8);
        }
    }
    if pending > 0 {
        let fill = 8 - pending;
        out.push(((acc << fill) | ((1u64 << fill) - 1)) as u8);
    }
    out
}

/// Decode a Huffman string.
///
/// Fails on an embedded EOS, on a code path that leads nowhere, and on
/// trailing padding that is longer than 7 bits or not all ones.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let nodes = tree();
    let mut out = Vec::with_capacity(data.len() * 8 / 5);
    let mut at = 0usize;
    let mut tail_bits = 0u32;
    let mut tail_ones = true;

    for &byte in data {
        for shift in (0..8).rev() {
            let bit = ((byte >> shift) & 1) as usize;
            let Node::Branch(children) = nodes[at] else {
                return Err(decode_error("corrupt huffman tree walk"));
            };
            let next = children[bit] as usize;
            if next == 0 {
                return Err(decode_error("invalid huffman code"));
            }
            tail_bits += 1;
            tail_ones &= bit == 1;
            match nodes[next] {
                Node::Leaf(EOS) => return Err(decode_error("EOS inside huffman string")),
                Node::Leaf(sym) => {
                    out.push(sym as u8);
                    at = 0;
                    tail_bits = 0;
                    tail_ones = true;
                }
                Node::Branch(_) => at = next,
            }
        }
    }

    if tail_bits > 7 || !tail_ones {
        return Err(decode_error("invalid huffman padding"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(b"www.example.com"), hex("f1e3c2e5f23a6ba0ab90f4ff"));
        assert_eq!(encode(b"no-cache"), hex("a8eb10649cbf"));
        assert_eq!(encode(b"custom-key"), hex("25a849e95ba97d7f"));
        assert_eq!(
            encode(b"Thu, 24 Oct 2013 18:32:21 GMT"),
            hex("df3dbf4a09a535112a08016540bd71915c1054c5a37f")
        );
    }

    #[test]
    fn test_decode_known_vectors() {
        assert_eq!(decode(&hex("f1e3c2e5f23a6ba0ab90f4ff")).unwrap(), b"www.example.com");
        assert_eq!(decode(&hex("25a849e95bb8e8b4bf")).unwrap(), b"custom-value");
    }

    #[test]
    fn test_roundtrip_all_bytes() {
        let input: Vec<u8> = (0..=255).collect();
        let encoded = encode(&input);
        assert_eq!(encoded.len(), encoded_len(&input));
        assert_eq!(decode(&encoded).unwrap(), input);
    }

    #[test]
    fn test_empty_string() {
        assert!(encode(b"").is_empty());
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_long_padding() {
        assert!(decode(&[0x3F, 0xFF, 0xFF, 0xFF]).is_err());
        assert!(decode(&[0xFF]).is_err());
    }

    #[test]
    fn test_rejects_zero_padding() {
        // 'a' is 00011; pad bits must be ones
        assert!(decode(&[0x18]).is_err());
        assert_eq!(decode(&[0x1F]).unwrap(), b"a");
    }

    #[test]
    fn test_rejects_eos() {
        assert!(decode(&[0xFF, 0xFF, 0xFF, 0xFC]).is_err());
    }
}
