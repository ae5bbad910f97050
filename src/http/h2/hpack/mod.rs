//! HPACK header compression (RFC 7541)
//!
//! [`Encoder`] and [`Decoder`] each own one dynamic table: the encoder's
//! mirrors the table the peer builds while decoding our header blocks, the
//! decoder's is built from the peer's blocks. [`HPack`] bundles the pair
//! for one connection.
//!
//! Every decoding failure is a connection COMPRESSION_ERROR, since the
//! shared table state can no longer be trusted.

pub mod encoding;
pub mod huffman;
pub mod table;

pub use self::encoding::{decode_int, decode_string, encode_int, encode_string};
pub use self::table::{HeaderField, Match, Table, STATIC_TABLE};

use super::error::{Error, ErrorCode, Result};
use super::DEFAULT_HEADER_TABLE_SIZE;
use tracing::trace;

pub(crate) fn decode_error(reason: impl Into<String>) -> Error {
    Error::connection(ErrorCode::CompressionError, reason)
}

/// Header names that are always sent as never-indexed literals
const SENSITIVE: &[&[u8]] = &[b"authorization", b"proxy-authorization", b"cookie", b"set-cookie"];

/// Whether literals not found in the table are added to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexPolicy {
    /// Add every literal to the dynamic table
    #[default]
    Incremental,
    /// Send literals without indexing
    Never,
}

/// Header block encoder
#[derive(Debug, Clone)]
pub struct Encoder {
    table: Table,
    policy: IndexPolicy,
    /// Smallest and latest sizes set since the last header block
    pending_size_update: Option<(usize, usize)>,
}

impl Encoder {
    /// Create an encoder with the given dynamic table size
    pub fn new(max_size: usize) -> Self {
        Encoder {
            table: Table::new(max_size),
            policy: IndexPolicy::default(),
            pending_size_update: None,
        }
    }

    /// Set the indexing policy
    pub fn with_policy(mut self, policy: IndexPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The encoder's dynamic table
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Resize the table; the next header block starts with a size update.
    ///
    /// If the size went down and back up in between, the smallest size is
    /// signalled first so the peer evicts the same entries.
    pub fn set_max_size(&mut self, max_size: usize) {
        if max_size == self.table.max_size() && self.pending_size_update.is_none() {
            return;
        }
        self.table.set_max_size(max_size);
        let smallest = self
            .pending_size_update
            .map_or(max_size, |(smallest, _)| smallest.min(max_size));
        self.pending_size_update = Some((smallest, max_size));
    }

    /// Encode a header list into one header block
    pub fn encode<I, N, V>(&mut self, headers: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        if let Some((smallest, size)) = self.pending_size_update.take() {
            trace!(smallest, size, "hpack: emitting table size update");
            if smallest < size {
                put_int(&mut out, smallest, 5, 0x20);
            }
            put_int(&mut out, size, 5, 0x20);
        }
        for (name, value) in headers {
            self.encode_field(&mut out, name.as_ref(), value.as_ref());
        }
        out
    }

    fn encode_field(&mut self, out: &mut Vec<u8>, name: &[u8], value: &[u8]) {
        let sensitive = SENSITIVE.contains(&name);
        let found = self.table.find(name, value);

        if let (Some(Match::Full(index)), false) = (found, sensitive) {
            put_int(out, index, 7, 0x80);
            return;
        }

        let name_index = match found {
            Some(Match::Full(i)) | Some(Match::Name(i)) => Some(i),
            None => None,
        };
        if sensitive {
            put_literal(out, name_index, name, value, 4, 0x10);
        } else if self.policy == IndexPolicy::Incremental {
            put_literal(out, name_index, name, value, 6, 0x40);
            self.table.add(HeaderField::new(name, value));
        } else {
            put_literal(out, name_index, name, value, 4, 0x00);
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE as usize)
    }
}

fn put_int(out: &mut Vec<u8>, value: usize, prefix_bits: u8, tag: u8) {
    // Tags used here never overlap their prefix.
    if let Ok(bytes) = encode_int(value, prefix_bits, tag) {
        out.extend_from_slice(&bytes);
    }
}

fn put_literal(out: &mut Vec<u8>, name_index: Option<usize>, name: &[u8], value: &[u8], prefix_bits: u8, tag: u8) {
    match name_index {
        Some(index) => put_int(out, index, prefix_bits, tag),
        None => {
            put_int(out, 0, prefix_bits, tag);
            out.extend_from_slice(&encode_string(name));
        }
    }
    out.extend_from_slice(&encode_string(value));
}

/// Header block decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    table: Table,
    max_allowed: usize,
}

impl Decoder {
    /// Create a decoder; `max_size` is the HEADER_TABLE_SIZE we advertise
    pub fn new(max_size: usize) -> Self {
        Decoder {
            table: Table::new(max_size),
            max_allowed: max_size,
        }
    }

    /// The decoder's dynamic table
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Change the largest table size the peer may select
    pub fn set_max_allowed(&mut self, max_size: usize) {
        self.max_allowed = max_size;
        if self.table.max_size() > max_size {
            self.table.set_max_size(max_size);
        }
    }

    /// Decode a complete header block
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        let mut fields = Vec::new();
        let mut rest = block;

        while let Some(&first) = rest.first() {
            if first & 0x80 != 0 {
                // Indexed header field
                let (_, index, tail) = decode_int(rest, 7)?;
                let (name, value) = self.table.get(index)?;
                fields.push(HeaderField::new(name, value));
                rest = tail;
            } else if first & 0xC0 == 0x40 {
                // Literal with incremental indexing
                let (field, tail) = self.literal(rest, 6)?;
                self.table.add(field.clone());
                fields.push(field);
                rest = tail;
            } else if first & 0xE0 == 0x20 {
                // Dynamic table size update
                if !fields.is_empty() {
                    return Err(decode_error("table size update after header field"));
                }
                let (_, size, tail) = decode_int(rest, 5)?;
                if size > self.max_allowed {
                    return Err(decode_error(format!(
                        "table size update to {} exceeds limit {}",
                        size, self.max_allowed
                    )));
                }
                self.table.set_max_size(size);
                rest = tail;
            } else {
                // Literal without indexing / never indexed
                let (field, tail) = self.literal(rest, 4)?;
                fields.push(field);
                rest = tail;
            }
        }
        Ok(fields)
    }

    fn literal<'a>(&self, input: &'a [u8], prefix_bits: u8) -> Result<(HeaderField, &'a [u8])> {
        let (_, index, rest) = decode_int(input, prefix_bits)?;
        let (name, rest) = if index == 0 {
            decode_string(rest)?
        } else {
            (self.table.get(index)?.0.to_vec(), rest)
        };
        let (value, rest) = decode_string(rest)?;
        Ok((HeaderField { name, value }, rest))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE as usize)
    }
}

/// Both directions of a connection's header compression
#[derive(Debug, Clone, Default)]
pub struct HPack {
    pub encoder: Encoder,
    pub decoder: Decoder,
}

impl HPack {
    /// Create with explicit table sizes for each direction
    pub fn new(encoder_size: usize, decoder_size: usize) -> Self {
        HPack {
            encoder: Encoder::new(encoder_size),
            decoder: Decoder::new(decoder_size),
        }
    }

    /// Encode an outbound header list
    pub fn encode<I, N, V>(&mut self, headers: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.encoder.encode(headers)
    }

    /// Decode an inbound header block
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        self.decoder.decode(block)
    }
}
