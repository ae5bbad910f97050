//! HPACK indexing tables (RFC 7541 Section 2.3)
//!
//! A [`Table`] is the static table followed by one dynamic table. Indices
//! 1..=61 address the static table, 62.. the dynamic table with the most
//! recent insertion first.

use super::decode_error;
use crate::http::h2::error::Result;
use std::collections::VecDeque;

/// Per-entry overhead counted against the table size
pub const ENTRY_OVERHEAD: usize = 32;

/// A header name/value pair as carried by HPACK
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this header field for dynamic table accounting
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// HPACK static table entries: (name, value). 61 entries indexed 1..61.
pub const STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Result of looking a header up for encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Name and value both match the entry at this index
    Full(usize),
    /// Only the name matches
    Name(usize),
}

/// Static table plus one dynamic table
#[derive(Debug, Clone)]
pub struct Table {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl Table {
    /// Create a table with the given dynamic size limit
    pub fn new(max_size: usize) -> Self {
        Table {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Current dynamic occupancy in octets
    pub fn size(&self) -> usize {
        self.size
    }

    /// Dynamic size limit
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of dynamic entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by its combined index
    pub fn get(&self, index: usize) -> Result<(&[u8], &[u8])> {
        if index == 0 {
            return Err(decode_error("index 0 is not a valid table index"));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((name.as_bytes(), value.as_bytes()));
        }
        self.entries
            .get(index - STATIC_TABLE.len() - 1)
            .map(|e| (e.name.as_slice(), e.value.as_slice()))
            .ok_or_else(|| decode_error(format!("index {} beyond table of {} entries", index, self.len())))
    }

    /// Find the best index for a header; full matches win over name matches
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<Match> {
        let mut name_match = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if n.as_bytes() == name {
                if v.as_bytes() == value {
                    return Some(Match::Full(i + 1));
                }
                name_match.get_or_insert(i + 1);
            }
        }
        for (i, e) in self.entries.iter().enumerate() {
            if e.name == name {
                let index = STATIC_TABLE.len() + 1 + i;
                if e.value == value {
                    return Some(Match::Full(index));
                }
                name_match.get_or_insert(index);
            }
        }
        name_match.map(Match::Name)
    }

    /// Insert an entry, evicting the oldest entries until it fits.
    ///
    /// An entry larger than the whole table empties it and is not stored.
    pub fn add(&mut self, field: HeaderField) {
        let entry_size = field.size();
        self.evict_to(self.max_size.saturating_sub(entry_size));
        if entry_size <= self.max_size {
            self.size += entry_size;
            self.entries.push_front(field);
        }
    }

    /// Change the size limit, evicting immediately if it shrank
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => {
                    self.size = 0;
                    break;
                }
            }
        }
    }
}
