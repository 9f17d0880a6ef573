//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! Decoding wraps `fluke-hpack`; encoding is done here against our own
//! [`DynamicTable`] so that table size changes requested by the peer can be
//! signalled precisely. Strings are always emitted without Huffman coding.

use crate::error::{ErrorCode, H2Error};
use crate::hpack_table::{entry_size, DynamicTable, TableMatch, ENTRY_OVERHEAD};
use crate::settings::DEFAULT_HEADER_TABLE_SIZE;

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// An ordered header list. Duplicate names are allowed.
pub type HeaderBlock = Vec<H2Header>;

/// Header list size as counted by SETTINGS_MAX_HEADER_LIST_SIZE.
pub fn header_list_size(headers: &[H2Header]) -> usize {
    headers.iter().map(|h| h.name.len() + h.value.len() + ENTRY_OVERHEAD).sum()
}

/// Check that pseudo-headers precede regular headers and names are
/// lowercase and non-empty.
pub fn validate_header_block(headers: &[H2Header]) -> Result<(), String> {
    let mut seen_regular = false;
    for h in headers {
        if h.name.is_empty() || h.name == ":" {
            return Err("empty header name".to_string());
        }
        if h.name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(format!("header name {:?} is not lowercase", h.name));
        }
        if h.is_pseudo() {
            if seen_regular {
                return Err(format!("pseudo-header {} after regular header", h.name));
            }
        } else {
            seen_regular = true;
        }
    }
    Ok(())
}

/// Names whose values must never enter a compression table.
const SENSITIVE: [&str; 4] = ["authorization", "proxy-authorization", "cookie", "set-cookie"];

/// HPACK decoder for HTTP/2 header blocks.
/// Wraps `fluke_hpack::Decoder` which maintains dynamic table state per-connection.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
    max_table_size: usize,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder")
            .field("max_table_size", &self.max_table_size)
            .finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        let mut inner = fluke_hpack::Decoder::new();
        inner.set_max_allowed_table_size(DEFAULT_HEADER_TABLE_SIZE as usize);
        Self {
            inner,
            max_table_size: DEFAULT_HEADER_TABLE_SIZE as usize,
        }
    }

    /// The largest table size the peer may select: our advertised
    /// SETTINGS_HEADER_TABLE_SIZE. Larger size updates fail to decode.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
        self.inner.set_max_allowed_table_size(size);
    }

    pub fn max_table_size(&self) -> usize {
        self.max_table_size
    }

    /// Decode an HPACK-encoded header block. Any failure leaves the
    /// compression context unusable and is a connection COMPRESSION_ERROR.
    pub fn decode(&mut self, data: &[u8]) -> Result<HeaderBlock, H2Error> {
        check_size_update_framing(data)?;
        let pairs = self
            .inner
            .decode(data)
            .map_err(|e| H2Error::connection(ErrorCode::CompressionError, format!("HPACK decode error: {:?}", e)))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                H2Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }

}

/// `fluke-hpack` assumes a dynamic table size update carries a complete
/// integer. Reject leading updates whose integer is truncated or longer
/// than the five octets it accepts.
fn check_size_update_framing(mut data: &[u8]) -> Result<(), H2Error> {
    while let Some(&first) = data.first() {
        if first & 0xe0 != 0x20 {
            break;
        }
        let mut len = 1;
        if first & 0x1f == 0x1f {
            let end = data[1..]
                .iter()
                .take(4)
                .position(|b| b & 0x80 == 0)
                .ok_or_else(|| H2Error::connection(ErrorCode::CompressionError, "malformed table size update"))?;
            len += end + 1;
        }
        data = &data[len..];
    }
    Ok(())
}

/// HPACK encoder for HTTP/2 header blocks.
#[derive(Debug, Clone)]
pub struct HpackEncoder {
    table: DynamicTable,
    /// Smallest and final size requested since the last block.
    pending_resize: Option<(usize, usize)>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            pending_resize: None,
        }
    }

    /// Record the peer's SETTINGS_HEADER_TABLE_SIZE. The change is signalled
    /// at the start of the next encoded block.
    pub fn set_max_table_size(&mut self, size: usize) {
        let min = match self.pending_resize {
            Some((min, _)) => min.min(size),
            None => self.table.max_size().min(size),
        };
        self.pending_resize = Some((min, size));
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Encode headers into an HPACK header block.
    pub fn encode(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let mut buf = Vec::new();

        if let Some((min, last)) = self.pending_resize.take() {
            if min < last {
                encode_integer(&mut buf, 0x20, 5, min);
                self.table.set_max_size(min);
            }
            encode_integer(&mut buf, 0x20, 5, last);
            self.table.set_max_size(last);
        }

        for h in headers {
            self.encode_header(&mut buf, h);
        }
        buf
    }

    fn encode_header(&mut self, buf: &mut Vec<u8>, h: &H2Header) {
        let found = self.table.find(&h.name, &h.value);

        if SENSITIVE.contains(&h.name.as_str()) {
            // Literal never indexed
            let name_index = match found {
                Some(TableMatch::Full(i)) | Some(TableMatch::Name(i)) => i,
                None => 0,
            };
            encode_literal(buf, 0x10, 4, name_index, h);
            return;
        }

        match found {
            Some(TableMatch::Full(i)) => encode_integer(buf, 0x80, 7, i),
            other => {
                let name_index = match other {
                    Some(TableMatch::Name(i)) => i,
                    _ => 0,
                };
                if entry_size(&h.name, &h.value) > self.table.max_size() {
                    // Literal without indexing
                    encode_literal(buf, 0x00, 4, name_index, h);
                } else {
                    // Literal with incremental indexing
                    encode_literal(buf, 0x40, 6, name_index, h);
                    self.table.insert(h.name.clone(), h.value.clone());
                }
            }
        }
    }
}

fn encode_literal(buf: &mut Vec<u8>, pattern: u8, prefix: u8, name_index: usize, h: &H2Header) {
    encode_integer(buf, pattern, prefix, name_index);
    if name_index == 0 {
        encode_string(buf, h.name.as_bytes());
    }
    encode_string(buf, h.value.as_bytes());
}

/// Integer representation (RFC 7541 Section 5.1).
pub(crate) fn encode_integer(buf: &mut Vec<u8>, pattern: u8, prefix: u8, value: usize) {
    let max = (1usize << prefix) - 1;
    if value < max {
        buf.push(pattern | value as u8);
        return;
    }
    buf.push(pattern | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        buf.push((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    buf.push(rest as u8);
}

fn encode_string(buf: &mut Vec<u8>, s: &[u8]) {
    encode_integer(buf, 0x00, 7, s.len());
    buf.extend_from_slice(s);
}

// ============================================================================
// Tests
// ============================================================================
