//! Tests for HPACK decoding

use h2_mux::{ErrorCode, HpackDecoder};

use super::headers;

// RFC 7541 C.3: requests without Huffman coding, sharing one context.
const C3_1: &[u8] = &[
    0x82, 0x86, 0x84, 0x41, 0x0f, 0x77, 0x77, 0x77, 0x2e, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c,
    0x65, 0x2e, 0x63, 0x6f, 0x6d,
];
const C3_2: &[u8] = &[
    0x82, 0x86, 0x84, 0xbe, 0x58, 0x08, 0x6e, 0x6f, 0x2d, 0x63, 0x61, 0x63, 0x68, 0x65,
];

#[test]
fn test_decode_first_request() {
    let mut decoder = HpackDecoder::new();
    let decoded = decoder.decode(C3_1).unwrap();
    assert_eq!(
        decoded,
        headers(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
        ])
    );
}

#[test]
fn test_decode_uses_dynamic_table_across_blocks() {
    let mut decoder = HpackDecoder::new();
    decoder.decode(C3_1).unwrap();
    let decoded = decoder.decode(C3_2).unwrap();
    assert_eq!(
        decoded,
        headers(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
            ("cache-control", "no-cache"),
        ])
    );
}

#[test]
fn test_dynamic_reference_without_context_fails() {
    // C3_2 refers to index 62, which only exists after C3_1
    let mut decoder = HpackDecoder::new();
    let err = decoder.decode(C3_2).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::CompressionError));
}

#[test]
fn test_size_update_within_limit_accepted() {
    let mut decoder = HpackDecoder::new();
    // size update to 0 then :method GET
    assert_eq!(decoder.decode(&[0x20, 0x82]).unwrap(), headers(&[(":method", "GET")]));
}

#[test]
fn test_size_update_above_advertised_limit_rejected() {
    let mut decoder = HpackDecoder::new();
    assert_eq!(decoder.max_table_size(), 4096);
    // size update to 8192
    let err = decoder.decode(&[0x3f, 0xe1, 0x3f, 0x82]).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), Some(ErrorCode::CompressionError));
}

#[test]
fn test_raised_limit_allows_larger_update() {
    let mut decoder = HpackDecoder::new();
    decoder.set_max_table_size(8192);
    assert!(decoder.decode(&[0x3f, 0xe1, 0x3f, 0x82]).is_ok());
}

#[test]
fn test_truncated_block_rejected() {
    let mut decoder = HpackDecoder::new();
    // literal with a 15-byte value but only 3 bytes present
    let err = decoder.decode(&[0x41, 0x0f, 0x77, 0x77, 0x77]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::CompressionError));
}

#[test]
fn test_empty_block_decodes_to_empty_list() {
    let mut decoder = HpackDecoder::new();
    assert!(decoder.decode(&[]).unwrap().is_empty());
}
