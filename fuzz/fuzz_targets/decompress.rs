//! Fuzz target for the compression plugins
//!
//! Decompression of hostile input must stay within its bound, and anything
//! compressed must come back unchanged.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sidp_core::CompressionKind;

#[derive(Debug, Arbitrary)]
struct DecompressInput {
    zlib: bool,
    max_len: u16,
    data: Vec<u8>,
}

fuzz_target!(|input: DecompressInput| {
    let kind = if input.zlib {
        CompressionKind::Zlib
    } else {
        CompressionKind::Lzo
    };
    let c = kind.compressor();

    if let Ok(out) = c.decompress(&input.data, input.max_len as usize) {
        assert!(out.len() <= input.max_len as usize);
    }

    let packed = c.compress(&input.data);
    assert!(packed.len() <= input.data.len() + 1);
    let unpacked = c
        .decompress(&packed, input.data.len())
        .expect("compressed data must decompress");
    assert_eq!(unpacked, input.data);
});
