//! Compression plugins.
//!
//! Every compressed body starts with a one-byte marker:
//!
//! | Marker | Meaning |
//! |--------|---------|
//! | `0x00` | stored: the rest is the raw input |
//! | `0x01` | compressed with the plugin's codec |
//!
//! `compress` never fails. When the codec would not shrink the input the
//! body is stored raw, so the worst case is one extra byte.
//!
//! Decompression is bounded by the caller's `max_len`. The LZO-class plugin
//! carries the inflated length in front of the block and checks it before
//! allocating; the zlib plugin decodes through a reader capped at
//! `max_len + 1` bytes.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CompressionError, FrameError};

const MARKER_STORED: u8 = 0x00;
const MARKER_COMPRESSED: u8 = 0x01;

/// Selector for a compression plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Fast, low-ratio LZ77 block codec
    Lzo,
    /// General-purpose zlib (DEFLATE)
    Zlib,
}

impl CompressionKind {
    /// Identifier carried in message headers.
    #[must_use]
    pub fn wire_id(self) -> u8 {
        match self {
            Self::Lzo => 1,
            Self::Zlib => 2,
        }
    }

    /// Parse a wire identifier.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::UnknownCompression` for unassigned identifiers.
    pub fn from_wire_id(id: u8) -> Result<Self, FrameError> {
        match id {
            1 => Ok(Self::Lzo),
            2 => Ok(Self::Zlib),
            other => Err(FrameError::UnknownCompression(other)),
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Lzo => "lzo",
            Self::Zlib => "zlib",
        }
    }

    /// The plugin implementing this kind.
    #[must_use]
    pub fn compressor(self) -> &'static dyn Compressor {
        match self {
            Self::Lzo => &LzoCompressor,
            Self::Zlib => &ZlibCompressor,
        }
    }
}

/// Compression plugin contract.
pub trait Compressor: Send + Sync {
    /// Which kind this plugin implements.
    fn kind(&self) -> CompressionKind;

    /// Compress `input`. Falls back to storing raw bytes.
    fn compress(&self, input: &[u8]) -> Vec<u8>;

    /// Decompress `input`, producing at most `max_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `CompressionError::Corrupt` for malformed input and
    /// `CompressionError::TooLarge` if the output would exceed `max_len`.
    fn decompress(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>, CompressionError>;
}

fn stored(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + input.len());
    out.push(MARKER_STORED);
    out.extend_from_slice(input);
    out
}

fn unstore(raw: &[u8], max_len: usize) -> Result<Vec<u8>, CompressionError> {
    if raw.len() > max_len {
        return Err(CompressionError::TooLarge { limit: max_len });
    }
    Ok(raw.to_vec())
}

/// LZO-class plugin: an LZ4 block with a 4-byte big-endian inflated length.
#[derive(Debug, Clone, Copy, Default)]
pub struct LzoCompressor;

impl Compressor for LzoCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Lzo
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        let Ok(len) = u32::try_from(input.len()) else {
            return stored(input);
        };

        let block = lz4_flex::block::compress(input);
        if 1 + 4 + block.len() >= 1 + input.len() {
            trace!(len = input.len(), "lzo: storing incompressible input");
            return stored(input);
        }

        let mut out = Vec::with_capacity(1 + 4 + block.len());
        out.push(MARKER_COMPRESSED);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&block);
        out
    }

    fn decompress(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>, CompressionError> {
        let (&marker, rest) = input.split_first().ok_or(CompressionError::Corrupt)?;
        match marker {
            MARKER_STORED => unstore(rest, max_len),
            MARKER_COMPRESSED => {
                if rest.len() < 4 {
                    return Err(CompressionError::Corrupt);
                }
                let claimed = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                if claimed > max_len {
                    return Err(CompressionError::TooLarge { limit: max_len });
                }

                let mut out = vec![0u8; claimed];
                let written = lz4_flex::block::decompress_into(&rest[4..], &mut out)
                    .map_err(|_| CompressionError::Corrupt)?;
                if written != claimed {
                    return Err(CompressionError::Corrupt);
                }
                Ok(out)
            }
            _ => Err(CompressionError::Corrupt),
        }
    }
}

/// zlib plugin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibCompressor;

impl ZlibCompressor {
    fn deflate(input: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(vec![MARKER_COMPRESSED], Compression::default());
        encoder.write_all(input)?;
        encoder.finish()
    }
}

impl Compressor for ZlibCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zlib
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        match Self::deflate(input) {
            Ok(out) if out.len() < 1 + input.len() => out,
            _ => {
                trace!(len = input.len(), "zlib: storing incompressible input");
                stored(input)
            }
        }
    }

    fn decompress(&self, input: &[u8], max_len: usize) -> Result<Vec<u8>, CompressionError> {
        let (&marker, rest) = input.split_first().ok_or(CompressionError::Corrupt)?;
        match marker {
            MARKER_STORED => unstore(rest, max_len),
            MARKER_COMPRESSED => {
                let mut out = Vec::new();
                ZlibDecoder::new(rest)
                    .take(max_len as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|_| CompressionError::Corrupt)?;
                if out.len() > max_len {
                    return Err(CompressionError::TooLarge { limit: max_len });
                }
                Ok(out)
            }
            _ => Err(CompressionError::Corrupt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [CompressionKind; 2] = [CompressionKind::Lzo, CompressionKind::Zlib];

    fn compressible() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. ".repeat(200)
    }

    #[test]
    fn test_roundtrip_compressible() {
        let input = compressible();
        for kind in KINDS {
            let c = kind.compressor();
            let packed = c.compress(&input);
            assert_eq!(packed[0], MARKER_COMPRESSED, "{}", kind.name());
            assert!(packed.len() < input.len());
            assert_eq!(c.decompress(&packed, input.len()).unwrap(), input);
        }
    }

    #[test]
    fn test_incompressible_is_stored() {
        let input: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(97) ^ 0x5A).collect();
        for kind in KINDS {
            let packed = kind.compressor().compress(&input);
            assert!(packed.len() <= input.len() + 1);
            assert_eq!(kind.compressor().decompress(&packed, 64).unwrap(), input);
        }
    }

    #[test]
    fn test_empty_input() {
        for kind in KINDS {
            let packed = kind.compressor().compress(&[]);
            assert_eq!(packed, vec![MARKER_STORED]);
            assert!(kind.compressor().decompress(&packed, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_output_limit_enforced() {
        let input = compressible();
        for kind in KINDS {
            let packed = kind.compressor().compress(&input);
            assert_eq!(
                kind.compressor().decompress(&packed, input.len() - 1),
                Err(CompressionError::TooLarge {
                    limit: input.len() - 1
                })
            );
        }
    }

    #[test]
    fn test_stored_limit_enforced() {
        let packed = stored(&[1, 2, 3, 4]);
        for kind in KINDS {
            assert_eq!(
                kind.compressor().decompress(&packed, 3),
                Err(CompressionError::TooLarge { limit: 3 })
            );
        }
    }

    #[test]
    fn test_lzo_claimed_size_checked_first() {
        // Claims 4 GiB with a tiny body; must fail without allocating.
        let crafted = [MARKER_COMPRESSED, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        assert_eq!(
            LzoCompressor.decompress(&crafted, 64511),
            Err(CompressionError::TooLarge { limit: 64511 })
        );
    }

    #[test]
    fn test_zlib_bomb_bounded() {
        let bomb = ZlibCompressor.compress(&vec![0u8; 1 << 20]);
        assert!(bomb.len() < 4096);
        assert_eq!(
            ZlibCompressor.decompress(&bomb, 64511),
            Err(CompressionError::TooLarge { limit: 64511 })
        );
    }

    #[test]
    fn test_corrupt_input() {
        for kind in KINDS {
            let c = kind.compressor();
            assert_eq!(c.decompress(&[], 100), Err(CompressionError::Corrupt));
            assert_eq!(c.decompress(&[0x7F, 1, 2], 100), Err(CompressionError::Corrupt));
            assert_eq!(
                c.decompress(&[MARKER_COMPRESSED, 0, 0, 0, 9, 0xFF, 0xFF], 100),
                Err(CompressionError::Corrupt)
            );
        }
    }

    #[test]
    fn test_wire_ids() {
        for kind in KINDS {
            assert_eq!(CompressionKind::from_wire_id(kind.wire_id()).unwrap(), kind);
            assert_eq!(kind.compressor().kind(), kind);
        }
        assert_eq!(
            CompressionKind::from_wire_id(9),
            Err(FrameError::UnknownCompression(9))
        );
    }
}
