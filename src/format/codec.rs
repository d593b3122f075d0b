//! Opaque page codec.

use std::io::{self, Read};

use super::FormatError;

/// Default zstd level used when a codec is built without an explicit level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compression applied to page bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CompressionKind {
    /// Store page bodies verbatim.
    #[default]
    Uncompressed,
    /// zstd block compression.
    Zstd,
}

impl CompressionKind {
    /// On-disk discriminant.
    pub const fn as_u8(self) -> u8 {
        match self {
            CompressionKind::Uncompressed => 0,
            CompressionKind::Zstd => 1,
        }
    }
}

impl TryFrom<u8> for CompressionKind {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionKind::Uncompressed),
            1 => Ok(CompressionKind::Zstd),
            _ => Err(FormatError::Corrupt("unknown compression kind")),
        }
    }
}

/// Compressor bound to one [`CompressionKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    kind: CompressionKind,
    level: i32,
}

impl Codec {
    /// Build a codec using the default zstd level.
    pub fn new(kind: CompressionKind) -> Self {
        Self::with_level(kind, DEFAULT_ZSTD_LEVEL)
    }

    /// Build a codec with an explicit zstd level (ignored when uncompressed).
    pub fn with_level(kind: CompressionKind, level: i32) -> Self {
        Self { kind, level }
    }

    /// Compression kind recorded in chunk headers.
    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// zstd level used by [`Codec::compress`].
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Worst-case size of `len` input bytes after compression.
    pub fn max_compressed_len(&self, len: usize) -> usize {
        match self.kind {
            CompressionKind::Uncompressed => len,
            CompressionKind::Zstd => zstd::zstd_safe::compress_bound(len),
        }
    }

    /// Compress one page body.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, FormatError> {
        match self.kind {
            CompressionKind::Uncompressed => Ok(data.to_vec()),
            CompressionKind::Zstd => {
                let mut out = vec![0u8; self.max_compressed_len(data.len())];
                let written = zstd::bulk::compress_to_buffer(data, &mut out[..], self.level)
                    .map_err(FormatError::Codec)?;
                out.truncate(written);
                Ok(out)
            }
        }
    }

    /// Restore a page body whose original length is `uncompressed_len`.
    ///
    /// `uncompressed_len` comes from disk, so the output grows with the bytes
    /// actually produced and never reads past one byte beyond the declared
    /// length.
    pub fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>, FormatError> {
        match self.kind {
            CompressionKind::Uncompressed => {
                if data.len() != uncompressed_len {
                    return Err(FormatError::Corrupt("stored page length mismatch"));
                }
                Ok(data.to_vec())
            }
            CompressionKind::Zstd => {
                let decoder = zstd::Decoder::new(data).map_err(FormatError::Codec)?;
                let mut out = Vec::new();
                decoder
                    .take(uncompressed_len as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(FormatError::Codec)?;
                if out.len() != uncompressed_len {
                    return Err(FormatError::Codec(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "decompressed page length mismatch",
                    )));
                }
                Ok(out)
            }
        }
    }
}
