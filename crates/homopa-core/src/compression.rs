//! Compression for RPC frames.

use std::io::Read;

use crate::error::{HomopaError, Result};

/// Trait for compression algorithms.
pub trait Compressor: Send + Sync {
    /// Compress data.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress, refusing output larger than `limit` bytes.
    fn decompress_bounded(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        let decompressed = self.decompress(data)?;
        if decompressed.len() > limit {
            return Err(HomopaError::Decompression(format!(
                "Expected at most {} bytes, got {}",
                limit,
                decompressed.len()
            )));
        }
        Ok(decompressed)
    }
}

/// Zstd compressor with configurable level.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Create a new Zstd compressor with default level (3).
    #[must_use]
    pub fn new() -> Self {
        Self::with_level(3)
    }

    /// Create a new Zstd compressor with specified level.
    ///
    /// Level ranges from -7 (fastest) to 22 (best compression).
    #[must_use]
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| HomopaError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| HomopaError::Decompression(e.to_string()))
    }

    /// Streams the frame and stops reading one byte past `limit`.
    fn decompress_bounded(&self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        let decoder = zstd::stream::read::Decoder::new(data)
            .map_err(|e| HomopaError::Decompression(e.to_string()))?;
        let mut decompressed = Vec::new();
        decoder
            .take(limit as u64 + 1)
            .read_to_end(&mut decompressed)
            .map_err(|e| HomopaError::Decompression(e.to_string()))?;
        if decompressed.len() > limit {
            return Err(HomopaError::Decompression(format!("Expected at most {limit} bytes")));
        }
        Ok(decompressed)
    }
}
