/*!
Compression adapters for export files.

Exports are plain JSON by default; gzip keeps large task histories small on
disk. Import detects gzip by its magic bytes, so either form can be read back.
*/

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

use crate::{Result, TaskflowError};

/// First two bytes of every gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression abstraction for export files
pub trait CompressionAdapter {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Name of the compression algorithm
    fn algorithm_name(&self) -> &str;

    /// File extension appended to exports written with this adapter
    fn file_extension(&self) -> &str;
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use taskflow_core::compression::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = br#"{"tasks": []}"#;
/// let compressed = compressor.compress(data)?;
/// assert_eq!(compressor.decompress(&compressed)?, data);
/// # Ok::<(), taskflow_core::TaskflowError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a gzip compressor with a level from 0 (none) to 9 (best)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            TaskflowError::compression(format!("Failed to write data for compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| TaskflowError::compression(format!("Failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| TaskflowError::compression(format!("Failed to decompress data: {e}")))?;

        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }

    fn file_extension(&self) -> &str {
        "json.gz"
    }
}

/// Pass-through adapter producing plain JSON exports
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }

    fn file_extension(&self) -> &str {
        "json"
    }
}

/// Decompress `data` if it is a gzip stream, otherwise return it unchanged
pub fn decompress_if_gzip(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.starts_with(&GZIP_MAGIC) {
        GzipCompressor::new().decompress(&data)
    } else {
        Ok(data)
    }
}
