use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use super::CompressionType;
use crate::error::{StorageError, StorageResult};

/// Compress bytes with the given algorithm.
pub fn compress(kind: CompressionType, data: &[u8]) -> StorageResult<Vec<u8>> {
    match kind {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|e| compression_error(kind, e))?;
            encoder.finish().map_err(|e| compression_error(kind, e))
        }
        CompressionType::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|e| compression_error(kind, e))?;
            encoder.finish().map_err(|e| compression_error(kind, e))
        }
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Reverse [`compress`].
pub fn decompress(kind: CompressionType, data: &[u8]) -> StorageResult<Vec<u8>> {
    match kind {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| compression_error(kind, e))?;
            Ok(out)
        }
        CompressionType::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| compression_error(kind, e))?;
            Ok(out)
        }
        CompressionType::Lz4 => {
            lz4_flex::decompress_size_prepended(data).map_err(|e| compression_error(kind, e))
        }
    }
}

fn compression_error(kind: CompressionType, e: impl std::fmt::Display) -> StorageError {
    StorageError::Compression {
        algorithm: kind.to_string(),
        message: e.to_string(),
    }
}
