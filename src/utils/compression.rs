use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

/// Default decompression cap (align with MAX_PAYLOAD_SIZE to prevent DoS)
const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data with the default output cap.
pub fn decompress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    decompress_bounded(data, kind, MAX_DECOMPRESSION_SIZE)
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Output larger than `max_output` is rejected before (LZ4) or while (Zstd) it is
/// produced, so a small hostile payload cannot claim gigabytes of memory.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds `max_output`
pub fn decompress_bounded(data: &[u8], kind: &CompressionKind, max_output: usize) -> Result<Vec<u8>> {
    match *kind {
        CompressionKind::Lz4 => {
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }

            // lz4_flex prepends the uncompressed size as 4 little-endian bytes
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > max_output {
                return Err(ProtocolError::DecompressionFailure);
            }

            let decompressed = lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            if decompressed.len() > max_output {
                return Err(ProtocolError::DecompressionFailure);
            }
            Ok(decompressed)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            // Read in chunks to enforce size limit
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > max_output {
                            return Err(ProtocolError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

/// Compress `data` when it is at least `threshold_bytes` long and the result is
/// smaller than `ratio × data.len()`; otherwise hand back the input untouched.
///
/// Returns the output bytes and a flag indicating whether compression was applied.
pub fn maybe_compress(
    data: &[u8],
    kind: &CompressionKind,
    threshold_bytes: usize,
    ratio: f64,
) -> Result<(Vec<u8>, bool)> {
    if data.is_empty() || data.len() < threshold_bytes {
        return Ok((data.to_vec(), false));
    }

    let compressed = compress(data, kind)?;
    let limit = data.len() as f64 * ratio;
    if (compressed.len() as f64) < limit {
        Ok((compressed, true))
    } else {
        Ok((data.to_vec(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_compression_roundtrip() {
        let original = b"Hello, World! This is a test of LZ4 compression.";
        let compressed = compress(original, &CompressionKind::Lz4).unwrap();
        let decompressed = decompress(&compressed, &CompressionKind::Lz4).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_compression_roundtrip() {
        let original = b"Hello, World! This is a test of Zstd compression.";
        let compressed = compress(original, &CompressionKind::Zstd).unwrap();
        let decompressed = decompress(&compressed, &CompressionKind::Zstd).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_lz4_claimed_size_over_limit_rejected() {
        // Claims to decompress to 3+ GB (0xbbbb602b)
        let malicious_payload = vec![0x2b, 0x60, 0xbb, 0xbb];
        let result = decompress(&malicious_payload, &CompressionKind::Lz4);
        assert!(matches!(result, Err(ProtocolError::DecompressionFailure)));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_bounded_decompression_respects_custom_cap() {
        let data = vec![7u8; 4096];
        let compressed = compress(&data, &CompressionKind::Zstd).unwrap();
        assert!(decompress_bounded(&compressed, &CompressionKind::Zstd, 1024).is_err());
        assert_eq!(
            decompress_bounded(&compressed, &CompressionKind::Zstd, 4096).unwrap(),
            data
        );

        let compressed = compress(&data, &CompressionKind::Lz4).unwrap();
        assert!(decompress_bounded(&compressed, &CompressionKind::Lz4, 1024).is_err());
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        let short_input = vec![0x2b, 0x60];
        let result = decompress(&short_input, &CompressionKind::Lz4);
        assert!(result.is_err(), "Should reject input shorter than 4 bytes");
    }

    #[test]
    fn test_malformed_compressed_data() {
        let malformed = vec![0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff];
        let result = decompress(&malformed, &CompressionKind::Lz4);
        assert!(result.is_err(), "Should reject malformed compressed data");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_maybe_compress_below_threshold() {
        let data = b"tiny";
        let (out, compressed) = maybe_compress(data, &CompressionKind::Lz4, 512, 0.9).unwrap();
        assert!(!compressed);
        assert_eq!(out, data);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_maybe_compress_above_threshold() {
        let data = vec![1u8; 1024];
        let (out, compressed) = maybe_compress(&data, &CompressionKind::Lz4, 512, 0.9).unwrap();
        assert!(compressed);
        assert!(out.len() < data.len());
        assert_eq!(decompress(&out, &CompressionKind::Lz4).unwrap(), data);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_maybe_compress_keeps_dense_payload() {
        // xorshift output does not compress; the ratio guard must keep the original
        let mut state = 0x2545_f491_u32;
        let data: Vec<u8> = (0..2048)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let (out, compressed) = maybe_compress(&data, &CompressionKind::Lz4, 64, 0.9).unwrap();
        assert!(!compressed);
        assert_eq!(out, data);
    }
}
