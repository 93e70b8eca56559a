//! Decompression of compressed source objects.
//!
//! ONS publishes some extracts gzip-compressed. These are recognised by their magic bytes rather
//! than by object key, so a `.csv` object that happens to be compressed still loads.

use crate::error::EnergyVizError;

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;

/// Leading bytes of a gzip member.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns true if the data starts with a gzip header.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Decompresses data if it is gzip-compressed, otherwise returns it unchanged.
///
/// Plain data is returned as is, whatever its size.
///
/// # Arguments
///
/// * `data`: Possibly compressed data
/// * `limit`: Optional upper bound on the inflated size in bytes. Inflating past it fails with
///   [EnergyVizError::InsufficientMemory].
pub fn maybe_decompress(data: Bytes, limit: Option<usize>) -> Result<Bytes, EnergyVizError> {
    if is_gzip(&data) {
        decompress_gzip(&data, limit)
    } else {
        Ok(data)
    }
}

fn decompress_gzip(data: &[u8], limit: Option<usize>) -> Result<Bytes, EnergyVizError> {
    let decoder = GzDecoder::new(data);
    // Text compresses well, so start with a generous guess at the inflated size.
    let guess = data.len().saturating_mul(4);
    let mut buf = Vec::with_capacity(limit.map_or(guess, |limit| guess.min(limit)));
    match limit {
        Some(limit) => {
            // One byte past the limit is enough to tell that it was exceeded.
            let read_limit = u64::try_from(limit)?.saturating_add(1);
            decoder.take(read_limit).read_to_end(&mut buf)?;
            if buf.len() > limit {
                return Err(EnergyVizError::InsufficientMemory {
                    requested: buf.len(),
                    total: limit,
                });
            }
        }
        None => {
            let mut decoder = decoder;
            decoder.read_to_end(&mut buf)?;
        }
    }
    tracing::debug!(compressed = data.len(), inflated = buf.len(), "decompressed gzip data");
    Ok(buf.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzEncoder;
    use flate2::Compression;

    fn compress_gzip(input: &[u8]) -> Vec<u8> {
        // Adapated from flate2 documentation.
        let mut result = Vec::<u8>::new();
        let mut deflater = GzEncoder::new(input, Compression::fast());
        deflater.read_to_end(&mut result).unwrap();
        result
    }

    #[test]
    fn test_decompress_gzip() {
        let compressed = compress_gzip(b"din_instante;val_geracao\n");
        assert!(is_gzip(&compressed));
        let result = maybe_decompress(compressed.into(), None).unwrap();
        assert_eq!(result, b"din_instante;val_geracao\n".as_ref());
    }

    #[test]
    fn test_plain_data_unchanged() {
        let data = Bytes::from_static(b"a,b\n1,2\n");
        assert!(!is_gzip(&data));
        let result = maybe_decompress(data.clone(), Some(1)).unwrap();
        assert_eq!(data, result);
    }

    #[test]
    fn test_decompress_truncated_gzip() {
        let mut compressed = compress_gzip(b"hello world, hello world, hello world");
        compressed.truncate(12);
        let err = maybe_decompress(compressed.into(), None).unwrap_err();
        match err {
            EnergyVizError::Decompression(_) => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_decompress_within_limit() {
        let input = b"2023-01-01 00:00:00;10,5\n".repeat(100);
        let compressed = compress_gzip(&input);
        let result = maybe_decompress(compressed.into(), Some(input.len())).unwrap();
        assert_eq!(input.len(), result.len());
    }

    #[test]
    fn test_decompress_over_limit() {
        let input = b"2023-01-01 00:00:00;10,5\n".repeat(100);
        let compressed = compress_gzip(&input);
        // Repeated lines compress to far less than the limit.
        assert!(compressed.len() < 256);
        let err = maybe_decompress(compressed.into(), Some(256)).unwrap_err();
        assert_eq!("insufficient_memory", err.code());
        assert_eq!(
            "Insufficient memory to process request (257 > 256)",
            err.to_string()
        );
    }
}
