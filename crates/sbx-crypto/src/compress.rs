//! Zstandard compression at the best compression level.
//!
//! Compression is only worth the server-side RAM cost for small files that
//! shrink well, so callers measure the ratio returned here before deciding.

use crate::error::{CryptoError, Result};

/// Compression level used for all blobs and the sealed catalog.
pub const BEST_COMPRESSION: i32 = 19;

/// Compress `input` and report the achieved ratio (compressed / plain).
///
/// Empty input compresses to empty output with ratio 1.0.
pub fn compress(input: &[u8]) -> Result<(Vec<u8>, f32)> {
    if input.is_empty() {
        return Ok((Vec::new(), 1.0));
    }
    let out = zstd::encode_all(input, BEST_COMPRESSION)?;
    let ratio = out.len() as f32 / input.len() as f32;
    Ok((out, ratio))
}

/// Decompress a zstd frame produced by [`compress`].
///
/// Empty input decompresses to empty output. Anything shorter than the
/// 4-byte frame magic is rejected before zstd sees it.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if input.len() < 4 {
        return Err(CryptoError::BadMagic);
    }
    Ok(zstd::decode_all(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_input() {
        let (out, ratio) = compress(&[]).unwrap();
        assert!(out.is_empty());
        assert_eq!(ratio, 1.0);
        assert!(decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_zeros_compress_well() {
        let (out, ratio) = compress(&[0u8; 100]).unwrap();
        assert!(ratio < 0.8, "ratio {ratio} not below threshold");
        assert_eq!(decompress(&out).unwrap(), vec![0u8; 100]);
    }

    #[test]
    fn test_short_input_is_a_magic_error() {
        for len in 1..4 {
            assert!(matches!(
                decompress(&vec![0u8; len]),
                Err(CryptoError::BadMagic)
            ));
        }
    }

    #[test]
    fn test_garbage_input_fails() {
        assert!(decompress(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00]).is_err());
    }

    proptest! {
        #[test]
        fn round_trip(data in proptest::collection::vec(any::<u8>(), 0..=16384)) {
            let (out, _) = compress(&data).unwrap();
            prop_assert_eq!(decompress(&out).unwrap(), data);
        }
    }
}
