//! Sealed catalog codec.
//!
//! Wire layout, outermost first:
//! ```text
//! nonce(12) || AES-256-GCM( crc32_le(4) || zstd( bincode(Catalog) ) )
//! ```
//!
//! The checksum guards against decoder confusion after a successful GCM
//! open; the two failures stay distinguishable for the caller. The same
//! bytes serve as the remote index blob and the local catalog cache file.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use tracing::warn;

use crate::error::{CatalogError, Result};
use crate::model::Catalog;

const NONCE_SIZE: usize = 12;
const CRC_SIZE: usize = 4;

/// Serialize, compress, checksum and encrypt a catalog.
pub fn seal(catalog: &Catalog, key: &[u8]) -> Result<Vec<u8>> {
    let encoded = bincode::serde::encode_to_vec(catalog, bincode::config::legacy())
        .map_err(|e| CatalogError::Encode(e.to_string()))?;

    let (compressed, _) = sbx_crypto::compress(&encoded)?;

    let mut body = Vec::with_capacity(CRC_SIZE + compressed.len());
    body.extend_from_slice(&crc32fast::hash(&compressed).to_le_bytes());
    body.extend_from_slice(&compressed);

    let gcm =
        Aes256Gcm::new_from_slice(key).map_err(|_| CatalogError::IndexKeyLength(key.len()))?;
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let sealed = gcm
        .encrypt(Nonce::from_slice(&nonce), body.as_slice())
        .map_err(|_| CatalogError::AuthFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt, verify and decode a sealed catalog.
pub fn unseal(bytes: &[u8], key: &[u8]) -> Result<Catalog> {
    if bytes.len() <= NONCE_SIZE + CRC_SIZE {
        return Err(CatalogError::SizeCheck);
    }
    let (nonce, sealed) = bytes.split_at(NONCE_SIZE);

    let gcm =
        Aes256Gcm::new_from_slice(key).map_err(|_| CatalogError::IndexKeyLength(key.len()))?;
    let body = gcm
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CatalogError::AuthFailed)?;

    if body.len() <= CRC_SIZE {
        return Err(CatalogError::SizeCheck);
    }
    let (sum, compressed) = body.split_at(CRC_SIZE);
    if sum != crc32fast::hash(compressed).to_le_bytes() {
        return Err(CatalogError::ChecksumMismatch);
    }

    let encoded = sbx_crypto::decompress(compressed)?;
    let (catalog, _) = bincode::serde::decode_from_slice(&encoded, bincode::config::legacy())
        .map_err(|e| CatalogError::Decode(e.to_string()))?;
    Ok(catalog)
}

/// Write the sealed catalog to a file, replacing any previous content.
pub fn seal_to_file(catalog: &Catalog, key: &[u8], path: impl AsRef<Path>) -> Result<()> {
    let bytes = seal(catalog, key)?;
    fs::write(path.as_ref(), bytes)?;
    Ok(())
}

/// Load a sealed catalog from a file.
///
/// A missing file is not an error: it yields an empty catalog, so a first
/// scan can run against a clean slate.
pub fn unseal_from_file(path: impl AsRef<Path>, key: &[u8]) -> Result<Catalog> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "no catalog file, starting empty");
        return Ok(Catalog::new());
    }
    unseal(&fs::read(path)?, key)
}
