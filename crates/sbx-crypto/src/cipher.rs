//! Offset-addressable AES-256-CTR for part and bundle blobs.
//!
//! The counter is the blob-local byte offset divided by the AES block size,
//! encoded big-endian into the 16-byte IV. There is no nonce: two blobs
//! encrypted with the same key would share a keystream, which is why every
//! blob carries its own content-derived data key. The counter resets at the
//! start of every blob; a file embedded at offset `o` inside a bundle is
//! therefore ciphered with the bundle key at offset `o`.

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::error::{CryptoError, Result};
use crate::DATA_KEY_SIZE;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

type Aes256Ctr = Ctr128BE<Aes256>;

/// Encrypt or decrypt `data` in place at the given blob offset.
///
/// The operation is an XOR with the keystream, so applying it twice with the
/// same offset and key restores the input. A key that is not 32 bytes long
/// is rejected before `data` is touched.
pub fn crypt_bytes(data: &mut [u8], offset: u64, key: &[u8]) -> Result<()> {
    // The keystream block containing `offset`. When the offset is not
    // block-aligned the first `offset % 16` keystream bytes of that block
    // must be discarded before XORing the caller's data.
    let modulo = (offset % AES_BLOCK_SIZE as u64) as usize;
    let counter = offset / AES_BLOCK_SIZE as u64;
    let iv = (counter as u128).to_be_bytes();

    let mut ctr = Aes256Ctr::new_from_slices(key, &iv).map_err(|_| CryptoError::KeyLength {
        expected: DATA_KEY_SIZE,
        got: key.len(),
    })?;

    if modulo != 0 {
        let mut skip = [0u8; AES_BLOCK_SIZE];
        ctr.apply_keystream(&mut skip[..modulo]);
    }

    ctr.apply_keystream(data);
    Ok(())
}
