//! The keyfile and the keys derived from it.
//!
//! All derivations are fixed PBKDF2 invocations. Changing any label,
//! iteration count or input slice changes every storage name and every data
//! key, so the values here must never be touched.

use std::fs;
use std::path::Path;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Sha256, Sha512};
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::{DATA_KEY_SIZE, PLAIN_HASH_SIZE};

/// Exact size of a keyfile on disk.
pub const KEYFILE_SIZE: usize = 128;

const SECRET_SIZE: usize = 64;

/// The three domain secrets derived from the 128 keyfile bytes.
///
/// The input slices overlap on purpose (the index secret covers the middle
/// of the file); this matches the established on-disk format.
pub struct Keyfile {
    crypt_secret: [u8; SECRET_SIZE],
    hash_secret: [u8; SECRET_SIZE],
    index_secret: [u8; SECRET_SIZE],
}

impl Keyfile {
    /// Read a keyfile from disk and derive the domain secrets.
    ///
    /// Anything that is not exactly 128 bytes is rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() != KEYFILE_SIZE {
            return Err(CryptoError::KeyfileSize {
                expected: KEYFILE_SIZE,
                got: bytes.len(),
            });
        }
        let mut raw = [0u8; KEYFILE_SIZE];
        raw.copy_from_slice(&bytes);
        let kf = Self::from_bytes(&raw);
        raw.zeroize();
        Ok(kf)
    }

    /// Derive the domain secrets from raw keyfile bytes.
    pub fn from_bytes(raw: &[u8; KEYFILE_SIZE]) -> Self {
        let mut crypt_secret = [0u8; SECRET_SIZE];
        let mut hash_secret = [0u8; SECRET_SIZE];
        let mut index_secret = [0u8; SECRET_SIZE];
        pbkdf2_hmac::<Sha512>(&raw[..64], b"master_secret", 60_000, &mut crypt_secret);
        pbkdf2_hmac::<Sha512>(&raw[64..], b"hash_secret", 60_000, &mut hash_secret);
        pbkdf2_hmac::<Sha512>(&raw[32..96], b"index_secret", 99_999, &mut index_secret);
        Self {
            crypt_secret,
            hash_secret,
            index_secret,
        }
    }

    /// The AES-256 key for one part, derived from the plaintext SHA-512.
    ///
    /// Identical content always yields the identical key.
    pub fn data_key(&self, plain_hash: &[u8]) -> Vec<u8> {
        let mut key = vec![0u8; DATA_KEY_SIZE];
        pbkdf2_hmac::<Sha256>(&self.crypt_secret, plain_hash, 10_000, &mut key);
        key
    }

    /// The storage name for one part, derived from the plaintext SHA-512.
    ///
    /// Returns 64 bytes as a 128 character hex string.
    pub fn crypt_name(&self, plain_hash: &[u8]) -> String {
        let mut name = [0u8; PLAIN_HASH_SIZE];
        pbkdf2_hmac::<Sha512>(&self.hash_secret, plain_hash, 500, &mut name);
        hex::encode(name)
    }

    /// The AES-256-GCM key that seals the catalog blob.
    pub fn index_key(&self) -> Vec<u8> {
        let mut key = vec![0u8; DATA_KEY_SIZE];
        pbkdf2_hmac::<Sha256>(&self.index_secret, b"IndexKey", 5_000, &mut key);
        key
    }

    #[cfg(test)]
    pub(crate) fn with_secrets(
        crypt_secret: [u8; SECRET_SIZE],
        hash_secret: [u8; SECRET_SIZE],
        index_secret: [u8; SECRET_SIZE],
    ) -> Self {
        Self {
            crypt_secret,
            hash_secret,
            index_secret,
        }
    }

    #[cfg(test)]
    pub(crate) fn secrets(&self) -> (&[u8], &[u8], &[u8]) {
        (&self.crypt_secret, &self.hash_secret, &self.index_secret)
    }
}

impl Drop for Keyfile {
    fn drop(&mut self) {
        self.crypt_secret.zeroize();
        self.hash_secret.zeroize();
        self.index_secret.zeroize();
    }
}

impl std::fmt::Debug for Keyfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyfile")
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

/// Create a new keyfile with 128 random bytes, mode 0600.
///
/// An existing file is never overwritten. The fresh file is loaded once as a
/// self-test before the function reports success.
pub fn create_keyfile(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(CryptoError::KeyfileExists(path.to_path_buf()));
    }

    let mut raw = [0u8; KEYFILE_SIZE];
    rand::thread_rng().fill_bytes(&mut raw);

    // create_new refuses a file that appeared since the check above
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut fh = options.open(path)?;
    std::io::Write::write_all(&mut fh, &raw)?;
    drop(fh);
    raw.zeroize();

    // read-back self-test
    let kf = Keyfile::load(path)?;
    let _ = kf.index_key();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fixed vectors pinning cross-platform stability of the derivations.
    const TEST_KEYFILE_HEX: &str = "60a47fe220af89723bebda9fb741b479e15b74c817df1326b26d807d086376f6f3fe03a457d8458168cdc89f09303fe570f51305b48180e7d9fc6ef3e6aa2796915d5ca065469277d7a7eb4983f6dbcd932180cb6115bf1334c725a72b9be480b35a30a821f38a9b44660bdf0baabdf6391ad67fa1b5484503751d9afe0d4cf0";
    const TEST_CRYPT_SECRET_HEX: &str = "e4c91c0559eb3db0e4d1df7d3d5a394619758231c2fe07ea0d7de2f6f8802ea539c46609a8b574d1ac320ee0ff08cf9c93caa3e82e031fd6377c62ee2a0b8948";
    const TEST_HASH_SECRET_HEX: &str = "d25e1be922e922bfe6492218d42bf0f8f3753ce6de030a78cf38a7c47e4b5882999baffa6c40d790bde0b30ac675af5a2b60f1026bf30ffe50656f17a0a4d68e";
    const TEST_INDEX_SECRET_HEX: &str = "de936cc4451729817a60b3b8d66921cf7e39760ee1f7b64c4b539aba7a83dbb1d93d58ce44a7da8bf6b1854ac1e45ce3c4915449fe51b5988a6686b59b73e28a";

    fn test_keyfile() -> Keyfile {
        let raw: [u8; KEYFILE_SIZE] = hex::decode(TEST_KEYFILE_HEX)
            .unwrap()
            .try_into()
            .unwrap();
        Keyfile::from_bytes(&raw)
    }

    #[test]
    fn test_secret_derivation_known_answer() {
        let kf = test_keyfile();
        let (crypt, hash, index) = kf.secrets();
        assert_eq!(hex::encode(crypt), TEST_CRYPT_SECRET_HEX);
        assert_eq!(hex::encode(hash), TEST_HASH_SECRET_HEX);
        assert_eq!(hex::encode(index), TEST_INDEX_SECRET_HEX);
    }

    #[test]
    fn test_data_key_known_answer() {
        let crypt_secret: [u8; 64] = hex::decode(TEST_CRYPT_SECRET_HEX)
            .unwrap()
            .try_into()
            .unwrap();
        let kf = Keyfile::with_secrets(crypt_secret, [0u8; 64], [0u8; 64]);

        let key = kf.data_key(b"testparthash");
        assert_eq!(
            hex::encode(key),
            "1f685083dcddadb70c3d9d93da8eabb42176a09e2784d5766c06302ef542d2db"
        );
    }

    #[test]
    fn test_crypt_name_known_answer() {
        // HMAC zero-pads short keys, so the short label secret and its
        // zero-padded 64-byte form derive the same name.
        let mut hash_secret = [0u8; 64];
        let raw = b"oijajfoiajfdoiajsdojassdfo";
        hash_secret[..raw.len()].copy_from_slice(raw);
        let kf = Keyfile::with_secrets([0u8; 64], hash_secret, [0u8; 64]);

        assert_eq!(
            kf.crypt_name(b"ich bin ein kleiner knuddeliger part"),
            "01a3a9314eb0357c3eb0fd8ddb88cd0c90423c38f2b9b0a808334999dce717d0b3cda79eab836433f8c4162f3270c5af10f0248d13b931978b0ddd48f207da07"
        );
    }

    #[test]
    fn test_crypt_name_shape() {
        let kf = test_keyfile();
        let name = kf.crypt_name(b"some plain hash");
        assert_eq!(name.len(), 128);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keys_are_stable() {
        let kf = test_keyfile();
        assert_eq!(kf.data_key(b"abc"), kf.data_key(b"abc"));
        assert_eq!(kf.crypt_name(b"abc"), kf.crypt_name(b"abc"));
        assert_eq!(kf.index_key(), kf.index_key());
        assert_ne!(kf.data_key(b"abc"), kf.data_key(b"abd"));
    }

    #[test]
    fn test_load_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        fs::write(&path, [7u8; 100]).unwrap();

        match Keyfile::load(&path) {
            Err(CryptoError::KeyfileSize { expected, got }) => {
                assert_eq!(expected, KEYFILE_SIZE);
                assert_eq!(got, 100);
            }
            other => panic!("expected size error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_keyfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.key");

        create_keyfile(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), KEYFILE_SIZE);

        // a second create must refuse
        assert!(matches!(
            create_keyfile(&path),
            Err(CryptoError::KeyfileExists(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_create_keyfile_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mode.key");
        create_keyfile(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
