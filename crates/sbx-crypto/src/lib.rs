//! sbx-crypto: key derivation and blob encryption for shardbox
//!
//! Key hierarchy (all PBKDF2, parameters are part of the wire format):
//! ```text
//! Keyfile (128 random bytes on disk)
//!   ├── crypt_secret = PBKDF2-HMAC-SHA512(bytes[0..64],   "master_secret", 60000)
//!   │     └── data key per part: PBKDF2-HMAC-SHA256(crypt_secret, plain_sha512, 10000) → AES-256
//!   ├── hash_secret  = PBKDF2-HMAC-SHA512(bytes[64..128], "hash_secret",   60000)
//!   │     └── storage name per part: hex(PBKDF2-HMAC-SHA512(hash_secret, plain_sha512, 500))
//!   └── index_secret = PBKDF2-HMAC-SHA512(bytes[32..96],  "index_secret",  99999)
//!         └── index key: PBKDF2-HMAC-SHA256(index_secret, "IndexKey", 5000) → AES-256-GCM
//! ```
//!
//! Blob payloads are encrypted with AES-256-CTR where the counter is the
//! byte offset inside the blob divided by the AES block size. Every blob
//! therefore needs its own key, which the content-derived data key
//! guarantees. CTR is malleable; blob integrity comes from the storage MD5
//! kept in the catalog, and the catalog itself is sealed with AES-GCM.

pub mod cipher;
pub mod compress;
pub mod error;
pub mod keyfile;
pub mod reader;

pub use cipher::{crypt_bytes, AES_BLOCK_SIZE};
pub use compress::{compress, decompress, BEST_COMPRESSION};
pub use error::{CryptoError, Result};
pub use keyfile::{create_keyfile, Keyfile, KEYFILE_SIZE};
pub use reader::CryptReader;

/// Size of an AES-256 key in bytes.
pub const DATA_KEY_SIZE: usize = 32;

/// Size of a SHA-512 digest, the content address of one part.
pub const PLAIN_HASH_SIZE: usize = 64;
