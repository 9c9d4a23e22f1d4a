use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Sealed blob is too short to contain its framing (nonce or checksum).
    #[error("size check fail")]
    SizeCheck,

    /// CRC32 over the compressed index body does not match.
    #[error("checksum fail")]
    ChecksumMismatch,

    /// AES-GCM rejected the sealed blob (wrong key or tampered data).
    #[error("authentication fail")]
    AuthFailed,

    #[error("index key must be 32 bytes long, got {0}")]
    IndexKeyLength(usize),

    #[error("encoding catalog: {0}")]
    Encode(String),

    #[error("decoding catalog: {0}")]
    Decode(String),

    #[error("scan target is a folder: {0}")]
    IsAFolder(PathBuf),

    #[error("storage size check fail: expected {expected}, got {got}")]
    StorageSizeMismatch { expected: u64, got: u64 },

    #[error("seek to part {part_no} landed at {got}, expected {expected}")]
    SeekMismatch {
        part_no: usize,
        expected: u64,
        got: u64,
    },

    #[error("only the first part can be compressed")]
    CompressedTail,

    #[error(transparent)]
    Crypto(#[from] sbx_crypto::CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
