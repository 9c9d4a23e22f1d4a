use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key must be {expected} bytes long, got {got}")]
    KeyLength { expected: usize, got: usize },

    #[error("key file must be exactly {expected} bytes long, got {got}")]
    KeyfileSize { expected: usize, got: usize },

    #[error("key file already exists: {0}")]
    KeyfileExists(PathBuf),

    #[error("magic number invalid")]
    BadMagic,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
