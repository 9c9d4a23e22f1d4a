use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Path not present in the catalog.
    #[error("does not exist: {0}")]
    NotExist(String),

    /// A part blob referenced by the catalog is missing on the remote.
    /// Fatal to the read path; there is no fallback for parts.
    #[error("part not found in storage: {0}")]
    PartNotFound(String),

    /// A blob (or the index) was not found on the remote.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// A blob delivered fewer bytes than the catalog promised.
    #[error("unexpected end of blob data")]
    UnexpectedEof,

    #[error("size check fail for '{name}': expected {expected}, got {got}")]
    SizeMismatch {
        name: String,
        expected: u64,
        got: u64,
    },

    /// A bundle member does not have exactly one part.
    #[error("wrong part count for a bundle element: {0}")]
    BadBundleMember(String),

    /// No data key registered for a blob the reader was asked to decrypt.
    #[error("data key not found: {0}")]
    DataKeyNotFound(String),

    #[error(transparent)]
    Catalog(#[from] sbx_catalog::CatalogError),

    #[error(transparent)]
    Crypto(#[from] sbx_crypto::CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
