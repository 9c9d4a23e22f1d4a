//! Catalog data model.
//!
//! `Catalog -> VirtFile -> FilePart`, plus the optional bundle table. The
//! bundle table and the per-file back-references are two independent maps
//! over string identities, never graph pointers; [`crate::bundle`] writes
//! both sides together.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The full index of the mirrored tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// All virtual files, keyed by [`VirtFile::id`] (the relative path).
    pub files: BTreeMap<String, VirtFile>,

    /// Optional bundles, keyed by [`Bundle::id`] (the bundle storage name).
    pub bundles: BTreeMap<String, Bundle>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One file or folder of the virtual tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtFile {
    /// Path relative to the mirror root, the identity of this entry.
    /// The root itself is keyed `.`.
    pub rel_path: String,

    /// Size of the local file in bytes. Always 0 for folders.
    pub file_size: u64,

    /// Last modification, unix seconds.
    pub mtime: i64,

    pub is_dir: bool,

    /// Folder listing (folders only). Holds names, not paths.
    pub folder_content: Vec<FolderEntry>,

    /// Ordered parts making up the file (files only). A file of size 0 has
    /// no parts.
    pub parts: Vec<FilePart>,

    /// Whether the single part is stored zstd-compressed. Only small files
    /// with exactly one part qualify; file size and storage size differ
    /// when set.
    pub use_compression: bool,

    /// Bundle id if this file is additionally packed into a bundle, empty
    /// otherwise.
    pub also_in_bundle: String,
}

impl VirtFile {
    /// The unique identity of this entry.
    pub fn id(&self) -> &str {
        &self.rel_path
    }

    /// Base name. Not unique across the tree.
    pub fn name(&self) -> &str {
        self.rel_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.rel_path)
    }
}

/// One entry of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub is_dir: bool,
}

/// One stored part of a virtual file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePart {
    /// SHA-512 of the plaintext part content. Root of the data key and the
    /// storage name.
    pub plain_sha512: Vec<u8>,

    /// Blob name on the remote, 128 hex characters.
    pub storage_name: String,

    /// Blob size on the remote. Equals the part length, or the compressed
    /// size when the owning file uses compression.
    pub storage_size: u64,

    /// MD5 of the blob bytes as stored (after compression and encryption),
    /// hex. The remote lookup key next to name and size. Empty for bundles.
    pub storage_md5: String,

    /// AES-256 key for this blob, derived from `plain_sha512`.
    pub data_key: Vec<u8>,
}

impl FilePart {
    /// The unique identity of this part.
    pub fn id(&self) -> &str {
        &self.storage_name
    }
}

/// A bundle packs several small single-part files into one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// The bundle's own storage blob.
    pub part: FilePart,

    /// Ordered member file ids. The blob is the concatenation of the
    /// members' part bytes in exactly this order.
    pub content: Vec<String>,
}

impl Bundle {
    /// The unique identity of this bundle (its storage name).
    pub fn id(&self) -> &str {
        &self.part.storage_name
    }
}
