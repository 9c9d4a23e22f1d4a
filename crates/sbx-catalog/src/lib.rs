//! sbx-catalog: the authoritative index of the mirrored tree
//!
//! The catalog maps relative paths to virtual files, each virtual file to an
//! ordered list of encrypted parts, and optionally groups small files into
//! bundles. It is produced by [`scan::scan_tree`], packed by
//! [`bundle::make_bundles`] and persisted through [`seal`] as one encrypted
//! blob (locally as a cache file, remotely under the reserved index name).
//!
//! Pipeline for one file:
//! ```text
//! local file ── split at 1 GiB ──> SHA-512 per part ──> data key + storage name
//!            └─ whole-file zstd probe (≤ 1 MiB only) ──> use_compression
//! ```

pub mod bundle;
pub mod error;
pub mod model;
pub mod scan;
pub mod seal;

pub use bundle::make_bundles;
pub use error::{CatalogError, Result};
pub use model::{Bundle, Catalog, FilePart, FolderEntry, VirtFile};
pub use scan::{scan_file, scan_tree, ScanOutcome};
pub use seal::{seal, seal_to_file, unseal, unseal_from_file};

/// Size of the parts a file is split into: 1 GiB.
///
/// A multiple of common kernel read buffers (128 KiB) and disk blocks
/// (4 KiB).
pub const PART_SIZE: u64 = 131_072 * 4_096 * 2;

/// Upper size bound for compressible files. Compressed files must be held in
/// RAM whenever they are read, so this stays small.
pub const MAX_FILE_SIZE_FOR_COMPRESSION: u64 = 1024 * 1024;

/// Upper size bound for files that may be packed into a bundle.
pub const MAX_FILE_SIZE_TO_BUNDLE: u64 = 12 * 1024 * 1024;

/// Prefix of every bundle blob name on the remote.
pub const BUNDLE_PREFIX: &str = "B_";
