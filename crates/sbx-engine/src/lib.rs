//! sbx-engine: moving blobs and reading them back
//!
//! The engine connects the catalog to a remote object store:
//!
//! ```text
//! upload:  local tree + catalog ──> missing part/bundle blobs ──> index blob
//! open:    VirtFile ──> ZeroReader | RamReader | SubReader | MultiReader
//! clean:   remote listing vs. catalog ──> delete strays and duplicates
//! vfs:     read-only tree view with background catalog refresh
//! ```
//!
//! The store is injected behind [`store::ObjectStore`]; the engine itself
//! keeps no global state.

pub mod cache;
pub mod clean;
pub mod dir_store;
pub mod error;
pub mod open;
pub mod readers;
pub mod store;
pub mod upload;
pub mod vfs;

pub use cache::{CachedStore, SectorCache};
pub use clean::clean;
pub use dir_store::DirStore;
pub use error::{EngineError, Result};
pub use open::open;
pub use readers::{MultiReader, RamReader, ReadAt, SubReader, ZeroReader};
pub use store::{FileList, MemStore, ObjectStore, RemoteFile};
pub use upload::upload;
pub use vfs::{VfsFile, VirtualFs};

/// Reserved blob name of the sealed catalog on the remote.
pub const INDEX_NAME: &str = "index.db";
