//! Read-only virtual filesystem over the remote.
//!
//! Holds the current catalog behind a reader/writer lock and swaps it when
//! a new index blob appears on the remote. Open file handles capture the
//! catalog snapshot of their open moment, so a swap never changes what an
//! in-flight reader sees.

use std::io::{Read, SeekFrom};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use sbx_catalog::{Catalog, FolderEntry, VirtFile};

use crate::error::{EngineError, Result};
use crate::open::open;
use crate::readers::ReadAt;
use crate::store::ObjectStore;
use crate::INDEX_NAME;

/// The mirrored tree, readable while a background task follows index
/// updates.
pub struct VirtualFs {
    store: Arc<dyn ObjectStore>,
    index_key: Vec<u8>,
    state: RwLock<VfsState>,
}

#[derive(Default)]
struct VfsState {
    catalog: Arc<Catalog>,
    /// Blob id of the index the catalog was loaded from. A different id on
    /// the remote means the catalog is stale.
    index_blob_id: String,
}

impl VirtualFs {
    pub fn new(store: Arc<dyn ObjectStore>, index_key: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            store,
            index_key,
            state: RwLock::new(VfsState::default()),
        })
    }

    /// Launch the background refresh tasks.
    ///
    /// The update loop refreshes the remote listing and the catalog every
    /// `update_interval` seconds. A second short-lived loop polls every 5
    /// seconds for about half a minute so a cold start serves files as soon
    /// as the index is visible. An interval of 0 disables both.
    pub fn start(self: &Arc<Self>, update_interval: u64) {
        if update_interval == 0 {
            return;
        }

        let fs = Arc::clone(self);
        thread::spawn(move || {
            info!(interval = update_interval, "update loop started");
            loop {
                match fs.store.update() {
                    Ok(()) => info!("update loop: listing refreshed"),
                    Err(e) => warn!(error = %e, "update loop: listing refresh failed"),
                }
                fs.check_index(false);
                thread::sleep(Duration::from_secs(update_interval));
            }
        });

        let fs = Arc::clone(self);
        thread::spawn(move || {
            info!("init loop started");
            for _ in 0..6 {
                let _ = fs.store.update();
                if fs.check_index(true) {
                    break;
                }
                thread::sleep(Duration::from_secs(5));
            }
            info!("init loop stopped");
        });
    }

    /// The current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.state.read().unwrap().catalog)
    }

    /// Reload the catalog if the remote carries a different index blob.
    /// Returns true when a new catalog was installed.
    pub fn refresh(&self) -> bool {
        self.check_index(false)
    }

    fn check_index(&self, quiet: bool) -> bool {
        let mut state = self.state.write().unwrap();

        let blob = match self.store.files().by_name(INDEX_NAME) {
            Ok(f) => f,
            Err(e) => {
                if !quiet {
                    warn!(error = %e, "index blob not found");
                }
                return false;
            }
        };

        if state.index_blob_id == blob.id && !state.index_blob_id.is_empty() {
            return false; // unchanged
        }
        info!(id = %blob.id, "downloading index");

        let download = || -> Result<Catalog> {
            let mut sealed = Vec::new();
            self.store.reader(&blob, 0)?.read_to_end(&mut sealed)?;
            Ok(sbx_catalog::unseal(&sealed, &self.index_key)?)
        };

        match download() {
            Ok(catalog) => {
                state.catalog = Arc::new(catalog);
                state.index_blob_id = blob.id;
                true
            }
            Err(e) => {
                warn!(error = %e, "index download failed");
                false
            }
        }
    }

    /// Entry metadata for a path.
    pub fn stat(&self, path: &str) -> Result<VirtFile> {
        let rel_path = path_fix(path);
        self.catalog()
            .files
            .get(&rel_path)
            .cloned()
            .ok_or(EngineError::NotExist(rel_path))
    }

    /// Folder listing for a path.
    pub fn read_dir(&self, path: &str) -> Result<Vec<FolderEntry>> {
        Ok(self.stat(path)?.folder_content)
    }

    /// Open a path for reading.
    ///
    /// The handle keeps the catalog snapshot of this moment; the actual
    /// remote reader is created on first use.
    pub fn open_file(&self, path: &str) -> Result<VfsFile> {
        let rel_path = path_fix(path);
        let catalog = self.catalog();
        let entry = catalog
            .files
            .get(&rel_path)
            .cloned()
            .ok_or(EngineError::NotExist(rel_path))?;

        Ok(VfsFile {
            entry,
            catalog,
            store: Arc::clone(&self.store),
            state: Mutex::new(FileState::default()),
        })
    }
}

/// Translate an outside path to a catalog key: slashes trimmed on both
/// sides, the root is `.`.
fn path_fix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

/// An open file handle with a stream cursor.
pub struct VfsFile {
    entry: VirtFile,
    catalog: Arc<Catalog>,
    store: Arc<dyn ObjectStore>,
    state: Mutex<FileState>,
}

#[derive(Default)]
struct FileState {
    reader: Option<Arc<dyn ReadAt>>,
    pos: u64,
}

impl VfsFile {
    pub fn entry(&self) -> &VirtFile {
        &self.entry
    }

    /// Folder listing of this handle (empty for files).
    pub fn read_dir(&self) -> &[FolderEntry] {
        &self.entry.folder_content
    }

    /// Read at the stream cursor and advance it. Returns 0 at the end.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let reader = Self::reader(&mut state, &self.entry, &self.catalog, &self.store)?;
        let n = reader.read_at(buf, state.pos)?;
        state.pos += n as u64;
        Ok(n)
    }

    /// Move the stream cursor. Negative results clamp to 0.
    pub fn seek(&self, seek: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let new_pos = match seek {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(delta) => state.pos as i64 + delta,
            SeekFrom::End(delta) => self.entry.file_size as i64 + delta,
        };
        state.pos = new_pos.max(0) as u64;
        Ok(state.pos)
    }

    /// Positioned read, independent of the stream cursor. Safe to call from
    /// several threads at once.
    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        let reader = {
            let mut state = self.state.lock().unwrap();
            Self::reader(&mut state, &self.entry, &self.catalog, &self.store)?
        };
        reader.read_at(buf, off)
    }

    fn reader(
        state: &mut FileState,
        entry: &VirtFile,
        catalog: &Catalog,
        store: &Arc<dyn ObjectStore>,
    ) -> Result<Arc<dyn ReadAt>> {
        if state.reader.is_none() {
            state.reader = Some(Arc::from(open(entry, catalog, store)?));
        }
        Ok(Arc::clone(state.reader.as_ref().unwrap()))
    }
}
