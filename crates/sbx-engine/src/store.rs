//! The remote object store seen by the engine.
//!
//! The remote is a flat namespace of blobs with upload, delete, listing and
//! byte-range reads. Listings are explicit snapshots: [`ObjectStore::files`]
//! only reflects the state of the last [`ObjectStore::update`], exactly like
//! a cloud drive's cached file list. Blob names are not unique on real
//! remotes (an interrupted upload can leave duplicates), so every blob
//! carries a store-assigned id next to its name.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::Mutex;

use md5::{Digest, Md5};

use crate::error::{EngineError, Result};

/// One blob of the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Store-assigned identity, unique per blob instance.
    pub id: String,
    /// Blob name. Not necessarily unique.
    pub name: String,
    /// Blob size in bytes.
    pub size: u64,
    /// MD5 of the blob content, hex.
    pub md5: String,
}

/// Snapshot of the remote listing.
#[derive(Debug, Clone, Default)]
pub struct FileList {
    files: Vec<RemoteFile>,
}

impl FileList {
    pub fn new(files: Vec<RemoteFile>) -> Self {
        Self { files }
    }

    pub fn all(&self) -> &[RemoteFile] {
        &self.files
    }

    /// First blob with the given name.
    pub fn by_name(&self, name: &str) -> Result<RemoteFile> {
        self.files
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| EngineError::BlobNotFound(name.to_string()))
    }

    /// Blob matching name, size and md5. An empty `md5` matches any digest;
    /// bundles are tracked without one.
    pub fn by_attr(&self, name: &str, size: u64, md5: &str) -> Result<RemoteFile> {
        self.files
            .iter()
            .find(|f| f.name == name && f.size == size && (md5.is_empty() || f.md5 == md5))
            .cloned()
            .ok_or_else(|| EngineError::BlobNotFound(name.to_string()))
    }
}

/// Blocking client contract for the remote object store.
///
/// Implementations must be safe for concurrent use; the read path issues
/// parallel range requests against a shared store.
pub trait ObjectStore: Send + Sync {
    /// Refresh the file list snapshot from the remote.
    fn update(&self) -> Result<()>;

    /// The file list as of the last [`update`](Self::update).
    fn files(&self) -> FileList;

    /// Upload a blob under the exact given name. `size_hint` may be 0 when
    /// the length is unknown up front.
    fn save(&self, name: &str, data: &mut dyn Read, size_hint: u64) -> Result<RemoteFile>;

    /// Remove a blob.
    fn trash(&self, file: &RemoteFile) -> Result<()>;

    /// Stream a blob from `off` to its end.
    fn reader(&self, file: &RemoteFile, off: u64) -> Result<Box<dyn Read + Send>>;

    /// Stream at most `n` bytes of a blob starting at `off`.
    fn limited_reader(&self, file: &RemoteFile, off: u64, n: u64)
        -> Result<Box<dyn Read + Send>>;
}

/// Read a byte range into a buffer, tolerating a short tail.
pub(crate) fn read_range(
    store: &dyn ObjectStore,
    file: &RemoteFile,
    off: u64,
    buf: &mut [u8],
) -> Result<usize> {
    let mut r = store.limited_reader(file, off, buf.len() as u64)?;
    let mut filled = 0;
    loop {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 || filled == buf.len() {
            return Ok(filled);
        }
        filled += n;
    }
}

/// In-memory object store for tests and scratch runs.
///
/// Mirrors the semantics of a real drive: `save` does not touch the listing
/// snapshot, duplicate names are possible, ids are assigned per upload.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    blobs: Vec<(RemoteFile, Vec<u8>)>,
    listed: FileList,
    next_id: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a blob with full control over the listed metadata. Test helper
    /// for damaged or duplicate remote states.
    pub fn inject(&self, name: &str, data: Vec<u8>, md5: &str) -> RemoteFile {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let file = RemoteFile {
            id: format!("mem-{}", inner.next_id),
            name: name.to_string(),
            size: data.len() as u64,
            md5: md5.to_string(),
        };
        inner.blobs.push((file.clone(), data));
        file
    }
}

impl ObjectStore for MemStore {
    fn update(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let listed = FileList::new(inner.blobs.iter().map(|(f, _)| f.clone()).collect());
        inner.listed = listed;
        Ok(())
    }

    fn files(&self) -> FileList {
        self.inner.lock().unwrap().listed.clone()
    }

    fn save(&self, name: &str, data: &mut dyn Read, _size_hint: u64) -> Result<RemoteFile> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)?;
        let md5 = hex::encode(Md5::digest(&buf));

        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let file = RemoteFile {
            id: format!("mem-{}", inner.next_id),
            name: name.to_string(),
            size: buf.len() as u64,
            md5,
        };
        inner.blobs.push((file.clone(), buf));
        Ok(file)
    }

    fn trash(&self, file: &RemoteFile) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.blobs.len();
        inner.blobs.retain(|(f, _)| f.id != file.id);
        if inner.blobs.len() == before {
            return Err(EngineError::BlobNotFound(file.name.clone()));
        }
        Ok(())
    }

    fn reader(&self, file: &RemoteFile, off: u64) -> Result<Box<dyn Read + Send>> {
        self.limited_reader(file, off, u64::MAX)
    }

    fn limited_reader(
        &self,
        file: &RemoteFile,
        off: u64,
        n: u64,
    ) -> Result<Box<dyn Read + Send>> {
        let inner = self.inner.lock().unwrap();
        let (_, data) = inner
            .blobs
            .iter()
            .find(|(f, _)| f.id == file.id)
            .ok_or_else(|| EngineError::BlobNotFound(file.name.clone()))?;

        let start = (off as usize).min(data.len());
        let end = off
            .saturating_add(n)
            .min(data.len() as u64) as usize;
        Ok(Box::new(Cursor::new(data[start..end].to_vec())))
    }
}

/// Store wrapper that counts saves and trashes. Used by tests asserting
/// write-once behavior.
pub struct CountingStore<S> {
    inner: S,
    counts: Mutex<HashMap<&'static str, usize>>,
}

impl<S: ObjectStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self, op: &str) -> usize {
        *self.counts.lock().unwrap().get(op).unwrap_or(&0)
    }

    pub fn reset(&self) {
        self.counts.lock().unwrap().clear();
    }

    fn bump(&self, op: &'static str) {
        *self.counts.lock().unwrap().entry(op).or_default() += 1;
    }
}

impl<S: ObjectStore> ObjectStore for CountingStore<S> {
    fn update(&self) -> Result<()> {
        self.inner.update()
    }

    fn files(&self) -> FileList {
        self.inner.files()
    }

    fn save(&self, name: &str, data: &mut dyn Read, size_hint: u64) -> Result<RemoteFile> {
        self.bump("save");
        self.inner.save(name, data, size_hint)
    }

    fn trash(&self, file: &RemoteFile) -> Result<()> {
        self.bump("trash");
        self.inner.trash(file)
    }

    fn reader(&self, file: &RemoteFile, off: u64) -> Result<Box<dyn Read + Send>> {
        self.inner.reader(file, off)
    }

    fn limited_reader(
        &self,
        file: &RemoteFile,
        off: u64,
        n: u64,
    ) -> Result<Box<dyn Read + Send>> {
        self.inner.limited_reader(file, off, n)
    }
}
