//! Local directory as a flat blob namespace.
//!
//! Every blob is one file directly under the store root; the file name is
//! the blob name and doubles as the blob id, since a directory cannot hold
//! name duplicates. MD5 digests are memoized per (size, mtime) so a listing
//! refresh only hashes blobs that actually changed.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::store::{FileList, ObjectStore, RemoteFile};

pub struct DirStore {
    root: PathBuf,
    inner: Mutex<DirInner>,
}

#[derive(Default)]
struct DirInner {
    listed: FileList,
    // blob name -> (size, mtime unix nanos, md5)
    md5_memo: HashMap<String, (u64, i128, String)>,
}

impl DirStore {
    /// Open (and create if needed) the store directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            inner: Mutex::new(DirInner::default()),
        })
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn mtime_nanos(meta: &fs::Metadata) -> i128 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(-1)
}

impl ObjectStore for DirStore {
    fn update(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut files = Vec::new();
        let mut memo = HashMap::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".incoming") {
                continue; // save in progress
            }
            let size = meta.len();
            let mtime = mtime_nanos(&meta);

            let md5 = match inner.md5_memo.get(&name) {
                Some((s, t, md5)) if *s == size && *t == mtime => md5.clone(),
                _ => {
                    debug!(blob = %name, size, "hashing blob");
                    let mut hasher = Md5::new();
                    std::io::copy(&mut File::open(entry.path())?, &mut hasher)?;
                    hex::encode(hasher.finalize())
                }
            };

            memo.insert(name.clone(), (size, mtime, md5.clone()));
            files.push(RemoteFile {
                id: name.clone(),
                name,
                size,
                md5,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        inner.listed = FileList::new(files);
        inner.md5_memo = memo;
        Ok(())
    }

    fn files(&self) -> FileList {
        self.inner.lock().unwrap().listed.clone()
    }

    fn save(&self, name: &str, data: &mut dyn Read, _size_hint: u64) -> Result<RemoteFile> {
        let path = self.blob_path(name);
        let tmp = self.root.join(format!("{name}.incoming"));

        let mut hasher = Md5::new();
        let mut out = File::create(&tmp)?;
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = data.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            std::io::Write::write_all(&mut out, &buf[..n])?;
            size += n as u64;
        }
        out.sync_all()?;
        drop(out);
        fs::rename(&tmp, &path)?;

        Ok(RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            size,
            md5: hex::encode(hasher.finalize()),
        })
    }

    fn trash(&self, file: &RemoteFile) -> Result<()> {
        let path = self.blob_path(&file.name);
        if !path.exists() {
            return Err(EngineError::BlobNotFound(file.name.clone()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn reader(&self, file: &RemoteFile, off: u64) -> Result<Box<dyn Read + Send>> {
        let mut fh = File::open(self.blob_path(&file.name))?;
        fh.seek(SeekFrom::Start(off))?;
        Ok(Box::new(fh))
    }

    fn limited_reader(
        &self,
        file: &RemoteFile,
        off: u64,
        n: u64,
    ) -> Result<Box<dyn Read + Send>> {
        let mut fh = File::open(self.blob_path(&file.name))?;
        fh.seek(SeekFrom::Start(off))?;
        Ok(Box::new(fh.take(n)))
    }
}
