//! In-memory sector cache for random-access reads.
//!
//! Random reads against a remote pay one round-trip per request. The cache
//! stores fixed-size ciphertext sectors keyed by blob identity, so repeated
//! and overlapping windows are served locally. Decryption happens above
//! this layer; cached bytes are always ciphertext.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::error::Result;
use crate::store::{FileList, ObjectStore, RemoteFile};

/// Default sector size: 1 MiB.
pub const SECTOR_SIZE: u64 = 1024 * 1024;

/// LRU cache over blob sectors.
pub struct SectorCache {
    sector_size: u64,
    max_sectors: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    // key: (blob id, blob md5, sector number)
    sectors: HashMap<(String, String, u64), (Arc<Vec<u8>>, u64)>,
    tick: u64,
}

impl SectorCache {
    /// Cache with the given capacity in MiB and the default sector size.
    pub fn new(capacity_mb: usize) -> Self {
        Self::with_sector_size(capacity_mb, SECTOR_SIZE)
    }

    pub fn with_sector_size(capacity_mb: usize, sector_size: u64) -> Self {
        let max_sectors = ((capacity_mb as u64 * 1024 * 1024) / sector_size.max(1)).max(1);
        Self {
            sector_size,
            max_sectors: max_sectors as usize,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    fn get(&self, file: &RemoteFile, sector: u64) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        let key = (file.id.clone(), file.md5.clone(), sector);
        inner.sectors.get_mut(&key).map(|(data, used)| {
            *used = tick;
            Arc::clone(data)
        })
    }

    fn put(&self, file: &RemoteFile, sector: u64, data: Arc<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        inner
            .sectors
            .insert((file.id.clone(), file.md5.clone(), sector), (data, tick));

        while inner.sectors.len() > self.max_sectors {
            // evict the least recently used sector
            if let Some(key) = inner
                .sectors
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                inner.sectors.remove(&key);
            } else {
                break;
            }
        }
    }
}

/// Store wrapper that serves limited readers out of a [`SectorCache`].
///
/// Everything except `limited_reader` passes straight through; sequential
/// full-blob streams gain nothing from sector granularity.
pub struct CachedStore<S> {
    inner: S,
    cache: Arc<SectorCache>,
}

impl<S: ObjectStore> CachedStore<S> {
    pub fn new(inner: S, cache: Arc<SectorCache>) -> Self {
        Self { inner, cache }
    }

    fn sector(&self, file: &RemoteFile, sector_no: u64) -> Result<Arc<Vec<u8>>> {
        if let Some(hit) = self.cache.get(file, sector_no) {
            trace!(blob = %file.name, sector_no, "sector cache hit");
            return Ok(hit);
        }

        let size = self.cache.sector_size();
        let mut buf = Vec::new();
        self.inner
            .limited_reader(file, sector_no * size, size)?
            .read_to_end(&mut buf)?;
        let data = Arc::new(buf);
        self.cache.put(file, sector_no, Arc::clone(&data));
        Ok(data)
    }
}

impl<S: ObjectStore> ObjectStore for CachedStore<S> {
    fn update(&self) -> Result<()> {
        self.inner.update()
    }

    fn files(&self) -> FileList {
        self.inner.files()
    }

    fn save(&self, name: &str, data: &mut dyn Read, size_hint: u64) -> Result<RemoteFile> {
        self.inner.save(name, data, size_hint)
    }

    fn trash(&self, file: &RemoteFile) -> Result<()> {
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
        let size = self.cache.sector_size();
        let end = off.saturating_add(n);

        let mut out = Vec::new();
        let mut sector_no = off / size;
        loop {
            let sector_start = sector_no * size;
            if sector_start >= end {
                break;
            }
            let data = self.sector(file, sector_no)?;

            let lo = off.saturating_sub(sector_start).min(data.len() as u64) as usize;
            let hi = (end - sector_start).min(data.len() as u64) as usize;
            out.extend_from_slice(&data[lo..hi]);

            if (data.len() as u64) < size {
                break; // short sector, end of blob
            }
            sector_no += 1;
        }

        Ok(Box::new(Cursor::new(out)))
    }
}
