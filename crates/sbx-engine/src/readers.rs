//! Random-access readers over remote blobs.
//!
//! All readers hand out plaintext. [`DecryptStore`] sits between a reader
//! and the object store and applies the CTR keystream at the blob-local
//! offset, so the readers themselves only deal in byte ranges.
//!
//! `read_at` takes `&self`; a single reader may serve concurrent reads.
//! A read shorter than the buffer means the end of the file was reached,
//! `Ok(0)` means the offset is at or past the end.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use sbx_crypto::CryptReader;

use crate::error::{EngineError, Result};
use crate::store::{ObjectStore, RemoteFile};

/// Positioned read into a caller buffer.
pub trait ReadAt: Send + Sync {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize>;

    /// Total plaintext size served by this reader.
    fn size(&self) -> u64;
}

/// Reader for empty files and folders.
pub struct ZeroReader;

impl ReadAt for ZeroReader {
    fn read_at(&self, _buf: &mut [u8], _off: u64) -> Result<usize> {
        Ok(0)
    }

    fn size(&self) -> u64 {
        0
    }
}

/// Reader backed by decrypted bytes held in memory.
///
/// Used for compressed files, which cannot be random-accessed on the remote
/// and are inflated once at open time.
pub struct RamReader {
    data: Vec<u8>,
}

impl RamReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ReadAt for RamReader {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        if off >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = off as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Decrypting range access over one store.
///
/// Holds the data key per blob id. The CTR offset passed to the cipher is
/// always the blob-local offset, which makes this correct for parts and for
/// bundles alike.
pub struct DecryptStore {
    store: Arc<dyn ObjectStore>,
    keys: HashMap<String, Vec<u8>>,
}

impl DecryptStore {
    pub fn new(store: Arc<dyn ObjectStore>, keys: HashMap<String, Vec<u8>>) -> Self {
        Self { store, keys }
    }

    /// Plaintext stream of `n` bytes starting at blob offset `off`.
    fn limited_reader(
        &self,
        file: &RemoteFile,
        off: u64,
        n: u64,
    ) -> Result<Box<dyn Read + Send>> {
        let key = self
            .keys
            .get(&file.id)
            .ok_or_else(|| EngineError::DataKeyNotFound(file.name.clone()))?;
        let inner = self.store.limited_reader(file, off, n)?;
        Ok(Box::new(CryptReader::new(inner, off, key)))
    }

    /// Read a plaintext range into `buf`, short only at the end of the blob.
    fn read_range(&self, file: &RemoteFile, off: u64, buf: &mut [u8]) -> Result<usize> {
        let mut r = self.limited_reader(file, off, buf.len() as u64)?;
        let mut filled = 0;
        loop {
            let n = r.read(&mut buf[filled..])?;
            if n == 0 || filled == buf.len() {
                return Ok(filled);
            }
            filled += n;
        }
    }
}

/// Range view into a single blob: a part, or a slice of a bundle.
pub struct SubReader {
    file: RemoteFile,
    source: DecryptStore,
    /// Start of the view inside the blob.
    base_off: u64,
    /// Length of the view.
    len: u64,
}

impl SubReader {
    pub fn new(file: RemoteFile, source: DecryptStore, base_off: u64, len: u64) -> Self {
        Self {
            file,
            source,
            base_off,
            len,
        }
    }
}

impl ReadAt for SubReader {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        if off >= self.len {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(self.len - off) as usize;
        self.source
            .read_range(&self.file, self.base_off + off, &mut buf[..n])
    }

    fn size(&self) -> u64 {
        self.len
    }
}

/// Composite reader over the ordered part blobs of a multi-part file.
///
/// Parts are independent blobs with independent keys; the CTR offset starts
/// over at every part boundary.
pub struct MultiReader {
    parts: Vec<RemoteFile>,
    source: DecryptStore,
    total: u64,
}

impl MultiReader {
    pub fn new(parts: Vec<RemoteFile>, source: DecryptStore) -> Self {
        let total = parts.iter().map(|p| p.size).sum();
        Self {
            parts,
            source,
            total,
        }
    }
}

impl ReadAt for MultiReader {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        // locate the part containing `off` by cumulative sizes
        let mut part_start = 0u64;
        let mut index = self.parts.len();
        for (i, part) in self.parts.iter().enumerate() {
            if off < part_start + part.size {
                index = i;
                break;
            }
            part_start += part.size;
        }

        let mut filled = 0;
        let mut local_off = off - part_start.min(off);
        for part in &self.parts[index.min(self.parts.len())..] {
            if filled == buf.len() {
                break;
            }
            let want = ((buf.len() - filled) as u64).min(part.size - local_off) as usize;
            let n = self
                .source
                .read_range(part, local_off, &mut buf[filled..filled + want])?;
            filled += n;
            if n < want {
                // the blob ended early; the catalog promised more
                break;
            }
            local_off = 0;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.total
    }
}
