//! Opening a virtual file for random-access reads.
//!
//! Case order matters: empty files and folders short-circuit, compressed
//! files are inflated into RAM, single-part files get a range view (served
//! from their bundle when possible), and everything else is composed from
//! its parts.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use sbx_catalog::{Bundle, Catalog, VirtFile};
use sbx_crypto::crypt_bytes;

use crate::error::{EngineError, Result};
use crate::readers::{DecryptStore, MultiReader, RamReader, ReadAt, SubReader, ZeroReader};
use crate::store::{read_range, ObjectStore, RemoteFile};

/// Open `file` and return a thread-safe random-access reader for its
/// plaintext.
///
/// Small files are preferably served out of their bundle.
pub fn open(
    file: &VirtFile,
    catalog: &Catalog,
    store: &Arc<dyn ObjectStore>,
) -> Result<Box<dyn ReadAt>> {
    // case 0: nothing to read
    if file.file_size == 0 || file.is_dir {
        debug!(file = %file.name(), "open: zero reader");
        return Ok(Box::new(ZeroReader));
    }

    // case 1: compressed, single source (bundle slice or part blob).
    // Random access into a zstd frame is impossible, read and inflate now.
    if file.parts.len() == 1 && file.use_compression {
        let (source, off, n, data_key) = bundle_or_part(file, catalog, store)?;

        let mut data = vec![0u8; n as usize];
        let got = read_range(store.as_ref(), &source, off, &mut data)?;
        if got as u64 != n {
            return Err(EngineError::UnexpectedEof);
        }

        crypt_bytes(&mut data, off, &data_key)?;
        let plain = sbx_crypto::decompress(&data)?;

        debug!(file = %file.name(), bytes = plain.len(), "open: ram reader");
        return Ok(Box::new(RamReader::new(plain)));
    }

    // case 2: plain, single source
    if file.parts.len() == 1 {
        let (source, off, n, data_key) = bundle_or_part(file, catalog, store)?;

        let keys = HashMap::from([(source.id.clone(), data_key)]);
        let decrypt = DecryptStore::new(Arc::clone(store), keys);

        debug!(file = %file.name(), off, n, "open: sub reader");
        return Ok(Box::new(SubReader::new(source, decrypt, off, n)));
    }

    // case 3: multi part
    let list = store.files();
    let mut parts = Vec::with_capacity(file.parts.len());
    let mut keys = HashMap::new();
    for part in &file.parts {
        let source = list
            .by_attr(&part.storage_name, part.storage_size, &part.storage_md5)
            .map_err(|_| EngineError::PartNotFound(part.storage_name.clone()))?;
        keys.insert(source.id.clone(), part.data_key.clone());
        parts.push(source);
    }

    debug!(file = %file.name(), parts = parts.len(), "open: multi reader");
    Ok(Box::new(MultiReader::new(
        parts,
        DecryptStore::new(Arc::clone(store), keys),
    )))
}

/// Resolve the blob serving a single-part file.
///
/// Default: the part blob itself, full range, part key. Upgraded to a slice
/// of the bundle blob when the file is bundled and the bundle resolves
/// cleanly. Every failure on the bundle path logs and falls back to the
/// part; only a missing part blob is fatal.
fn bundle_or_part(
    file: &VirtFile,
    catalog: &Catalog,
    store: &Arc<dyn ObjectStore>,
) -> Result<(RemoteFile, u64, u64, Vec<u8>)> {
    if file.parts.len() != 1 {
        return Err(EngineError::BadBundleMember(file.rel_path.clone()));
    }
    let part = &file.parts[0];

    // default resolution: the part blob
    let source = store
        .files()
        .by_attr(&part.storage_name, part.storage_size, &part.storage_md5)
        .map_err(|_| {
            error!(file = %file.rel_path, "part not found in storage");
            EngineError::PartNotFound(part.storage_name.clone())
        })?;
    let default = (source, 0, part.storage_size, part.data_key.clone());

    if file.also_in_bundle.is_empty() {
        return Ok(default);
    }

    // try the bundle; any failure below falls back to the part
    let Some(bundle) = catalog.bundles.get(&file.also_in_bundle) else {
        error!(file = %file.rel_path, bundle = %file.also_in_bundle, "bundle link error");
        return Ok(default);
    };

    let bundle_blob = match store.files().by_attr(
        &bundle.part.storage_name,
        bundle.part.storage_size,
        &bundle.part.storage_md5,
    ) {
        Ok(f) => f,
        Err(_) => {
            error!(
                file = %file.rel_path,
                bundle = %bundle.part.storage_name,
                "bundle not found in storage"
            );
            return Ok(default);
        }
    };

    let Some((index, offset)) = pos_in_bundle(bundle, catalog, file) else {
        return Ok(default);
    };

    debug!(
        file = %file.rel_path,
        bundle = %bundle_blob.name,
        index,
        offset,
        "serving from bundle"
    );
    Ok((
        bundle_blob,
        offset,
        part.storage_size,
        bundle.part.data_key.clone(),
    ))
}

/// Offset of `target`'s bytes inside the bundle blob, with its member index.
fn pos_in_bundle(bundle: &Bundle, catalog: &Catalog, target: &VirtFile) -> Option<(usize, u64)> {
    let mut off = 0u64;
    for (i, member_id) in bundle.content.iter().enumerate() {
        let Some(member) = catalog.files.get(member_id) else {
            error!(bundle = %bundle.part.storage_name, index = i, "bundle content link error");
            return None;
        };
        if member.parts.len() != 1 {
            error!(bundle = %bundle.part.storage_name, index = i, "bundle member part check fail");
            return None;
        }

        if member.id() == target.id() {
            return Some((i, off));
        }
        off += member.parts[0].storage_size;
    }

    error!(file = %target.rel_path, "file not found in bundle");
    None
}
