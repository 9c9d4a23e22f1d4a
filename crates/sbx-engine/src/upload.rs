//! Write-once upload of the catalog's blobs.
//!
//! A blob already present with the right name, size and md5 is never
//! written again, so re-running the upload against an unchanged tree is a
//! no-op. The sealed index goes up last, after every part and bundle it
//! references; readers coming up cold can therefore trust whatever index
//! they find.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, error, info};

use sbx_catalog::{Catalog, FilePart, VirtFile, PART_SIZE};
use sbx_crypto::{crypt_bytes, CryptReader};

use crate::error::{EngineError, Result};
use crate::store::ObjectStore;
use crate::INDEX_NAME;

/// Upload all missing blobs of `catalog`, then replace the index blob.
///
/// `root` is the local tree the catalog was scanned from. Every failure is
/// fatal; the old index stays in place if anything before it fails.
pub fn upload(
    root: impl AsRef<Path>,
    catalog: &Catalog,
    index_key: &[u8],
    store: &dyn ObjectStore,
) -> Result<()> {
    let root = root.as_ref();

    // refresh the listing so existing blobs are skipped, and track what
    // this run writes since saves only show up in the next listing
    store.update()?;
    let mut uploaded: HashMap<String, FilePart> = HashMap::new();

    // files in path order
    for (rel_path, file) in &catalog.files {
        upload_file(&root.join(rel_path), file, store, &mut uploaded)?;
    }

    upload_bundles(root, catalog, store, &mut uploaded)?;

    upload_index(catalog, index_key, store)?;

    Ok(())
}

/// Check whether a blob with these attributes already exists, either on the
/// refreshed remote listing or among this run's uploads.
fn exists(part: &FilePart, store: &dyn ObjectStore, uploaded: &HashMap<String, FilePart>) -> bool {
    let local = uploaded.values().any(|up| {
        up.storage_name == part.storage_name
            && up.storage_size == part.storage_size
            && up.storage_md5 == part.storage_md5
    });
    if local {
        return true;
    }

    store
        .files()
        .by_attr(&part.storage_name, part.storage_size, &part.storage_md5)
        .is_ok()
}

fn seek_to_part(fh: &mut File, part_no: usize) -> Result<()> {
    let offset = part_no as u64 * PART_SIZE;
    let landed = fh.seek(SeekFrom::Start(offset))?;
    if landed != offset {
        return Err(EngineError::SizeMismatch {
            name: "seek".into(),
            expected: offset,
            got: landed,
        });
    }
    Ok(())
}

/// Upload one part: optionally compressed (first part only), encrypted at
/// CTR offset 0, stored under its content-derived name.
fn upload_part(
    fh: &mut File,
    part_no: usize,
    use_compression: bool,
    part: &FilePart,
    store: &dyn ObjectStore,
) -> Result<()> {
    if use_compression && part_no > 0 {
        return Err(sbx_catalog::CatalogError::CompressedTail.into());
    }
    seek_to_part(fh, part_no)?;

    let mut encrypted: Box<dyn Read + '_> = if use_compression {
        let mut plain = Vec::new();
        fh.take(PART_SIZE).read_to_end(&mut plain)?;
        let (compressed, _) = sbx_crypto::compress(&plain)?;
        if compressed.len() as u64 != part.storage_size {
            return Err(EngineError::SizeMismatch {
                name: part.storage_name.clone(),
                expected: part.storage_size,
                got: compressed.len() as u64,
            });
        }
        Box::new(CryptReader::new(Cursor::new(compressed), 0, &part.data_key))
    } else {
        Box::new(CryptReader::new(fh.take(PART_SIZE), 0, &part.data_key))
    };

    store.save(&part.storage_name, &mut encrypted, part.storage_size)?;
    Ok(())
}

/// Upload all missing parts of one file. Folders and empty files are
/// skipped.
fn upload_file(
    abs_path: &Path,
    file: &VirtFile,
    store: &dyn ObjectStore,
    uploaded: &mut HashMap<String, FilePart>,
) -> Result<()> {
    if file.is_dir || file.file_size == 0 {
        return Ok(());
    }

    let mut fh = File::open(abs_path).map_err(|e| {
        error!(file = %file.rel_path, "cannot open local file");
        EngineError::Io(e)
    })?;

    for (part_no, part) in file.parts.iter().enumerate() {
        if exists(part, store, uploaded) {
            continue;
        }

        debug!(
            file = %file.rel_path,
            part_no,
            bytes = part.storage_size,
            compressed = file.use_compression,
            "uploading part"
        );
        upload_part(&mut fh, part_no, file.use_compression, part, store).map_err(|e| {
            error!(file = %file.rel_path, part_no, "part upload failed");
            e
        })?;

        uploaded.insert(
            format!("{}|{}", part.storage_name, part.storage_md5),
            part.clone(),
        );
    }

    Ok(())
}

/// Upload all missing bundles. A bundle blob is assembled in memory from
/// its members' part bytes, each encrypted with the bundle key at the
/// member's bundle-local offset.
fn upload_bundles(
    root: &Path,
    catalog: &Catalog,
    store: &dyn ObjectStore,
    uploaded: &mut HashMap<String, FilePart>,
) -> Result<()> {
    for bundle in catalog.bundles.values() {
        // bundles are identified by name and size; no md5 is tracked
        if exists(&bundle.part, store, uploaded) {
            continue;
        }

        let mut data = Vec::with_capacity(bundle.part.storage_size as usize);
        for member_id in &bundle.content {
            let member = catalog
                .files
                .get(member_id)
                .ok_or_else(|| EngineError::BadBundleMember(member_id.clone()))?;
            if member.parts.len() != 1 {
                error!(file = %member.rel_path, parts = member.parts.len(), "bundle member check");
                return Err(EngineError::BadBundleMember(member.rel_path.clone()));
            }
            let part = &member.parts[0];

            let mut bytes = std::fs::read(root.join(&member.rel_path))?;
            if member.use_compression {
                let (compressed, _) = sbx_crypto::compress(&bytes)?;
                bytes = compressed;
            }
            if bytes.len() as u64 != part.storage_size {
                error!(file = %member.rel_path, "bundle member size check fail");
                return Err(EngineError::SizeMismatch {
                    name: member.rel_path.clone(),
                    expected: part.storage_size,
                    got: bytes.len() as u64,
                });
            }

            // bundle-local CTR offset is the bytes written so far
            crypt_bytes(&mut bytes, data.len() as u64, &bundle.part.data_key)?;
            data.extend_from_slice(&bytes);
        }

        if data.len() as u64 != bundle.part.storage_size {
            error!(bundle = %bundle.part.storage_name, "bundle size check fail");
            return Err(EngineError::SizeMismatch {
                name: bundle.part.storage_name.clone(),
                expected: bundle.part.storage_size,
                got: data.len() as u64,
            });
        }

        debug!(
            bundle = %bundle.part.storage_name,
            members = bundle.content.len(),
            bytes = data.len(),
            "uploading bundle"
        );
        store.save(
            &bundle.part.storage_name,
            &mut data.as_slice(),
            bundle.part.storage_size,
        )?;

        uploaded.insert(
            format!("{}#{}", bundle.part.storage_name, bundle.part.storage_size),
            bundle.part.clone(),
        );
    }

    Ok(())
}

/// Remove every old index blob, then upload the freshly sealed catalog.
fn upload_index(catalog: &Catalog, index_key: &[u8], store: &dyn ObjectStore) -> Result<()> {
    info!(
        files = catalog.files.len(),
        bundles = catalog.bundles.len(),
        "uploading index"
    );

    for file in store.files().all() {
        if file.name == INDEX_NAME {
            store.trash(file).map_err(|e| {
                error!(id = %file.id, "removing old index failed");
                e
            })?;
        }
    }

    let sealed = sbx_catalog::seal(catalog, index_key)?;
    store.save(INDEX_NAME, &mut sealed.as_slice(), sealed.len() as u64)?;
    Ok(())
}
