//! Folder and file scanning.
//!
//! [`scan_tree`] walks the mirror root and produces a fresh catalog, reusing
//! entries from the previous catalog when size, kind and mtime are
//! unchanged. [`scan_file`] derives the full part list of a single file,
//! which means reading the file twice per part (plain hash, then storage
//! hash), so reuse matters.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use md5::Md5;
use sha2::{Digest, Sha512};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use sbx_crypto::{CryptReader, Keyfile};

use crate::error::{CatalogError, Result};
use crate::model::{Catalog, FolderEntry, VirtFile};
use crate::{FilePart, MAX_FILE_SIZE_FOR_COMPRESSION, PART_SIZE};

/// Result of a tree scan.
pub struct ScanOutcome {
    pub catalog: Catalog,
    /// True if any entry was added, updated or removed since the previous
    /// catalog.
    pub changed: bool,
    /// One-line scan statistics for logging.
    pub summary: String,
}

/// Walk `root` and build a new catalog, carrying unchanged entries over
/// from `old`.
///
/// Bundle assignments are not carried over; run the packer afterwards.
pub fn scan_tree(root: impl AsRef<Path>, old: &Catalog, keyfile: &Keyfile) -> Result<ScanOutcome> {
    let root = root.as_ref();

    // Work on a clone of the old entries with stale bundle links cleared.
    // Entries still present after the walk have vanished locally.
    let mut old_files = old.files.clone();
    for entry in old_files.values_mut() {
        entry.also_in_bundle.clear();
    }

    let mut catalog = Catalog::new();
    let mut changed = false;
    let mut new_or_updated = 0usize;

    for walk_entry in walkdir::WalkDir::new(root) {
        let walk_entry = walk_entry?;
        let abs_path = walk_entry.path();

        let rel_path = match abs_path.strip_prefix(root) {
            Ok(p) if p.as_os_str().is_empty() => ".".to_string(),
            Ok(p) => normalize_rel_path(&p.to_string_lossy()),
            Err(e) => {
                return Err(CatalogError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    e,
                )))
            }
        };

        let meta = walk_entry.metadata()?;
        let is_dir = meta.is_dir();
        let mtime = unix_seconds(meta.modified()?);
        // folder sizes differ between platforms, force them to zero
        let size = if is_dir { 0 } else { meta.len() };

        let dir_listing = if is_dir {
            dir_entries(abs_path)?
        } else {
            Vec::new()
        };

        let prior = old_files.remove(&rel_path);
        let mut entry = match prior {
            Some(e) if e.file_size == size && e.is_dir == is_dir && e.mtime == mtime => e,
            prior => {
                new_or_updated += 1;
                changed = true;

                let entry = if is_dir {
                    VirtFile {
                        rel_path: rel_path.clone(),
                        file_size: 0,
                        mtime,
                        is_dir: true,
                        folder_content: dir_listing.clone(),
                        ..Default::default()
                    }
                } else {
                    let start = Instant::now();
                    let vf = scan_file(abs_path, &rel_path, keyfile)?;
                    let secs = start.elapsed().as_secs_f64().max(0.001);
                    debug!(
                        path = %rel_path,
                        mb_per_s = %format!("{:.2}", vf.file_size as f64 / (1024.0 * 1024.0) / secs),
                        new = prior.is_none(),
                        "scanned"
                    );
                    vf
                };
                entry
            }
        };

        // Folder listings are always refreshed so the catalog is current
        // even when no file content changed.
        entry.folder_content = dir_listing;

        catalog.files.insert(rel_path, entry);
    }

    // leftovers vanished locally
    let removed = old_files.len();
    if removed > 0 {
        changed = true;
    }

    let summary = format!(
        "scan: sum={}, changed={}, new_or_updated={}, removed={}",
        catalog.files.len(),
        changed,
        new_or_updated,
        removed
    );
    info!("{summary}");

    Ok(ScanOutcome {
        catalog,
        changed,
        summary,
    })
}

/// Scan a single file and derive its full part list.
///
/// `rel_path` is stored verbatim as the entry identity.
pub fn scan_file(abs_path: impl AsRef<Path>, rel_path: &str, keyfile: &Keyfile) -> Result<VirtFile> {
    let abs_path = abs_path.as_ref();

    let meta = fs::metadata(abs_path)?;
    if meta.is_dir() {
        return Err(CatalogError::IsAFolder(abs_path.to_path_buf()));
    }
    let file_size = meta.len();
    let mtime = unix_seconds(meta.modified()?);

    // Compression is decided once over the whole file, never per part.
    let (use_compression, compr_size) = try_compression(abs_path, file_size)?;

    let mut fh = File::open(abs_path)?;

    let mut parts = Vec::new();
    for part_no in 0.. {
        // the plain hash is the root of every other derived value
        let (plain_sha512, part_size) = plain_sha512(&mut fh, part_no)?;
        if part_size == 0 {
            // no empty trailing part
            break;
        }

        let data_key = keyfile.data_key(&plain_sha512);
        let storage_name = keyfile.crypt_name(&plain_sha512);
        let storage_size = if use_compression { compr_size } else { part_size };
        let storage_md5 = crypt_md5(&mut fh, part_no, use_compression, storage_size, &data_key)?;

        parts.push(FilePart {
            plain_sha512,
            storage_name,
            storage_size,
            storage_md5,
            data_key,
        });
    }

    Ok(VirtFile {
        rel_path: rel_path.to_string(),
        file_size,
        mtime,
        is_dir: false,
        folder_content: Vec::new(),
        parts,
        use_compression,
        also_in_bundle: String::new(),
    })
}

/// Unicode NFC plus forward slashes, applied to every path and name that
/// enters the catalog.
pub fn normalize_rel_path(raw: &str) -> String {
    raw.replace('\\', "/").nfc().collect()
}

fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Sorted folder listing with normalized names.
fn dir_entries(dir: &Path) -> Result<Vec<FolderEntry>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let is_dir = entry.metadata()?.is_dir();
        names.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    names.sort();

    Ok(names
        .into_iter()
        .map(|(name, is_dir)| FolderEntry {
            name: normalize_rel_path(&name),
            is_dir,
        })
        .collect())
}

/// Probe whether the whole file is worth compressing.
///
/// Only files up to [`MAX_FILE_SIZE_FOR_COMPRESSION`] (which always fit a
/// single part) are considered, and only a best-level ratio below 0.8
/// switches compression on. Returns the storage size to use.
fn try_compression(abs_path: &Path, file_size: u64) -> Result<(bool, u64)> {
    if file_size <= MAX_FILE_SIZE_FOR_COMPRESSION && file_size < PART_SIZE {
        let plain = fs::read(abs_path)?;
        let (compressed, ratio) = sbx_crypto::compress(&plain)?;
        if ratio < 0.8 {
            return Ok((true, compressed.len() as u64));
        }
    }
    Ok((false, file_size))
}

fn seek_to_part(fh: &mut File, part_no: usize) -> Result<u64> {
    let offset = part_no as u64 * PART_SIZE;
    let landed = fh.seek(SeekFrom::Start(offset))?;
    if landed != offset {
        return Err(CatalogError::SeekMismatch {
            part_no,
            expected: offset,
            got: landed,
        });
    }
    Ok(offset)
}

/// SHA-512 over one part's plaintext; also reports the part length.
fn plain_sha512(fh: &mut File, part_no: usize) -> Result<(Vec<u8>, u64)> {
    seek_to_part(fh, part_no)?;

    let mut hasher = Sha512::new();
    let part_size = io::copy(&mut fh.take(PART_SIZE), &mut hasher)?;
    Ok((hasher.finalize().to_vec(), part_size))
}

/// MD5 over one part as it will appear on the remote: optionally compressed,
/// then encrypted at CTR offset 0.
fn crypt_md5(
    fh: &mut File,
    part_no: usize,
    use_compression: bool,
    storage_size: u64,
    data_key: &[u8],
) -> Result<String> {
    if use_compression && part_no > 0 {
        return Err(CatalogError::CompressedTail);
    }
    seek_to_part(fh, part_no)?;

    let mut crypted: Box<dyn Read + '_> = if use_compression {
        let mut buf = Vec::new();
        fh.take(PART_SIZE).read_to_end(&mut buf)?;
        let (compressed, _) = sbx_crypto::compress(&buf)?;
        Box::new(CryptReader::new(Cursor::new(compressed), 0, data_key))
    } else {
        Box::new(CryptReader::new(fh.take(PART_SIZE), 0, data_key))
    };

    let mut hasher = Md5::new();
    let n = io::copy(&mut crypted, &mut hasher)?;
    if n != storage_size {
        return Err(CatalogError::StorageSizeMismatch {
            expected: storage_size,
            got: n,
        });
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn test_keyfile() -> Keyfile {
        let mut raw = [0u8; sbx_crypto::KEYFILE_SIZE];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        Keyfile::from_bytes(&raw)
    }

    fn write_tree(files: &[(&str, &[u8])]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let root = dir.path().to_path_buf();
        (dir, root)
    }

    #[test]
    fn test_scan_file_tiny() {
        let (_dir, root) = write_tree(&[("hi.txt", b"hi\n")]);
        let kf = test_keyfile();

        let vf = scan_file(root.join("hi.txt"), "hi.txt", &kf).unwrap();
        assert_eq!(vf.file_size, 3);
        assert!(!vf.use_compression, "3 bytes never hit the ratio threshold");
        assert_eq!(vf.parts.len(), 1);

        let part = &vf.parts[0];
        assert_eq!(part.storage_size, 3);
        assert_eq!(part.storage_name.len(), 128);
        assert_eq!(part.plain_sha512, Sha512::digest(b"hi\n").to_vec());
        assert_eq!(part.data_key, kf.data_key(&part.plain_sha512));

        // md5 of the 3 encrypted bytes
        let mut enc = b"hi\n".to_vec();
        sbx_crypto::crypt_bytes(&mut enc, 0, &part.data_key).unwrap();
        assert_eq!(part.storage_md5, hex::encode(Md5::digest(&enc)));
    }

    #[test]
    fn test_scan_file_compressible() {
        let (_dir, root) = write_tree(&[("zeros.dat", &[0u8; 100][..])]);
        let kf = test_keyfile();

        let vf = scan_file(root.join("zeros.dat"), "zeros.dat", &kf).unwrap();
        assert!(vf.use_compression);
        assert_eq!(vf.parts.len(), 1);
        assert!(vf.parts[0].storage_size < 80);

        // the storage md5 covers the compressed-then-encrypted bytes
        let (mut compressed, _) = sbx_crypto::compress(&[0u8; 100]).unwrap();
        assert_eq!(vf.parts[0].storage_size, compressed.len() as u64);
        sbx_crypto::crypt_bytes(&mut compressed, 0, &vf.parts[0].data_key).unwrap();
        assert_eq!(vf.parts[0].storage_md5, hex::encode(Md5::digest(&compressed)));
    }

    #[test]
    fn test_scan_file_zero_length() {
        let (_dir, root) = write_tree(&[("empty.dat", &[][..])]);
        let vf = scan_file(root.join("empty.dat"), "empty.dat", &test_keyfile()).unwrap();
        assert_eq!(vf.file_size, 0);
        assert!(vf.parts.is_empty());
        assert!(!vf.use_compression);
    }

    #[test]
    fn test_scan_file_incompressible_above_threshold() {
        // larger than the compression bound, must keep one plain part
        let data: Vec<u8> = (0..MAX_FILE_SIZE_FOR_COMPRESSION + 1)
            .map(|i| (i * 7 % 251) as u8)
            .collect();
        let (_dir, root) = write_tree(&[("big.dat", &data[..])]);

        let vf = scan_file(root.join("big.dat"), "big.dat", &test_keyfile()).unwrap();
        assert!(!vf.use_compression);
        assert_eq!(vf.parts.len(), 1);
        assert_eq!(vf.parts[0].storage_size, data.len() as u64);
    }

    #[test]
    fn test_scan_tree_shapes() {
        let (_dir, root) = write_tree(&[
            ("a.txt", b"aaa".as_slice()),
            ("sub/b.txt", b"bbb".as_slice()),
        ]);

        let out = scan_tree(&root, &Catalog::new(), &test_keyfile()).unwrap();
        assert!(out.changed);

        let keys: Vec<&str> = out.catalog.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![".", "a.txt", "sub", "sub/b.txt"]);

        let rootdir = &out.catalog.files["."];
        assert!(rootdir.is_dir);
        assert_eq!(rootdir.file_size, 0);
        let names: Vec<_> = rootdir
            .folder_content
            .iter()
            .map(|e| (e.name.as_str(), e.is_dir))
            .collect();
        assert_eq!(names, vec![("a.txt", false), ("sub", true)]);

        let sub = &out.catalog.files["sub"];
        assert_eq!(sub.folder_content.len(), 1);
        assert_eq!(sub.folder_content[0].name, "b.txt");
    }

    #[test]
    fn test_rescan_unchanged_tree() {
        let (_dir, root) = write_tree(&[("a.txt", b"aaa".as_slice()), ("sub/b.txt", b"b".as_slice())]);
        let kf = test_keyfile();

        let first = scan_tree(&root, &Catalog::new(), &kf).unwrap();
        assert!(first.changed);

        let second = scan_tree(&root, &first.catalog, &kf).unwrap();
        assert!(!second.changed, "unchanged tree must not report changes");
        assert_eq!(second.catalog, first.catalog);
    }

    #[test]
    fn test_rescan_detects_new_file() {
        let (_dir, root) = write_tree(&[("a.txt", b"aaa".as_slice())]);
        let kf = test_keyfile();
        let first = scan_tree(&root, &Catalog::new(), &kf).unwrap();

        fs::write(root.join("b.txt"), b"new").unwrap();
        let second = scan_tree(&root, &first.catalog, &kf).unwrap();
        assert!(second.changed);
        assert!(second.catalog.files.contains_key("b.txt"));
    }

    #[test]
    fn test_rescan_detects_removed_file() {
        let (_dir, root) = write_tree(&[("a.txt", b"aaa".as_slice()), ("b.txt", b"bbb".as_slice())]);
        let kf = test_keyfile();
        let first = scan_tree(&root, &Catalog::new(), &kf).unwrap();

        fs::remove_file(root.join("b.txt")).unwrap();
        let second = scan_tree(&root, &first.catalog, &kf).unwrap();
        assert!(second.changed);
        assert!(!second.catalog.files.contains_key("b.txt"));
    }

    #[test]
    fn test_rescan_detects_touched_mtime() {
        let (_dir, root) = write_tree(&[("a.txt", b"aaa".as_slice())]);
        let kf = test_keyfile();
        let first = scan_tree(&root, &Catalog::new(), &kf).unwrap();

        // force a different mtime, content unchanged
        let past = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        let fh = File::options().write(true).open(root.join("a.txt")).unwrap();
        fh.set_modified(past).unwrap();
        drop(fh);

        let second = scan_tree(&root, &first.catalog, &kf).unwrap();
        assert!(second.changed);
    }

    #[test]
    fn test_rescan_clears_bundle_links() {
        let (_dir, root) = write_tree(&[("a.txt", b"aaa".as_slice())]);
        let kf = test_keyfile();
        let mut first = scan_tree(&root, &Catalog::new(), &kf).unwrap();

        // simulate a packer run
        first
            .catalog
            .files
            .get_mut("a.txt")
            .unwrap()
            .also_in_bundle = "B_something".into();

        let second = scan_tree(&root, &first.catalog, &kf).unwrap();
        assert_eq!(second.catalog.files["a.txt"].also_in_bundle, "");
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("foo\\bar\\x.txt"), "foo/bar/x.txt");
        // NFD umlaut folds to its NFC form
        assert_eq!(normalize_rel_path("u\u{0308}ber.txt"), "\u{00fc}ber.txt");
    }
}
