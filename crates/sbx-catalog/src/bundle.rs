//! Bundle packer.
//!
//! Small files cost one remote round-trip each; packing them into larger
//! blobs keeps directory-local files together and cuts request counts. The
//! packer is a pure function of the catalog: the same catalog always yields
//! the same bundle identities and memberships.
//!
//! Grouping runs in three phases over the candidates (single-part files,
//! 0 < size < [`MAX_FILE_SIZE_TO_BUNDLE`]), sorted by path:
//!
//! 1. everything whose stored size is below 12 KiB, in one group
//! 2. everything (left) that is stored compressed, in one group
//! 3. path locality: shorten a path-prefix cut length from the longest
//!    path down to zero and emit every prefix group whose plain size
//!    crosses half a part
//!
//! Groups above twice the part size are split, singletons are dropped.

use std::collections::BTreeMap;

use sha2::{Digest, Sha512};
use tracing::debug;

use sbx_crypto::Keyfile;

use crate::model::{Bundle, Catalog, FilePart, VirtFile};
use crate::{BUNDLE_PREFIX, MAX_FILE_SIZE_TO_BUNDLE, PART_SIZE};

/// Storage-size bound below which a file counts as tiny (phase 1).
const TINY_STORAGE_SIZE: u64 = 12 * 1024;

/// Recompute all bundles of the catalog.
///
/// Existing bundles and back-references are discarded first, so the result
/// only depends on the current file entries.
pub fn make_bundles(catalog: &mut Catalog, keyfile: &Keyfile) {
    reset_bundles(catalog);

    for group in find_groups(catalog) {
        // the bundle's plain hash chains the members' part hashes in order
        let mut hasher = Sha512::new();
        let mut storage_size = 0u64;
        for file in &group {
            hasher.update(&file.parts[0].plain_sha512);
            storage_size += file.parts[0].storage_size;
        }
        let plain_hash = hasher.finalize().to_vec();

        let content: Vec<String> = group.iter().map(|f| f.id().to_string()).collect();

        let bundle = Bundle {
            part: FilePart {
                data_key: keyfile.data_key(&plain_hash),
                storage_name: format!("{BUNDLE_PREFIX}{}", keyfile.crypt_name(&plain_hash)),
                storage_size,
                storage_md5: String::new(), // not tracked for bundles
                plain_sha512: plain_hash,
            },
            content,
        };

        // write both sides: the bundle table and the member back-references
        for rel_path in &bundle.content {
            if let Some(file) = catalog.files.get_mut(rel_path) {
                file.also_in_bundle = bundle.id().to_string();
            }
        }
        catalog.bundles.insert(bundle.id().to_string(), bundle);
    }
}

/// Remove all bundles and bundle back-references.
fn reset_bundles(catalog: &mut Catalog) {
    for file in catalog.files.values_mut() {
        file.also_in_bundle.clear();
    }
    catalog.bundles.clear();
}

/// Group candidate files into future bundles. Does not change the catalog.
fn find_groups(catalog: &Catalog) -> Vec<Vec<VirtFile>> {
    let mut found: Vec<Vec<VirtFile>> = Vec::new();

    // candidates: real content, small, exactly one part
    let mut files: Vec<VirtFile> = catalog
        .files
        .values()
        .filter(|f| {
            !f.is_dir && f.file_size > 0 && f.file_size < MAX_FILE_SIZE_TO_BUNDLE && f.parts.len() == 1
        })
        .cloned()
        .collect();

    // stable order, independent of map iteration
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    // Phase 1: tiny files by stored (= post-compression) size.
    let (tiny, rest): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|f| f.parts[0].storage_size < TINY_STORAGE_SIZE);
    debug!(files = tiny.len(), "bundle phase 1 (tiny)");
    found.push(tiny);
    files = rest;

    // Phase 2: everything left that is stored compressed.
    let (compressed, rest): (Vec<_>, Vec<_>) =
        files.into_iter().partition(|f| f.use_compression);
    debug!(files = compressed.len(), "bundle phase 2 (compressible)");
    found.push(compressed);
    files = rest;

    // Phase 3: group what remains (mostly media files) by path prefix.
    // Shortening the cut length step by step merges sibling files first,
    // then cousins, until everything left lands in the cut-zero group.
    let mut cut_at = files.iter().map(|f| f.rel_path.len()).max().unwrap_or(0);
    while cut_at > 0 {
        cut_at -= 1;

        // plain-size total per prefix group in this round
        let mut groups: BTreeMap<&[u8], u64> = BTreeMap::new();
        for f in &files {
            let prefix = prefix_at(&f.rel_path, cut_at);
            *groups.entry(prefix).or_default() += f.file_size;
        }

        let selected: Vec<Vec<u8>> = groups
            .into_iter()
            .filter(|(_, size)| *size > PART_SIZE / 2 || cut_at == 0)
            .map(|(prefix, _)| prefix.to_vec())
            .collect();

        for prefix in selected {
            let (group, rest): (Vec<_>, Vec<_>) = files
                .into_iter()
                .partition(|f| prefix_at(&f.rel_path, cut_at) == prefix.as_slice());
            debug!(
                files = group.len(),
                prefix = %String::from_utf8_lossy(&prefix),
                "bundle phase 3 (path)"
            );
            found.push(group);
            files = rest;
        }
    }

    let found = split_big_groups(found);

    // a bundle of one brings no benefit
    found.into_iter().filter(|g| g.len() > 1).collect()
}

// Prefixes are cut on bytes; a cut inside a multi-byte character still
// groups consistently because all members share the same byte sequence.
fn prefix_at(path: &str, cut_at: usize) -> &[u8] {
    let bytes = path.as_bytes();
    if bytes.len() > cut_at {
        &bytes[..cut_at]
    } else {
        bytes
    }
}

/// Split groups whose stored size exceeds twice the part size into runs of
/// roughly one part each. Membership is preserved exactly.
fn split_big_groups(groups: Vec<Vec<VirtFile>>) -> Vec<Vec<VirtFile>> {
    let mut out = Vec::new();

    for group in groups {
        let size: u64 = group.iter().map(|f| f.parts[0].storage_size).sum();
        if size <= 2 * PART_SIZE {
            out.push(group);
            continue;
        }

        let mut current = Vec::new();
        let mut current_size = 0u64;
        for file in group {
            current_size += file.parts[0].storage_size;
            current.push(file);
            if current_size > PART_SIZE {
                out.push(std::mem::take(&mut current));
                current_size = 0;
            }
        }
        out.push(current); // the remainder, may be small
    }

    out
}
