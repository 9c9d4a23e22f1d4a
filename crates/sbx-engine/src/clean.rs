//! Reconciliation between the catalog and the remote namespace.
//!
//! Blobs are classified by name shape. Part names are 128 hex characters,
//! bundle names are 130 characters starting with the bundle prefix, and
//! everything else is "rest". Rest blobs and the index are never touched;
//! they may be files a user parked in the same remote folder.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use sbx_catalog::{Catalog, FilePart, BUNDLE_PREFIX};

use crate::error::Result;
use crate::store::{ObjectStore, RemoteFile};
use crate::INDEX_NAME;

/// Counts of a clean run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanStats {
    pub removed: usize,
}

/// Remove remote blobs the catalog no longer references, damaged blobs and
/// duplicates.
///
/// Bundle blobs are only judged when the catalog declares bundles at all;
/// with bundle mode off they are preserved. With `dry_run` the run only
/// logs what it would remove.
pub fn clean(catalog: &Catalog, store: &dyn ObjectStore, dry_run: bool) -> Result<CleanStats> {
    store.update()?;

    let (unknown_parts, unknown_bundles) = unknown(catalog, store);
    let duplicates = duplicates(store);

    let mut remove_list = Vec::new();
    remove_list.extend(unknown_parts);
    remove_list.extend(duplicates);

    let bundle_mode = !catalog.bundles.is_empty();
    if bundle_mode {
        info!("bundle mode on");
        remove_list.extend(unknown_bundles);
    }

    if dry_run {
        info!("dry run: nothing is deleted");
    }

    for (i, file) in remove_list.iter().enumerate() {
        debug!(
            step = %format!("{}/{}", i + 1, remove_list.len()),
            name = %file.name,
            id = %file.id,
            size = file.size,
            "remove"
        );
        if !dry_run {
            store.trash(file)?;
        }
    }

    Ok(CleanStats {
        removed: remove_list.len(),
    })
}

/// Split the remote listing into online blobs unknown to the catalog.
///
/// A part blob is known when name, size and md5 all match a catalog part; a
/// bundle blob when name and size match (no md5 is tracked for bundles).
fn unknown(catalog: &Catalog, store: &dyn ObjectStore) -> (Vec<RemoteFile>, Vec<RemoteFile>) {
    let expected = catalog_parts(catalog);
    let (online_parts, online_bundles, online_rest) = classify(store);

    let mut unknown_parts = Vec::new();
    for blob in &online_parts {
        let known = expected.values().any(|part| {
            blob.name == part.storage_name
                && blob.size == part.storage_size
                && blob.md5 == part.storage_md5
        });
        if !known {
            if expected.values().any(|p| blob.name == p.storage_name) {
                debug!(name = %blob.name, size = blob.size, "defect part");
            }
            unknown_parts.push(blob.clone());
        }
    }

    let mut unknown_bundles = Vec::new();
    for blob in &online_bundles {
        let known = expected
            .values()
            .any(|part| blob.name == part.storage_name && blob.size == part.storage_size);
        if !known {
            if expected.values().any(|p| blob.name == p.storage_name) {
                debug!(name = %blob.name, size = blob.size, "defect bundle");
            }
            unknown_bundles.push(blob.clone());
        }
    }

    let unknown_rest = online_rest
        .iter()
        .filter(|f| f.name != INDEX_NAME)
        .count();

    info!(
        known = online_parts.len() - unknown_parts.len(),
        unknown = unknown_parts.len(),
        online = online_parts.len(),
        "parts"
    );
    info!(
        known = online_bundles.len() - unknown_bundles.len(),
        unknown = unknown_bundles.len(),
        online = online_bundles.len(),
        "bundles"
    );
    info!(online = online_rest.len(), unknown = unknown_rest, "rest");

    (unknown_parts, unknown_bundles)
}

/// All parts the catalog expects on the remote: file parts plus bundle
/// blobs, deduplicated by name and md5.
fn catalog_parts(catalog: &Catalog) -> HashMap<String, FilePart> {
    let mut all = HashMap::new();

    for file in catalog.files.values() {
        for part in &file.parts {
            all.insert(
                format!("{}|{}", part.storage_name, part.storage_md5),
                part.clone(),
            );
        }
    }
    for bundle in catalog.bundles.values() {
        all.insert(
            format!("{}|{}", bundle.part.storage_name, bundle.part.storage_md5),
            bundle.part.clone(),
        );
    }

    all
}

/// Classify the online listing by name shape.
fn classify(store: &dyn ObjectStore) -> (Vec<RemoteFile>, Vec<RemoteFile>, Vec<RemoteFile>) {
    let mut parts = Vec::new();
    let mut bundles = Vec::new();
    let mut rest = Vec::new();

    for file in store.files().all() {
        if file.name.len() == 128 && file.name.chars().all(|c| c.is_ascii_hexdigit()) {
            parts.push(file.clone());
        } else if file.name.len() == 130 && file.name.starts_with(BUNDLE_PREFIX) {
            bundles.push(file.clone());
        } else {
            rest.push(file.clone());
        }
    }

    (parts, bundles, rest)
}

/// Find duplicate blobs: same name, size and md5 more than once. The first
/// of each group is kept.
fn duplicates(store: &dyn ObjectStore) -> Vec<RemoteFile> {
    let mut groups: HashMap<String, Vec<RemoteFile>> = HashMap::new();
    for file in store.files().all() {
        groups
            .entry(format!("{}|{}|{}", file.name, file.size, file.md5))
            .or_default()
            .push(file.clone());
    }

    groups.retain(|_, list| list.len() > 1);
    if !groups.is_empty() {
        warn!(count = groups.len(), "duplicates found");
    }

    let mut out = Vec::new();
    for (key, list) in groups {
        debug!(count = list.len(), key = %key, "duplicate");
        out.extend(list.into_iter().skip(1));
    }
    out
}
