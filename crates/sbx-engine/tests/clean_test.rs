//! Reconciliation against planted remote states.

use std::fs;
use std::path::PathBuf;

use sbx_catalog::{make_bundles, scan_tree, Catalog};
use sbx_crypto::Keyfile;
use sbx_engine::{clean, upload, MemStore, ObjectStore, INDEX_NAME};

fn test_keyfile() -> Keyfile {
    let mut raw = [0u8; sbx_crypto::KEYFILE_SIZE];
    for (i, b) in raw.iter_mut().enumerate() {
        *b = (i * 13 % 256) as u8;
    }
    Keyfile::from_bytes(&raw)
}

fn write_tree() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    fs::write(root.join("one.dat"), vec![0x11u8; 50_000]).unwrap();
    fs::write(root.join("two.dat"), vec![0x22u8; 64]).unwrap();
    fs::write(root.join("three.dat"), vec![0x33u8; 64]).unwrap();
    (dir, root)
}

fn uploaded_state(bundles: bool) -> (tempfile::TempDir, Catalog, MemStore, Keyfile) {
    let (dir, root) = write_tree();
    let kf = test_keyfile();
    let mut catalog = scan_tree(&root, &Catalog::new(), &kf).unwrap().catalog;
    if bundles {
        make_bundles(&mut catalog, &kf);
    }

    let store = MemStore::new();
    upload(&root, &catalog, &kf.index_key(), &store).unwrap();
    (dir, catalog, store, kf)
}

#[test]
fn test_clean_after_fresh_upload_removes_nothing() {
    let (_dir, catalog, store, _) = uploaded_state(true);
    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 0);
}

#[test]
fn test_rest_blobs_are_never_removed() {
    let (_dir, catalog, store, _) = uploaded_state(true);
    store.inject("rest1", b"user parked".to_vec(), "0011223344556677");

    // dry run reports nothing to remove for rest, real run keeps it
    let stats = clean(&catalog, &store, true).unwrap();
    assert_eq!(stats.removed, 0);
    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 0);

    store.update().unwrap();
    assert!(store.files().by_name("rest1").is_ok());
    assert!(store.files().by_name(INDEX_NAME).is_ok());
}

#[test]
fn test_damaged_part_is_removed() {
    let (_dir, catalog, store, _) = uploaded_state(false);

    // replace one part blob with a version whose md5 disagrees
    let part = &catalog.files["one.dat"].parts[0];
    store.update().unwrap();
    let listed = store
        .files()
        .by_attr(&part.storage_name, part.storage_size, &part.storage_md5)
        .unwrap();
    store.trash(&listed).unwrap();
    store.inject(
        &part.storage_name,
        vec![0u8; part.storage_size as usize],
        "ffffffffffffffffffffffffffffffff",
    );

    let before = {
        store.update().unwrap();
        store.files().all().len()
    };
    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 1, "exactly the damaged blob");

    store.update().unwrap();
    assert_eq!(store.files().all().len(), before - 1);
    assert!(store
        .files()
        .by_attr(&part.storage_name, part.storage_size, "")
        .is_err());
}

#[test]
fn test_dry_run_deletes_nothing() {
    let (_dir, catalog, store, _) = uploaded_state(false);

    store.update().unwrap();
    let part = &catalog.files["one.dat"].parts[0];
    let listed = store
        .files()
        .by_attr(&part.storage_name, part.storage_size, &part.storage_md5)
        .unwrap();
    store.trash(&listed).unwrap();
    store.inject(
        &part.storage_name,
        vec![0u8; part.storage_size as usize],
        "ffffffffffffffffffffffffffffffff",
    );

    store.update().unwrap();
    let before = store.files().all().len();

    let stats = clean(&catalog, &store, true).unwrap();
    assert_eq!(stats.removed, 1, "dry run still reports the candidate");

    store.update().unwrap();
    assert_eq!(store.files().all().len(), before, "nothing was deleted");
}

#[test]
fn test_unreferenced_part_is_removed() {
    let (_dir, catalog, store, _) = uploaded_state(false);

    // a part-shaped blob the catalog never heard of
    store.inject("ab".repeat(64).as_str(), vec![1, 2, 3], "abcdef");

    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 1);
}

#[test]
fn test_bundles_protected_without_bundle_mode() {
    // catalog without bundles, but a bundle-shaped blob online
    let (_dir, catalog, store, _) = uploaded_state(false);
    let name = format!("B_{}", "cd".repeat(64));
    store.inject(&name, vec![9u8; 10], "");

    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 0, "bundle mode off, bundle blobs preserved");

    store.update().unwrap();
    assert!(store.files().by_name(&name).is_ok());
}

#[test]
fn test_stray_bundle_removed_in_bundle_mode() {
    let (_dir, catalog, store, _) = uploaded_state(true);
    assert!(!catalog.bundles.is_empty());

    let name = format!("B_{}", "cd".repeat(64));
    store.inject(&name, vec![9u8; 10], "");

    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 1);

    store.update().unwrap();
    assert!(store.files().by_name(&name).is_err());
    // the real bundle survives
    for bundle in catalog.bundles.values() {
        assert!(store
            .files()
            .by_attr(&bundle.part.storage_name, bundle.part.storage_size, "")
            .is_ok());
    }
}

#[test]
fn test_duplicates_are_thinned_to_one() {
    let (_dir, catalog, store, _) = uploaded_state(false);

    store.update().unwrap();
    let part = &catalog.files["two.dat"].parts[0];
    let listed = store
        .files()
        .by_attr(&part.storage_name, part.storage_size, &part.storage_md5)
        .unwrap();

    // plant two extra copies with identical attributes
    let mut content = Vec::new();
    std::io::Read::read_to_end(&mut store.reader(&listed, 0).unwrap(), &mut content).unwrap();
    store.inject(&listed.name, content.clone(), &listed.md5);
    store.inject(&listed.name, content, &listed.md5);

    let stats = clean(&catalog, &store, false).unwrap();
    assert_eq!(stats.removed, 2, "two of three copies go");

    store.update().unwrap();
    let remaining = store
        .files()
        .all()
        .iter()
        .filter(|f| f.name == part.storage_name)
        .count();
    assert_eq!(remaining, 1);
}
