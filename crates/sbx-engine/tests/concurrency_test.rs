//! Concurrent random reads against shared readers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use sha2::{Digest, Sha512};

use sbx_catalog::{Catalog, FilePart, VirtFile};
use sbx_crypto::{crypt_bytes, Keyfile};
use sbx_engine::{open, MemStore, ObjectStore};

fn test_keyfile() -> Keyfile {
    let mut raw = [0u8; sbx_crypto::KEYFILE_SIZE];
    for (i, b) in raw.iter_mut().enumerate() {
        *b = (i * 17 % 256) as u8;
    }
    Keyfile::from_bytes(&raw)
}

/// Build a multi-part file directly in the catalog and plant its encrypted
/// part blobs. The reader stack only follows the part list, so small
/// synthetic parts exercise the same code as 1 GiB ones.
fn synthetic_multipart(
    store: &MemStore,
    kf: &Keyfile,
    part_contents: &[&[u8]],
) -> (Catalog, VirtFile, Vec<u8>) {
    let mut parts = Vec::new();
    let mut whole = Vec::new();

    for content in part_contents {
        let plain_sha512 = Sha512::digest(content).to_vec();
        let data_key = kf.data_key(&plain_sha512);
        let storage_name = kf.crypt_name(&plain_sha512);

        let mut encrypted = content.to_vec();
        crypt_bytes(&mut encrypted, 0, &data_key).unwrap();
        let md5 = hex::encode(md5_bytes(&encrypted));
        store.inject(&storage_name, encrypted, &md5);

        parts.push(FilePart {
            plain_sha512,
            storage_name,
            storage_size: content.len() as u64,
            storage_md5: md5,
            data_key,
        });
        whole.extend_from_slice(content);
    }

    let file = VirtFile {
        rel_path: "parts.dat".into(),
        file_size: whole.len() as u64,
        mtime: 1,
        parts,
        ..Default::default()
    };

    let mut catalog = Catalog {
        files: BTreeMap::new(),
        bundles: BTreeMap::new(),
    };
    catalog.files.insert(file.rel_path.clone(), file.clone());

    store.update().unwrap();
    (catalog, file, whole)
}

fn md5_bytes(data: &[u8]) -> [u8; 16] {
    use md5::Digest as _;
    md5::Md5::digest(data).into()
}

#[test]
fn test_concurrent_reads_on_one_reader() {
    let store_impl = MemStore::new();
    let kf = test_keyfile();
    let a: Vec<u8> = (0u8..200).collect();
    let b: Vec<u8> = (0u8..=255).rev().collect();
    let c = vec![0x5Au8; 111];
    let (catalog, file, whole) =
        synthetic_multipart(&store_impl, &kf, &[&a, &b, &c]);
    let store: Arc<dyn ObjectStore> = Arc::new(store_impl);

    let reader: Arc<dyn sbx_engine::ReadAt> =
        Arc::from(open(&file, &catalog, &store).unwrap());
    let whole = Arc::new(whole);

    let mut handles = Vec::new();
    for t in 0usize..5 {
        let reader = Arc::clone(&reader);
        let whole = Arc::clone(&whole);
        handles.push(thread::spawn(move || {
            for i in 0usize..100 {
                // distinct offsets per thread, some spanning part boundaries
                let off = (t * 97 + i * 7) % (whole.len() - 1);
                let mut buf = [0u8; 13];
                let n = reader.read_at(&mut buf, off as u64).unwrap();
                assert!(n > 0);
                assert_eq!(&buf[..n], &whole[off..off + n], "thread {t} offset {off}");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_concurrent_opens() {
    let store_impl = MemStore::new();
    let kf = test_keyfile();
    let a = vec![1u8; 300];
    let b = vec![2u8; 300];
    let (catalog, file, whole) = synthetic_multipart(&store_impl, &kf, &[&a, &b]);

    let store: Arc<dyn ObjectStore> = Arc::new(store_impl);
    let catalog = Arc::new(catalog);
    let file = Arc::new(file);
    let whole = Arc::new(whole);

    let mut handles = Vec::new();
    for t in 0usize..5 {
        let store = Arc::clone(&store);
        let catalog = Arc::clone(&catalog);
        let file = Arc::clone(&file);
        let whole = Arc::clone(&whole);
        handles.push(thread::spawn(move || {
            for i in 0usize..100 {
                let reader = open(&file, &catalog, &store).unwrap();
                let off = (t * 31 + i) % whole.len();
                let mut buf = [0u8; 1];
                let n = reader.read_at(&mut buf, off as u64).unwrap();
                assert_eq!(n, 1);
                assert_eq!(buf[0], whole[off]);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}
