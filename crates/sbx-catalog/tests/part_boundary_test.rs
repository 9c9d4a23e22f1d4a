//! Part splitting at the 1 GiB boundary.
//!
//! Uses a sparse file so the fixture costs no disk, only hashing time.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use sha2::{Digest, Sha512};

use sbx_catalog::{scan_file, PART_SIZE};
use sbx_crypto::Keyfile;

fn test_keyfile() -> Keyfile {
    let mut raw = [0u8; sbx_crypto::KEYFILE_SIZE];
    for (i, b) in raw.iter_mut().enumerate() {
        *b = (i * 23 % 256) as u8;
    }
    Keyfile::from_bytes(&raw)
}

#[test]
fn test_file_at_part_size_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boundary.dat");
    let kf = test_keyfile();

    // exactly one part worth of (sparse) zeros
    let fh = File::create(&path).unwrap();
    fh.set_len(PART_SIZE).unwrap();
    drop(fh);

    let vf = scan_file(&path, "boundary.dat", &kf).unwrap();
    assert_eq!(vf.file_size, PART_SIZE);
    assert_eq!(vf.parts.len(), 1, "exactly PART_SIZE stays one part");
    assert_eq!(vf.parts[0].storage_size, PART_SIZE);
    assert!(!vf.use_compression, "large files never compress");

    // one byte past the boundary starts a second part
    let mut fh = OpenOptions::new().write(true).open(&path).unwrap();
    fh.seek(SeekFrom::Start(PART_SIZE)).unwrap();
    fh.write_all(&[0x07]).unwrap();
    drop(fh);

    let vf2 = scan_file(&path, "boundary.dat", &kf).unwrap();
    assert_eq!(vf2.file_size, PART_SIZE + 1);
    assert_eq!(vf2.parts.len(), 2);

    // part 0 is unchanged content, so its derived values are stable
    assert_eq!(vf2.parts[0].plain_sha512, vf.parts[0].plain_sha512);
    assert_eq!(vf2.parts[0].storage_name, vf.parts[0].storage_name);
    assert_eq!(vf2.parts[0].data_key, vf.parts[0].data_key);

    // part 1 covers exactly the final byte
    let tail = &vf2.parts[1];
    assert_eq!(tail.storage_size, 1);
    assert_eq!(tail.plain_sha512, Sha512::digest([0x07]).to_vec());
    assert_eq!(tail.data_key, kf.data_key(&tail.plain_sha512));
    assert_eq!(tail.storage_name, kf.crypt_name(&tail.plain_sha512));

    // the parts are independent: different hashes, names and keys
    assert_ne!(vf2.parts[0].plain_sha512, tail.plain_sha512);
    assert_ne!(vf2.parts[0].storage_name, tail.storage_name);
    assert_ne!(vf2.parts[0].data_key, tail.data_key);
}
