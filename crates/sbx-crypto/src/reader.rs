//! Streaming decryption over any byte source.

use std::io::{self, Read};

use crate::cipher::crypt_bytes;

/// Wraps a reader and XORs every chunk with the CTR keystream, starting at
/// `crypt_off` and advancing with the bytes read.
///
/// Encryption and decryption are the same operation, so the wrapper also
/// serves as the upload-side encryptor.
pub struct CryptReader<R> {
    inner: R,
    key: Vec<u8>,
    offset: u64,
}

impl<R: Read> CryptReader<R> {
    pub fn new(inner: R, crypt_off: u64, data_key: &[u8]) -> Self {
        Self {
            inner,
            key: data_key.to_vec(),
            offset: crypt_off,
        }
    }
}

impl<R: Read> Read for CryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        crypt_bytes(&mut buf[..n], self.offset, &self.key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.offset += n as u64;
        Ok(n)
    }
}
