//! SHA-256 digests for chart archives.

use crate::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// A hasher that also counts how many bytes it has seen.
pub struct DigestWriter {
    hasher: Sha256,
    size: u64,
}

impl DigestWriter {
    /// Create a new digest writer.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Update the digest with the given data.
    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        self.hasher.update(data);
    }

    /// Finalize and return the byte count and hex-encoded digest.
    pub fn finalize(self) -> (u64, String) {
        (self.size, hex::encode(self.hasher.finalize()))
    }
}

impl Default for DigestWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Digest everything a reader yields.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<(u64, String)> {
    let mut hasher = DigestWriter::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Digest the contents of a file.
pub fn digest_file<P: AsRef<Path>>(path: P) -> Result<(u64, String)> {
    digest_reader(BufReader::new(File::open(path)?))
}
