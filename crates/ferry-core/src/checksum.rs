//! Incremental BLAKE3 checksums.
//!
//! The same accumulator backs the running digest of an upload and the
//! on-demand digest of a stored file, so both sides of a verification always
//! agree on the algorithm and the encoding (64 lowercase hex characters).

use std::fs::File;
use std::io;
use std::path::Path;

/// Length of a finalized checksum in hex characters.
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Running BLAKE3 digest over bytes observed so far.
///
/// Bytes must be fed in chunk order; the digest is only reproducible by an
/// independent hash of the file when nothing is reordered or deduplicated.
#[derive(Debug, Clone, Default)]
pub struct ChecksumAccumulator {
    hasher: blake3::Hasher,
    bytes: u64,
}

impl ChecksumAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data into the digest
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far
    #[must_use]
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finish the digest and return it as lowercase hex
    ///
    /// Consumes the accumulator: a spent accumulator cannot be updated or
    /// finalized again.
    #[must_use]
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

/// BLAKE3 of an in-memory buffer, as lowercase hex.
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// BLAKE3 of a local file, read incrementally.
///
/// Blocking; async callers should run it on the blocking pool.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(&mut file)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_digest_is_blake3_of_nothing() {
        let digest = ChecksumAccumulator::new().finalize();
        assert_eq!(digest, blake3::hash(b"").to_hex().to_string());
        assert_eq!(digest.len(), CHECKSUM_HEX_LEN);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut acc = ChecksumAccumulator::new();
        acc.update(b"The quick brown ");
        acc.update(b"");
        acc.update(b"fox jumps over the lazy dog");
        assert_eq!(acc.bytes_hashed(), 43);
        assert_eq!(
            acc.finalize(),
            checksum_bytes(b"The quick brown fox jumps over the lazy dog")
        );
    }

    #[test]
    fn test_order_matters() {
        let mut forward = ChecksumAccumulator::new();
        forward.update(b"AAAA");
        forward.update(b"BBBB");

        let mut swapped = ChecksumAccumulator::new();
        swapped.update(b"BBBB");
        swapped.update(b"AAAA");

        assert_ne!(forward.finalize(), swapped.finalize());
    }

    #[test]
    fn test_digest_is_lowercase_hex() {
        let digest = checksum_bytes(&[0xFF; 1024]);
        assert!(
            digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_checksum_file_matches_bytes() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data = vec![0xAB; 300 * 1024];
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        assert_eq!(checksum_file(temp_file.path()).unwrap(), checksum_bytes(&data));
    }

    #[test]
    fn test_checksum_file_missing() {
        assert!(checksum_file(Path::new("/nonexistent/ferry/file.bin")).is_err());
    }
}
