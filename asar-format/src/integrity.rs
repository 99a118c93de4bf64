//! Per-file SHA-256 integrity records.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::source::{Section, Source};

pub const ALGORITHM_SHA256: &str = "SHA256";

/// Block size used when none is given.
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

const BUFFER_SIZE: usize = 64 * 1024;

/// Hash of a file's contents, plus one hash per `block_size` block so
/// readers can verify partial reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    pub algorithm: String,
    /// Lowercase hex digest of the whole content.
    pub hash: String,
    pub block_size: u64,
    /// Lowercase hex digests, one per block.
    pub blocks: Vec<String>,
}

impl Integrity {
    /// Hashes `size` bytes of `source` starting at `start`.
    pub fn compute<'s, S: Into<Source<'s>>>(
        source: S,
        start: u64,
        size: u64,
        block_size: u64,
    ) -> io::Result<Integrity> {
        if block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block size must not be zero",
            ));
        }

        let mut reader = Section::new(source, start, size);
        let mut whole = Sha256::new();
        let mut block = Sha256::new();
        let mut block_filled = 0u64;
        let mut blocks = vec![];
        let mut total = 0u64;
        let mut buf = vec![0u8; BUFFER_SIZE];

        loop {
            let want = buf
                .len()
                .min(usize::try_from(block_size - block_filled).unwrap_or(usize::MAX));
            let n = reader.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            whole.update(&buf[..n]);
            block.update(&buf[..n]);
            block_filled += n as u64;
            total += n as u64;

            if block_filled == block_size {
                blocks.push(hex::encode(block.finalize_reset()));
                block_filled = 0;
            }
        }

        if total != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, source had {}", size, total),
            ));
        }

        if block_filled > 0 || blocks.is_empty() {
            blocks.push(hex::encode(block.finalize()));
        }

        Ok(Integrity {
            algorithm: ALGORITHM_SHA256.to_string(),
            hash: hex::encode(whole.finalize()),
            block_size,
            blocks,
        })
    }

    /// Recomputes the record over `size` bytes of `source` and compares.
    pub fn verify<'s, S: Into<Source<'s>>>(
        &self,
        source: S,
        start: u64,
        size: u64,
    ) -> io::Result<bool> {
        if !self.algorithm.eq_ignore_ascii_case(ALGORITHM_SHA256) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported integrity algorithm `{}`", self.algorithm),
            ));
        }
        let actual = Integrity::compute(source, start, size, self.block_size)?;
        Ok(actual.hash.eq_ignore_ascii_case(&self.hash)
            && actual.blocks.len() == self.blocks.len()
            && actual
                .blocks
                .iter()
                .zip(self.blocks.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn single_block() {
        let data: &[u8] = b"hello";
        let integrity = Integrity::compute(data, 0, 5, DEFAULT_BLOCK_SIZE).unwrap();
        assert_eq!(integrity.algorithm, "SHA256");
        assert_eq!(integrity.hash, HELLO);
        assert_eq!(integrity.blocks, [HELLO]);
    }

    #[test]
    fn split_blocks() {
        let data: &[u8] = b"hellohello!";
        let integrity = Integrity::compute(data, 0, 11, 5).unwrap();
        assert_eq!(integrity.blocks.len(), 3);
        assert_eq!(integrity.blocks[0], HELLO);
        assert_eq!(integrity.blocks[1], HELLO);
    }

    #[test]
    fn empty_content_has_one_block() {
        let data: &[u8] = b"";
        let integrity = Integrity::compute(data, 0, 0, 5).unwrap();
        assert_eq!(integrity.blocks.len(), 1);
        assert_eq!(integrity.blocks[0], integrity.hash);
    }

    #[test]
    fn offset_range() {
        let data: &[u8] = b"xxhelloxx";
        let integrity = Integrity::compute(data, 2, 5, 1024).unwrap();
        assert_eq!(integrity.hash, HELLO);
        assert!(integrity.verify(data, 2, 5).unwrap());
        assert!(!integrity.verify(data, 1, 5).unwrap());
    }

    #[test]
    fn short_source() {
        let data: &[u8] = b"hel";
        let err = Integrity::compute(data, 0, 5, 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
