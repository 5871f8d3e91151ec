//! An append-only list of 128-bit sample digests, kept in lockstep with
//! sample registration when a tensor has `hash_samples` enabled.
//!
//! This is purely an observability / future-dedup artifact: nothing here
//! deduplicates, it just records digests in append order so a later pass
//! can.

use crate::cachable::Cachable;
use crate::error::{Error, Result};

const DIGEST_LEN: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hashlist {
    digests: Vec<u128>,
}

impl Hashlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the digest of `uncompressed_bytes` (MurmurHash3 x64-128,
    /// seed 0), matching the distilled source's use of `mmh3`.
    pub fn append(&mut self, uncompressed_bytes: &[u8]) {
        self.digests.push(digest(uncompressed_bytes));
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u128> {
        self.digests.get(index).copied()
    }
}

/// MurmurHash3 x64-128 digest of `bytes`, seed 0.
pub fn digest(bytes: &[u8]) -> u128 {
    let mut cursor = std::io::Cursor::new(bytes);
    // Infallible: `murmur3_x64_128` only errors on reader I/O failure, and
    // reading from an in-memory `Cursor` never fails.
    murmur3::murmur3_x64_128(&mut cursor, 0).expect("reading from an in-memory buffer cannot fail")
}

impl Cachable for Hashlist {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.digests.len() * DIGEST_LEN);
        for d in &self.digests {
            out.extend_from_slice(&d.to_le_bytes());
        }
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % DIGEST_LEN != 0 {
            return Err(Error::corrupted_meta(
                "<hashlist>",
                format!("hashlist payload length {} is not a multiple of {DIGEST_LEN}", bytes.len()),
            ));
        }
        let digests = bytes
            .chunks_exact(DIGEST_LEN)
            .map(|chunk| u128::from_le_bytes(chunk.try_into().expect("chunks_exact guarantees length")))
            .collect();
        Ok(Self { digests })
    }

    fn nbytes(&self) -> usize {
        self.digests.len() * DIGEST_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_order_matches_digest_order() {
        let mut list = Hashlist::new();
        list.append(b"sample-0");
        list.append(b"sample-1");
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0), Some(digest(b"sample-0")));
        assert_eq!(list.get(1), Some(digest(b"sample-1")));
    }

    #[test]
    fn roundtrips_through_bytes() {
        let mut list = Hashlist::new();
        list.append(b"a");
        list.append(b"bb");
        list.append(b"ccc");
        let bytes = list.to_bytes().unwrap();
        let back = Hashlist::from_bytes(&bytes).unwrap();
        assert_eq!(list, back);
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(Hashlist::from_bytes(&[0u8; 15]).is_err());
    }
}
