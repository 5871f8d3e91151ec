//! Compression codecs are treated as pluggable `encode(bytes) -> bytes`,
//! `decode(bytes, shape) -> bytes` collaborators external to the storage
//! engine's core. This module ships only the identity codec (used when
//! `sample_compression` is unset) and one trivial byte-oriented codec used
//! to exercise the compressed path in tests, matching the engine's own
//! external-collaborator boundary for real codecs (zlib, png, ...).

use crate::error::{Error, Result};

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, raw: &[u8]) -> Vec<u8>;
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>>;
}

pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encode(&self, raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        Ok(encoded.to_vec())
    }
}

/// A byte-oriented run-length codec: `(count: u32, byte: u8)` pairs. Only
/// meant to exercise the compressed path in tests; not a production codec.
pub struct ByteRleCodec;

impl Codec for ByteRleCodec {
    fn name(&self) -> &'static str {
        "rle"
    }

    fn encode(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut iter = raw.iter().peekable();
        while let Some(&byte) = iter.next() {
            let mut count: u32 = 1;
            while iter.peek() == Some(&&byte) {
                iter.next();
                count += 1;
            }
            out.extend_from_slice(&count.to_le_bytes());
            out.push(byte);
        }
        out
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = encoded;
        while !cursor.is_empty() {
            let count = crate::binio::read_u32(&mut cursor)
                .ok_or_else(|| Error::corrupted_meta("<rle codec>", "truncated RLE payload"))?;
            let byte = crate::binio::read_u8(&mut cursor)
                .ok_or_else(|| Error::corrupted_meta("<rle codec>", "truncated RLE payload"))?;
            out.resize(out.len() + count as usize, byte);
        }
        Ok(out)
    }
}

/// Looks up a codec by the name stored in `TensorMeta::sample_compression`.
pub fn by_name(name: &str) -> Option<Box<dyn Codec>> {
    match name {
        "none" => Some(Box::new(IdentityCodec)),
        "rle" => Some(Box::new(ByteRleCodec)),
        _ => None,
    }
}
