//! The tensor-level chunk-id encoder: a bidirectional map from global sample
//! index to the id of the chunk holding that sample.

use crate::binio::{read_u32, read_u64, write_u32, write_u64};
use crate::cachable::Cachable;
use crate::encoder::{Row, RunLengthEncoder};
use crate::error::{Error, Result};
use crate::keys;

/// Chunk id `0` is reserved to mean "no chunk".
pub const NO_CHUNK: u64 = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkIdEncoder {
    rows: RunLengthEncoder<u64>,
}

impl ChunkIdEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chunk id holding the global sample at `index`, or `None` if out
    /// of range.
    pub fn chunk_id_for_sample(&self, index: u64) -> Option<u64> {
        self.rows.lookup(index).map(|row| row.value)
    }

    /// `index` translated to a position local to whichever chunk owns it.
    pub fn translate_index_relative_to_chunks(&self, index: u64) -> Option<u64> {
        self.rows.local_offset_within_row(index)
    }

    /// Generates the next chunk id for this tensor: `1` if no chunk has ever
    /// been allocated, otherwise the last allocated id plus one.
    pub fn generate_chunk_id(&self) -> u64 {
        self.rows.rows().last().map_or(1, |row| row.value + 1)
    }

    /// Registers `n` newly-written samples as belonging to `chunk_id`.
    ///
    /// If `chunk_id` equals the id of the currently-open (last) chunk, this
    /// extends that row's range; otherwise a fresh row is appended. This is
    /// exactly the run-length encoder's append semantics.
    pub fn register_samples(&mut self, chunk_id: u64, n: u64) {
        self.rows.append_n(chunk_id, n);
    }

    pub fn num_chunks(&self) -> usize {
        self.rows.num_rows()
    }

    pub fn num_samples(&self) -> u64 {
        self.rows.len()
    }

    pub fn name_from_id(chunk_id: u64) -> String {
        keys::name_from_chunk_id(chunk_id)
    }

    /// The on-disk name of the chunk at row position `pos`. Negative `pos`
    /// counts from the end (`-1` is the last/currently-open chunk).
    pub fn get_name_for_chunk(&self, pos: isize) -> Option<String> {
        let rows = self.rows.rows();
        let index = if pos < 0 {
            rows.len().checked_sub((-pos) as usize)?
        } else {
            pos as usize
        };
        rows.get(index).map(|row| Self::name_from_id(row.value))
    }

    pub fn last_chunk_id(&self) -> Option<u64> {
        self.rows.rows().last().map(|row| row.value)
    }
}

impl Cachable for ChunkIdEncoder {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let rows = self.rows.rows();
        let mut out = Vec::with_capacity(4 + rows.len() * 16);
        write_u32(&mut out, rows.len() as u32);
        for row in rows {
            write_u64(&mut out, row.value);
            write_u64(&mut out, row.last_index);
        }
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let nrows = read_u32(&mut cursor).ok_or_else(malformed)? as usize;
        let mut rows = Vec::with_capacity(nrows);
        for _ in 0..nrows {
            let chunk_id = read_u64(&mut cursor).ok_or_else(malformed)?;
            let last_index = read_u64(&mut cursor).ok_or_else(malformed)?;
            rows.push(Row {
                value: chunk_id,
                last_index,
            });
        }
        Ok(Self {
            rows: RunLengthEncoder::from_rows(rows),
        })
    }

    fn nbytes(&self) -> usize {
        4 + self.rows.num_rows() * 16
    }
}

fn malformed() -> Error {
    Error::corrupted_meta("<chunk_id_encoder>", "truncated chunk id encoder payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_sequential_ids_starting_at_one() {
        let mut enc = ChunkIdEncoder::new();
        assert_eq!(enc.generate_chunk_id(), 1);
        enc.register_samples(1, 4);
        assert_eq!(enc.generate_chunk_id(), 2);
        enc.register_samples(2, 3);
        assert_eq!(enc.generate_chunk_id(), 3);
    }

    #[test]
    fn lookup_and_translate() {
        let mut enc = ChunkIdEncoder::new();
        enc.register_samples(1, 4); // samples 0..=3
        enc.register_samples(2, 3); // samples 4..=6

        assert_eq!(enc.chunk_id_for_sample(0), Some(1));
        assert_eq!(enc.chunk_id_for_sample(3), Some(1));
        assert_eq!(enc.chunk_id_for_sample(4), Some(2));
        assert_eq!(enc.chunk_id_for_sample(6), Some(2));
        assert_eq!(enc.chunk_id_for_sample(7), None);

        assert_eq!(enc.translate_index_relative_to_chunks(4), Some(0));
        assert_eq!(enc.translate_index_relative_to_chunks(6), Some(2));

        assert_eq!(enc.num_chunks(), 2);
        assert_eq!(enc.num_samples(), 7);
    }

    #[test]
    fn extending_currently_open_chunk_merges_row() {
        let mut enc = ChunkIdEncoder::new();
        enc.register_samples(1, 4);
        enc.register_samples(1, 2); // still chunk 1
        assert_eq!(enc.num_chunks(), 1);
        assert_eq!(enc.num_samples(), 6);
    }

    #[test]
    fn get_name_for_chunk_supports_negative_positions() {
        let mut enc = ChunkIdEncoder::new();
        enc.register_samples(1, 1);
        enc.register_samples(2, 1);
        assert_eq!(
            enc.get_name_for_chunk(-1),
            Some(ChunkIdEncoder::name_from_id(2))
        );
        assert_eq!(
            enc.get_name_for_chunk(0),
            Some(ChunkIdEncoder::name_from_id(1))
        );
    }

    #[test]
    fn roundtrips_through_bytes() {
        let mut enc = ChunkIdEncoder::new();
        enc.register_samples(1, 4);
        enc.register_samples(2, 3);
        let bytes = enc.to_bytes().unwrap();
        let back = ChunkIdEncoder::from_bytes(&bytes).unwrap();
        assert_eq!(enc, back);
    }
}
