//! A single chunk: a contiguous byte buffer holding one or more samples of
//! one tensor, plus the two run-length encoders that let the engine map a
//! chunk-local sample index to its shape and its byte range within `data`.

use smallvec::SmallVec;

use crate::binio::{read_bytes, read_u32, read_u8, write_u32, write_u8};
use crate::cachable::Cachable;
use crate::encoder::{Row, RunLengthEncoder};
use crate::error::{Error, Result};

/// The wire format version this build writes and the only one it accepts.
pub const CHUNK_FORMAT_VERSION: u8 = 1;

/// A sample's shape: one dimension per axis. Inline-stored up to rank 4,
/// which covers the overwhelming majority of tensors (images, volumes,
/// batched vectors); higher ranks simply spill to the heap.
pub type Shape = SmallVec<[u32; 4]>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    data: Vec<u8>,
    shapes_encoder: RunLengthEncoder<Shape>,
    byte_positions_encoder: RunLengthEncoder<(u32, u32)>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `buffer` as one new sample of the given `shape`.
    ///
    /// Refuses if the chunk's serialized size *after* the append would
    /// exceed `max_chunk_size` — the caller (the chunk engine's packer) is
    /// responsible for only calling this once it has already decided the
    /// sample belongs in this chunk.
    pub fn append_sample(&mut self, buffer: &[u8], max_chunk_size: usize, shape: Shape) -> Result<()> {
        let start = self.data.len() as u32;
        let end = start
            .checked_add(buffer.len() as u32)
            .ok_or_else(|| Error::corrupted_meta("<chunk>", "chunk byte offset overflowed u32"))?;

        let projected_size = self.nbytes() + buffer.len();
        if projected_size > max_chunk_size {
            return Err(Error::corrupted_meta(
                "<chunk>",
                format!(
                    "append_sample would grow chunk to {projected_size} bytes, exceeding max_chunk_size {max_chunk_size}; caller must pre-check via try_extend/try_new_chunk"
                ),
            ));
        }

        self.data.extend_from_slice(buffer);
        self.shapes_encoder.append(shape);
        self.byte_positions_encoder.append((start, end));
        Ok(())
    }

    /// Reads the sample at `local_index`: a zero-copy view into `data` plus
    /// its decoded shape.
    pub fn read(&self, local_index: u64) -> Option<(&[u8], &Shape)> {
        let (start, end) = self.byte_positions_encoder.lookup(local_index)?.value;
        let shape = &self.shapes_encoder.lookup(local_index)?.value;
        Some((&self.data[start as usize..end as usize], shape))
    }

    pub fn num_samples(&self) -> u64 {
        self.byte_positions_encoder.len()
    }

    pub fn num_data_bytes(&self) -> usize {
        self.data.len()
    }

    /// Serialized size: raw data plus both encoders plus the fixed header.
    pub fn nbytes(&self) -> usize {
        const HEADER_LEN: usize = 4;
        let shapes_len: usize = 4
            + self
                .shapes_encoder
                .rows()
                .iter()
                .map(|row| 1 /* rank */ + row.value.len() * 4 + 4 /* last_index */)
                .sum::<usize>();
        let positions_len = 4 + self.byte_positions_encoder.num_rows() * (4 + 4 + 4);
        HEADER_LEN + shapes_len + positions_len + self.data.len()
    }

    pub fn is_under_min_space(&self, min_chunk_size: usize) -> bool {
        self.num_data_bytes() < min_chunk_size
    }
}

impl Cachable for Chunk {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.nbytes());

        write_u8(&mut out, CHUNK_FORMAT_VERSION);
        write_u8(&mut out, 0); // flags, reserved for future use
        out.extend_from_slice(&[0, 0]); // reserved u16

        write_u32(&mut out, self.shapes_encoder.num_rows() as u32);
        for row in self.shapes_encoder.rows() {
            write_u8(&mut out, row.value.len() as u8);
            for dim in &row.value {
                write_u32(&mut out, *dim);
            }
            write_u32(&mut out, row.last_index as u32);
        }

        write_u32(&mut out, self.byte_positions_encoder.num_rows() as u32);
        for row in self.byte_positions_encoder.rows() {
            write_u32(&mut out, row.value.0);
            write_u32(&mut out, row.value.1);
            write_u32(&mut out, row.last_index as u32);
        }

        out.extend_from_slice(&self.data);
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let malformed = || Error::corrupted_meta("<chunk>", "truncated or malformed chunk payload");

        let version = read_u8(&mut cursor).ok_or_else(malformed)?;
        if version != CHUNK_FORMAT_VERSION {
            return Err(Error::corrupted_meta(
                "<chunk>",
                format!("unsupported chunk format version {version}"),
            ));
        }
        let _flags = read_u8(&mut cursor).ok_or_else(malformed)?;
        let _reserved = read_bytes(&mut cursor, 2).ok_or_else(malformed)?;

        let shape_nrows = read_u32(&mut cursor).ok_or_else(malformed)? as usize;
        let mut shape_rows = Vec::with_capacity(shape_nrows);
        for _ in 0..shape_nrows {
            let rank = read_u8(&mut cursor).ok_or_else(malformed)? as usize;
            let mut shape = Shape::with_capacity(rank);
            for _ in 0..rank {
                shape.push(read_u32(&mut cursor).ok_or_else(malformed)?);
            }
            let last_index = read_u32(&mut cursor).ok_or_else(malformed)? as u64;
            shape_rows.push(Row {
                value: shape,
                last_index,
            });
        }

        let pos_nrows = read_u32(&mut cursor).ok_or_else(malformed)? as usize;
        let mut pos_rows = Vec::with_capacity(pos_nrows);
        for _ in 0..pos_nrows {
            let start = read_u32(&mut cursor).ok_or_else(malformed)?;
            let end = read_u32(&mut cursor).ok_or_else(malformed)?;
            let last_index = read_u32(&mut cursor).ok_or_else(malformed)? as u64;
            pos_rows.push(Row {
                value: (start, end),
                last_index,
            });
        }

        Ok(Self {
            data: cursor.to_vec(),
            shapes_encoder: RunLengthEncoder::from_rows(shape_rows),
            byte_positions_encoder: RunLengthEncoder::from_rows(pos_rows),
        })
    }

    fn nbytes(&self) -> usize {
        Chunk::nbytes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[u32]) -> Shape {
        Shape::from_slice(dims)
    }

    #[test]
    fn append_and_read_roundtrip() {
        let mut chunk = Chunk::new();
        chunk.append_sample(&[1, 2, 3, 4], 1 << 20, shape(&[4])).unwrap();
        chunk.append_sample(&[5, 6], 1 << 20, shape(&[2])).unwrap();

        let (bytes, s) = chunk.read(0).unwrap();
        assert_eq!(bytes, &[1, 2, 3, 4]);
        assert_eq!(s.as_slice(), &[4]);

        let (bytes, s) = chunk.read(1).unwrap();
        assert_eq!(bytes, &[5, 6]);
        assert_eq!(s.as_slice(), &[2]);
    }

    #[test]
    fn refuses_append_past_max_chunk_size() {
        let mut chunk = Chunk::new();
        chunk.append_sample(&[0; 10], 12, shape(&[10])).unwrap();
        assert!(chunk.append_sample(&[0; 10], 12, shape(&[10])).is_err());
    }

    #[test]
    fn serialize_roundtrip_is_idempotent() {
        let mut chunk = Chunk::new();
        chunk.append_sample(&[1, 2, 3], 1 << 20, shape(&[3])).unwrap();
        chunk.append_sample(&[4, 5, 6], 1 << 20, shape(&[3])).unwrap();
        chunk.append_sample(&[7; 8], 1 << 20, shape(&[2, 4])).unwrap();

        let bytes = chunk.to_bytes().unwrap();
        let back = Chunk::from_bytes(&bytes).unwrap();
        assert_eq!(chunk, back);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut chunk = Chunk::new();
        chunk.append_sample(&[1], 1 << 20, shape(&[1])).unwrap();
        let mut bytes = chunk.to_bytes().unwrap();
        bytes[0] = 99;
        assert!(Chunk::from_bytes(&bytes).is_err());
    }
}
