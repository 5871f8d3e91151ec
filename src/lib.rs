//! A chunked, append-only byte storage engine for large tensor sample
//! collections.
//!
//! Samples (multi-dimensional arrays) belonging to a named tensor are packed
//! into a small number of fixed-capacity byte buffers ("chunks") behind a
//! pluggable [`blob_store::BlobStore`]. Writes go through [`engine::ChunkEngine`],
//! which decides whether a new sample extends the currently-open chunk or
//! starts a new one, then keeps a bidirectional chunk-id index ([`chunk_id_encoder`])
//! in sync. A write-back LRU [`cache::Cache`] sits between the engine and the
//! blob store so repeated reads/writes of the same chunk or metadata object
//! don't round-trip to storage.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use chunk_store::blob_store::MemoryBlobStore;
//! use chunk_store::chunk::Shape;
//! use chunk_store::engine::{ChunkEngine, EngineConfig};
//!
//! let store = Arc::new(MemoryBlobStore::new());
//! let engine = ChunkEngine::create("images/rgb", store, "image", HashMap::new(), EngineConfig::default())?;
//! engine.append(&[0u8; 12], "uint8", Shape::from_slice(&[2, 2, 3]))?;
//! engine.flush()?;
//! # Ok::<(), chunk_store::error::Error>(())
//! ```

pub mod binio;
pub mod blob_store;
pub mod cachable;
pub mod cache;
pub mod chunk;
pub mod chunk_id_encoder;
pub mod codec;
pub mod dtype;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod hashlist;
pub mod index;
pub mod keys;
pub mod tensor_meta;

pub use cachable::Cachable;
pub use chunk::{Chunk, Shape};
pub use chunk_id_encoder::ChunkIdEncoder;
pub use dtype::DType;
pub use engine::{ChunkEngine, DecodedSample, EngineConfig, SampleData};
pub use error::{Error, Result};
pub use hashlist::Hashlist;
pub use index::{ReadMode, SampleIndex};
pub use tensor_meta::TensorMeta;
