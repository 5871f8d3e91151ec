//! The crate-wide error taxonomy.
//!
//! Every fallible operation in `chunk_store` returns [`Result`], whose error
//! variants name a *kind* of failure rather than the type that produced it,
//! mirroring how the upstream `hub` chunk engine categorizes its exceptions.

use crate::index::SampleIndex;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `tensor_meta.length` and `chunk_id_encoder.num_samples` disagree, or a
    /// metadata payload failed to deserialize.
    #[error("corrupted metadata for tensor {tensor:?}: {reason}")]
    CorruptedMeta { tensor: String, reason: String },

    /// A dense read was requested but the addressed samples do not share a shape.
    #[error("cannot stack samples {index:?} of tensor {tensor:?} into a dense array: shapes differ (request a list instead)")]
    DynamicTensorRead {
        tensor: String,
        index: SampleIndex,
    },

    /// A single-sample index is out of bounds for the tensor's current length.
    #[error("sample index {index} out of range for tensor {tensor:?} (length {length})")]
    SampleIndexOutOfRange {
        tensor: String,
        index: usize,
        length: u64,
    },

    /// A sample's encoded size exceeds `min_chunk_size`.
    #[error("sample of {num_bytes} bytes exceeds the minimum chunk size of {min_chunk_size} bytes for tensor {tensor:?}{hint}")]
    SampleTooLarge {
        tensor: String,
        num_bytes: usize,
        min_chunk_size: usize,
        hint: &'static str,
    },

    /// Attempted to change dtype or rank after the tensor already has samples.
    #[error("tensor {tensor:?} expected {expected}, got {actual} (dtype/rank is frozen after the first sample)")]
    TensorMetaMismatch {
        tensor: String,
        expected: String,
        actual: String,
    },

    /// `htype` is not present in the configuration table.
    #[error("unknown htype {htype:?}, known htypes are {known:?}")]
    TensorMetaInvalidHtype {
        htype: String,
        known: Vec<&'static str>,
    },

    /// An override key is not part of the htype's configuration table.
    #[error("{htype:?} has no configurable key {key:?}, valid keys are {valid:?}")]
    InvalidOverwriteKey {
        htype: String,
        key: String,
        valid: Vec<&'static str>,
    },

    /// An override value failed validation (e.g. non-positive `chunk_size`).
    #[error("invalid value for {key:?}: {reason}")]
    InvalidOverwriteValue { key: String, reason: String },

    /// A write was attempted against a cache/engine opened read-only.
    #[error("cannot write to tensor {tensor:?}: opened read-only")]
    ReadOnly { tensor: String },

    /// Upstream blob store reported the key does not exist.
    #[error("key not found in blob store: {key:?}")]
    BlobStoreNotFound { key: String },

    /// Upstream blob store failed in a way that may succeed on retry.
    #[error("transient blob store error for key {key:?}: {source}")]
    BlobStoreTransient {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Upstream blob store failed in a way that will not succeed on retry.
    #[error("fatal blob store error for key {key:?}: {source}")]
    BlobStoreFatal {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn corrupted_meta(tensor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptedMeta {
            tensor: tensor.into(),
            reason: reason.into(),
        }
    }
}
