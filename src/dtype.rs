//! A small numpy-name-compatible dtype registry.
//!
//! Tensor meta stores `dtype` as a string (matching the upstream Python
//! library, which just stores `numpy.dtype.name`). We parse that string into
//! a [`DType`] whenever we need to know the element size or perform
//! byte-order adaptation; unrecognized names are rejected at tensor-meta
//! creation time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Size in bytes of one scalar element.
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Parse a numpy-style dtype name (`"float32"`, `"uint8"`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Self::Bool,
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalizes `buffer` so that its bytes match `dtype`'s native (little)
/// endian representation. Identity when `buffer` is already little-endian,
/// which is the only layout this crate ever produces, so today this is a
/// no-op kept as the seam the upstream `adapt()` step occupies.
pub fn adapt_endianness(buffer: &[u8], _dtype: DType) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Borrowed(buffer)
}
