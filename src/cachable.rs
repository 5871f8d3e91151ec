//! The `Cachable` contract: anything the [`crate::cache::Cache`] can hold as
//! a live, typed object rather than raw bytes.
//!
//! The cache deserializes on a cache miss without inspecting the payload
//! itself; its own tagged `CacheValue` variant (one arm per `Cachable` impl)
//! tells it which deserializer to run for a given typed accessor
//! (`get_chunk`, `get_tensor_meta`, ...). This avoids runtime type
//! introspection (no `Any::downcast`) while still letting one cache hold
//! several unrelated cachable types.

use crate::error::Result;

/// A type that knows how to serialize/deserialize itself and report the size
/// of its live (in-memory) representation for cache accounting.
pub trait Cachable: Sized + Send + Sync + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>>;
    fn from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Size of the live representation, in bytes. Used for LRU accounting;
    /// need not match `to_bytes().len()` exactly.
    fn nbytes(&self) -> usize;
}
