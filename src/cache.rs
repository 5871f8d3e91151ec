//! The write-back LRU cache sitting between the chunk engine and the blob
//! store.
//!
//! A key is either *clean* (its live value matches what's durably stored
//! upstream) or *dirty* (mutated locally, pending a flush). Eviction of a
//! dirty key forces a flush of exactly that key first; a soft cap lets a
//! single oversized entry stay admitted rather than evicting it immediately
//! after insertion.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::blob_store::{BlobStore, BlobStoreError};
use crate::cachable::Cachable;
use crate::chunk::Chunk;
use crate::chunk_id_encoder::ChunkIdEncoder;
use crate::error::{Error, Result};
use crate::hashlist::Hashlist;
use crate::tensor_meta::TensorMeta;

/// The tagged variant every cache entry's live value takes, avoiding runtime
/// type introspection (no `Any::downcast`).
#[derive(Debug, Clone)]
enum CacheValue {
    Bytes(Vec<u8>),
    Chunk(Chunk),
    ChunkIdEncoder(ChunkIdEncoder),
    TensorMeta(TensorMeta),
    Hashlist(Hashlist),
}

impl CacheValue {
    fn nbytes(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Chunk(c) => c.nbytes(),
            Self::ChunkIdEncoder(e) => e.nbytes(),
            Self::TensorMeta(m) => m.nbytes(),
            Self::Hashlist(h) => h.nbytes(),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(b) => Ok(b.clone()),
            Self::Chunk(c) => c.to_bytes(),
            Self::ChunkIdEncoder(e) => e.to_bytes(),
            Self::TensorMeta(m) => m.to_bytes(),
            Self::Hashlist(h) => h.to_bytes(),
        }
    }
}

struct Entry {
    value: CacheValue,
    dirty: bool,
    nbytes: usize,
}

struct Inner {
    lru: LruCache<String, Entry>,
    total_bytes: usize,
    dirty_bytes: usize,
    /// Dirty keys in the order they first became dirty, so `maybe_flush`
    /// writes them back deterministically.
    dirty_order: Vec<String>,
}

/// The write-back cache. Cheap to clone (an `Arc` internally); safe to share
/// across threads behind a single-writer discipline (see the engine's
/// concurrency notes).
pub struct Cache {
    store: Arc<dyn BlobStore>,
    capacity_bytes: usize,
    flush_threshold_bytes: usize,
    read_only: bool,
    inner: Mutex<Inner>,
}

impl Cache {
    pub fn new(store: Arc<dyn BlobStore>, capacity_bytes: usize, flush_threshold_bytes: usize) -> Self {
        Self {
            store,
            capacity_bytes,
            flush_threshold_bytes,
            read_only: false,
            inner: Mutex::new(Inner {
                lru: LruCache::new(NonZeroUsize::new(usize::MAX).expect("usize::MAX is nonzero")),
                total_bytes: 0,
                dirty_bytes: 0,
                dirty_order: Vec::new(),
            }),
        }
    }

    pub fn read_only(store: Arc<dyn BlobStore>, capacity_bytes: usize) -> Self {
        Self {
            read_only: true,
            ..Self::new(store, capacity_bytes, capacity_bytes)
        }
    }

    pub fn check_readonly(&self) -> Result<()> {
        if self.read_only {
            Err(Error::ReadOnly {
                tensor: "<cache>".to_owned(),
            })
        } else {
            Ok(())
        }
    }

    /// Raw bytes for `key`, fetching and admitting from upstream on a miss.
    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.lru.get(key) {
            return entry.value.to_bytes();
        }
        log::trace!("cache miss for {key:?}, fetching bytes from upstream");
        let bytes = self.fetch_upstream(key)?;
        let value = CacheValue::Bytes(bytes.clone());
        self.admit(&mut inner, key.to_owned(), value, false);
        Ok(bytes)
    }

    fn fetch_upstream(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get(key).map_err(|err| blob_store_error(key, err))
    }

    fn get_or_load<T: Cachable + Clone>(
        &self,
        key: &str,
        extract: impl Fn(&CacheValue) -> Option<&T>,
        wrap: impl FnOnce(T) -> CacheValue,
    ) -> Result<T> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.lru.get(key) {
            if let Some(value) = extract(&entry.value) {
                return Ok(value.clone());
            }
        }
        log::debug!("cache miss for {key:?}, loading and deserializing from upstream");
        let bytes = self.fetch_upstream(key)?;
        let value = T::from_bytes(&bytes)?;
        self.admit(&mut inner, key.to_owned(), wrap(value.clone()), false);
        Ok(value)
    }

    pub fn get_chunk(&self, key: &str) -> Result<Chunk> {
        self.get_or_load(
            key,
            |v| match v {
                CacheValue::Chunk(c) => Some(c),
                _ => None,
            },
            CacheValue::Chunk,
        )
    }

    pub fn get_chunk_id_encoder(&self, key: &str) -> Result<ChunkIdEncoder> {
        self.get_or_load(
            key,
            |v| match v {
                CacheValue::ChunkIdEncoder(e) => Some(e),
                _ => None,
            },
            CacheValue::ChunkIdEncoder,
        )
    }

    pub fn get_tensor_meta(&self, key: &str) -> Result<TensorMeta> {
        self.get_or_load(
            key,
            |v| match v {
                CacheValue::TensorMeta(m) => Some(m),
                _ => None,
            },
            CacheValue::TensorMeta,
        )
    }

    pub fn get_hashlist(&self, key: &str) -> Result<Hashlist> {
        self.get_or_load(
            key,
            |v| match v {
                CacheValue::Hashlist(h) => Some(h),
                _ => None,
            },
            CacheValue::Hashlist,
        )
    }

    pub fn key_exists(&self, key: &str) -> bool {
        if self.inner.lock().lru.contains(key) {
            return true;
        }
        self.store.exists(key)
    }

    pub fn set_chunk(&self, key: &str, value: Chunk) -> Result<()> {
        self.set(key, CacheValue::Chunk(value))
    }

    pub fn set_chunk_id_encoder(&self, key: &str, value: ChunkIdEncoder) -> Result<()> {
        self.set(key, CacheValue::ChunkIdEncoder(value))
    }

    pub fn set_tensor_meta(&self, key: &str, value: TensorMeta) -> Result<()> {
        self.set(key, CacheValue::TensorMeta(value))
    }

    pub fn set_hashlist(&self, key: &str, value: Hashlist) -> Result<()> {
        self.set(key, CacheValue::Hashlist(value))
    }

    fn set(&self, key: &str, value: CacheValue) -> Result<()> {
        self.check_readonly()?;
        let mut inner = self.inner.lock();
        self.admit(&mut inner, key.to_owned(), value, true);
        Ok(())
    }

    /// Caller notifies that an in-place mutation changed a live object's
    /// accounted size (used right after the engine mutates a chunk or
    /// encoder obtained from the cache).
    pub fn update_used_cache_for_path(&self, key: &str, new_nbytes: usize) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.lru.peek_mut(key) {
            let delta = new_nbytes as i64 - entry.nbytes as i64;
            entry.nbytes = new_nbytes;
            if entry.dirty {
                inner.dirty_bytes = (inner.dirty_bytes as i64 + delta).max(0) as usize;
            }
            inner.total_bytes = (inner.total_bytes as i64 + delta).max(0) as usize;
        }
        self.enforce_capacity(&mut inner, Some(key));
    }

    fn admit(&self, inner: &mut Inner, key: String, value: CacheValue, dirty: bool) {
        let nbytes = value.nbytes();

        if let Some(old) = inner.lru.pop(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.nbytes);
            if old.dirty {
                inner.dirty_bytes = inner.dirty_bytes.saturating_sub(old.nbytes);
                inner.dirty_order.retain(|k| k != &key);
            }
        }

        inner.total_bytes += nbytes;
        if dirty {
            inner.dirty_bytes += nbytes;
            inner.dirty_order.push(key.clone());
        }
        inner.lru.put(key.clone(), Entry { value, dirty, nbytes });

        self.enforce_capacity(inner, Some(&key));
    }

    /// Marks `key` dirty without changing its value (used by callers that
    /// mutated a cachable returned by `get_*` and want the engine's explicit
    /// `cache.mark_dirty(key)` discipline instead of a re-`set`).
    pub fn mark_dirty(&self, key: &str) {
        let mut inner = self.inner.lock();
        let nbytes = match inner.lru.peek(key) {
            Some(entry) if !entry.dirty => entry.nbytes,
            _ => return,
        };
        if let Some(entry) = inner.lru.peek_mut(key) {
            entry.dirty = true;
        }
        inner.dirty_bytes += nbytes;
        inner.dirty_order.push(key.to_owned());
    }

    fn enforce_capacity(&self, inner: &mut Inner, just_set: Option<&str>) {
        loop {
            if inner.total_bytes <= self.capacity_bytes {
                return;
            }
            let Some((lru_key, _)) = inner.lru.peek_lru() else {
                return;
            };
            if Some(lru_key.as_str()) == just_set {
                // The only entry (or the one we just admitted) is itself
                // oversized: the cap is soft for oversized singletons.
                return;
            }
            let lru_key = lru_key.clone();
            self.evict_one(inner, &lru_key);
        }
    }

    fn evict_one(&self, inner: &mut Inner, key: &str) {
        let needs_flush = matches!(inner.lru.peek(key), Some(entry) if entry.dirty);
        if needs_flush {
            // Best-effort: if the flush fails we leave the entry in place
            // rather than losing dirty data (see `flush_key`'s caller for
            // the fallible path used by `maybe_flush`).
            if self.flush_key(inner, key).is_err() {
                log::warn!("failed to flush {key:?} while evicting; leaving it cached");
                return;
            }
        }
        if let Some(entry) = inner.lru.pop(key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.nbytes);
        }
    }

    fn flush_key(&self, inner: &mut Inner, key: &str) -> Result<()> {
        let (bytes, nbytes) = {
            let Some(entry) = inner.lru.peek(key) else {
                return Ok(());
            };
            if !entry.dirty {
                return Ok(());
            }
            (entry.value.to_bytes()?, entry.nbytes)
        };
        self.store
            .put(key, bytes)
            .map_err(|err| blob_store_error(key, err))?;
        if let Some(entry) = inner.lru.peek_mut(key) {
            entry.dirty = false;
        }
        inner.dirty_bytes = inner.dirty_bytes.saturating_sub(nbytes);
        inner.dirty_order.retain(|k| k != key);
        Ok(())
    }

    /// Flushes every dirty entry to upstream, in the order each first became
    /// dirty, if accumulated dirty bytes meet the flush threshold.
    pub fn maybe_flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dirty_bytes < self.flush_threshold_bytes {
            return Ok(());
        }
        self.flush_all_locked(&mut inner)
    }

    /// Unconditionally flushes every dirty entry.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.flush_all_locked(&mut inner)
    }

    fn flush_all_locked(&self, inner: &mut Inner) -> Result<()> {
        let keys = std::mem::take(&mut inner.dirty_order);
        for key in &keys {
            log::trace!("flushing {key:?}");
            self.flush_key(inner, key)?;
        }
        Ok(())
    }

    pub fn dirty_bytes(&self) -> usize {
        self.inner.lock().dirty_bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}

fn blob_store_error(key: &str, err: BlobStoreError) -> Error {
    match err {
        BlobStoreError::NotFound(_) => Error::BlobStoreNotFound { key: key.to_owned() },
        BlobStoreError::Transient(msg) => Error::BlobStoreTransient {
            key: key.to_owned(),
            source: msg.into(),
        },
        BlobStoreError::Fatal(msg) => Error::BlobStoreFatal {
            key: key.to_owned(),
            source: msg.into(),
        },
    }
}
