//! The blob store contract: an opaque byte key/value map.
//!
//! Concrete backends (a real object-store client, a production filesystem
//! layout with sharded directories, ...) live outside this crate. What ships
//! here is the trait plus two small test doubles — an in-memory store and a
//! bare local-filesystem store — used to exercise the cache and engine
//! end-to-end without pulling in a real backend.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// A recoverability hint for a blob store failure.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("key not found: {0:?}")]
    NotFound(String),

    #[error("transient blob store failure: {0}")]
    Transient(String),

    #[error("fatal blob store failure: {0}")]
    Fatal(String),
}

pub type BlobStoreResult<T> = std::result::Result<T, BlobStoreError>;

/// Opaque byte key/value contract that every blob store backend implements.
///
/// Keys are forward-slash-separated path strings (see [`crate::keys`]).
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> BlobStoreResult<Vec<u8>>;
    fn put(&self, key: &str, bytes: Vec<u8>) -> BlobStoreResult<()>;
    fn delete(&self, key: &str) -> BlobStoreResult<()>;
    fn exists(&self, key: &str) -> bool;
    /// Every stored key that starts with `prefix`, in no particular order.
    fn iter_prefix(&self, prefix: &str) -> Vec<String>;
}

/// An in-memory blob store, used by unit tests and as the default backend in
/// examples. Not durable across process restarts.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: Mutex<ahash::AHashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> BlobStoreResult<Vec<u8>> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(key.to_owned()))
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> BlobStoreResult<()> {
        self.entries.lock().insert(key.to_owned(), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> BlobStoreResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn iter_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// A local-filesystem blob store. Keys map onto nested directories under
/// `root`, mirroring the key layout described in §6 of the engine's
/// specification (`<tensor>/chunks/<hex_id>`, etc).
pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for LocalFsBlobStore {
    fn get(&self, key: &str) -> BlobStoreResult<Vec<u8>> {
        std::fs::read(self.path_for(key)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                BlobStoreError::NotFound(key.to_owned())
            } else {
                BlobStoreError::Transient(err.to_string())
            }
        })
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> BlobStoreResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| BlobStoreError::Fatal(err.to_string()))?;
        }
        std::fs::write(path, bytes).map_err(|err| BlobStoreError::Fatal(err.to_string()))
    }

    fn delete(&self, key: &str) -> BlobStoreResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobStoreError::Fatal(err.to_string())),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    fn iter_prefix(&self, prefix: &str) -> Vec<String> {
        let mut out = Vec::new();
        walk(&self.root, &self.root, prefix, &mut out);
        out
    }
}

fn walk(root: &Path, dir: &Path, prefix: &str, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, prefix, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
            if key.starts_with(prefix) {
                out.push(key);
            }
        }
    }
}
