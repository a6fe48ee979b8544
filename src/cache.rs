//! Persistent recording store.
//!
//! A thin wrapper over one named sled tree: keys are request fingerprints,
//! values are encoded payloads, both treated as opaque bytes. Writes are
//! atomic single-key upserts with last-writer-wins semantics and are flushed
//! to disk before `set` returns. The handle is cheap to clone and safe to
//! share across request tasks.

use std::path::Path;

const TREE_NAME: &str = "captured";

/// The store could not serve a read or write.
///
/// A missing key is not an error; reads return `Ok(None)` for that.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sled::Error),
}

/// Handle to the on-disk recording store.
#[derive(Clone)]
pub struct Cache {
    _db: sled::Db,
    tree: sled::Tree,
}

impl Cache {
    /// Opens (creating if needed) the database directory and its recording
    /// tree. The store stays open until the last clone is dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { _db: db, tree })
    }

    /// Upserts a value, replacing any previous value under the key, and
    /// flushes it to disk before returning.
    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        self.tree.insert(key, value)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    /// Looks up a value. `Ok(None)` means the key was never recorded.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    /// Number of recordings currently held.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Drops every recording.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.tree.clear()?;
        Ok(())
    }
}
