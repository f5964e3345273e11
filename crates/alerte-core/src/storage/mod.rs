//! Named cache generations of request -> response entries.
//!
//! Two backends are provided:
//! - `MemoryStorage`: process-local, used by tests and embedders
//! - `DiskStorage`: one directory per generation, survives restarts
//!
//! Both serialise individual operations and make `put_all` atomic; callers follow the discipline
//! "install writes, activate deletes, everything else reads".

pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::request::{CachedEntry, RequestKey};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Identifiers of every stored generation, in a stable order.
    async fn generations(&self) -> Result<Vec<String>, StorageError>;

    /// Create the generation if it does not exist yet.
    async fn open(&self, generation: &str) -> Result<(), StorageError>;

    /// Store an entry in an opened generation.
    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        entry: CachedEntry,
    ) -> Result<(), StorageError>;

    /// Store a batch of entries as one unit. Backends that can stage writes
    /// make the batch visible all at once; the default stores entries one by
    /// one and may leave a prefix behind on failure.
    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, CachedEntry)>,
    ) -> Result<(), StorageError> {
        self.open(generation).await?;
        for (key, entry) in entries {
            self.put(generation, &key, entry).await?;
        }
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError>;

    /// Keys stored in a generation; empty when the generation is absent.
    async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StorageError>;

    /// Delete a generation and all its entries. Returns whether it existed.
    async fn delete(&self, generation: &str) -> Result<bool, StorageError>;
}
