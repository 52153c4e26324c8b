//! # statedb-storage
//!
//! Storage layer for the statedb trie database.
//!
//! This crate provides a RocksDB-based storage abstraction with support for:
//! - Column families separating flat state, trie nodes and metadata
//! - Atomic batch writes with a size-tracked flush threshold
//! - Bounded forward scans for restartable cursors
//!
//! ## Column Families
//!
//! - `Snapshot`: flat state rows (account and storage namespaces)
//! - `TrieNodes`: Merkle trie nodes indexed by node hash
//! - `Metadata`: singleton records (snapshot root, generator journal)

mod batch;
mod database;
mod error;
pub mod keys;

pub use batch::{WriteBatch, DEFAULT_IDEAL_BATCH_SIZE};
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};

/// Storage trait for abstracting database operations.
///
/// This allows for easy testing with mock implementations.
pub trait Storage: Send + Sync {
    /// Get a value by key from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Put a key-value pair into a column family.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a key from a column family.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists in a column family.
    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Scan up to `limit` entries of a column family in ascending key order,
    /// starting at `start` (inclusive).
    ///
    /// The scan is bounded so that callers never pin a database iterator
    /// across their own flush or commit points; cursors are rebuilt from the
    /// last returned key instead.
    fn scan_from(
        &self,
        cf: ColumnFamily,
        start: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;
}
