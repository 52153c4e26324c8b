//! RocksDB database implementation.

use crate::{Storage, StorageError, StorageResult, WriteBatch};
use parking_lot::RwLock;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Column families for organizing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Flat state rows: account and storage snapshot namespaces.
    Snapshot,
    /// Merkle trie nodes indexed by node hash.
    TrieNodes,
    /// Singleton records: snapshot root, generator journal.
    Metadata,
    /// Default column family (required by RocksDB).
    Default,
}

impl ColumnFamily {
    /// Get the string name of the column family.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Snapshot => "snapshot",
            ColumnFamily::TrieNodes => "trie_nodes",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::Default => "default",
        }
    }

    /// Get all column families.
    pub fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::Snapshot,
            ColumnFamily::TrieNodes,
            ColumnFamily::Metadata,
            ColumnFamily::Default,
        ]
    }
}

/// RocksDB database wrapper.
pub struct Database {
    db: Arc<RwLock<DBWithThreadMode<MultiThreaded>>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(1);
        opts.set_max_total_wal_size(64 * 1024 * 1024); // 64MB WAL

        // Larger buffers reduce write amplification by delaying compaction;
        // the snapshot generator is a write-heavy sequential workload.
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_max_background_jobs(4);

        // Shared block cache for all column families to bound memory.
        let block_cache = Cache::new_lru_cache(128 * 1024 * 1024);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::all()
            .iter()
            .map(|cf| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                cf_opts.set_write_buffer_size(32 * 1024 * 1024);

                let mut block_opts = BlockBasedOptions::default();
                block_opts.set_block_cache(&block_cache);
                block_opts.set_cache_index_and_filter_blocks(true);
                cf_opts.set_block_based_table_factory(&block_opts);

                ColumnFamilyDescriptor::new(cf.name(), cf_opts)
            })
            .collect();

        let db =
            DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cf_descriptors)?;

        debug!("Database opened successfully");

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let db = self.db.read();
        for cf in ColumnFamily::all() {
            if let Some(handle) = db.cf_handle(cf.name()) {
                db.flush_cf(&handle)?;
            }
        }
        Ok(())
    }
}

impl Storage for Database {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf.name().to_string()))?;

        Ok(db.get_cf(&handle, key)?)
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf.name().to_string()))?;

        db.put_cf(&handle, key, value)?;
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf.name().to_string()))?;

        db.delete_cf(&handle, key)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let db = self.db.read();
        let mut rocks_batch = rocksdb::WriteBatch::default();

        for op in batch.operations {
            let handle = db
                .cf_handle(op.cf.name())
                .ok_or_else(|| StorageError::ColumnFamilyNotFound(op.cf.name().to_string()))?;

            match op.kind {
                crate::batch::OperationKind::Put { value } => {
                    rocks_batch.put_cf(&handle, &op.key, &value);
                }
                crate::batch::OperationKind::Delete => {
                    rocks_batch.delete_cf(&handle, &op.key);
                }
            }
        }

        // WAL provides durability, skip the fsync on every commit.
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.disable_wal(false);
        write_opts.set_sync(false);

        db.write_opt(rocks_batch, &write_opts)?;
        Ok(())
    }

    fn scan_from(
        &self,
        cf: ColumnFamily,
        start: &[u8],
        limit: usize,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf.name().to_string()))?;

        let iter = db.iterator_cf(&handle, IteratorMode::From(start, Direction::Forward));

        let mut entries = Vec::with_capacity(limit.min(1024));
        for row in iter.take(limit) {
            let (key, value) = row?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_open_and_write() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        db.put(ColumnFamily::Metadata, b"key1", b"value1").unwrap();
        let value = db.get(ColumnFamily::Metadata, b"key1").unwrap();
        assert_eq!(value, Some(b"value1".to_vec()));

        db.delete(ColumnFamily::Metadata, b"key1").unwrap();
        let value = db.get(ColumnFamily::Metadata, b"key1").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_write_batch() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Snapshot, b"a1", b"row1");
        batch.put(ColumnFamily::Snapshot, b"a2", b"row2");
        batch.put(ColumnFamily::TrieNodes, b"n1", b"node");

        db.write_batch(batch).unwrap();

        assert_eq!(
            db.get(ColumnFamily::Snapshot, b"a1").unwrap(),
            Some(b"row1".to_vec())
        );
        assert_eq!(
            db.get(ColumnFamily::Snapshot, b"a2").unwrap(),
            Some(b"row2".to_vec())
        );
        assert_eq!(
            db.get(ColumnFamily::TrieNodes, b"n1").unwrap(),
            Some(b"node".to_vec())
        );
    }

    #[test]
    fn test_scan_from_is_ordered_and_bounded() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        for i in 0u8..10 {
            db.put(ColumnFamily::Snapshot, &[i], &[i]).unwrap();
        }

        let rows = db.scan_from(ColumnFamily::Snapshot, &[3], 4).unwrap();
        let keys: Vec<u8> = rows.iter().map(|(k, _)| k[0]).collect();
        assert_eq!(keys, vec![3, 4, 5, 6]);

        // Start key absent: scan begins at the next present key.
        db.delete(ColumnFamily::Snapshot, &[5]).unwrap();
        let rows = db.scan_from(ColumnFamily::Snapshot, &[5], 2).unwrap();
        let keys: Vec<u8> = rows.iter().map(|(k, _)| k[0]).collect();
        assert_eq!(keys, vec![6, 7]);
    }
}
