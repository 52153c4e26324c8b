//! Write batch for atomic operations.

use crate::ColumnFamily;

/// Default batch size (in accumulated key/value bytes) above which callers
/// should flush. Large enough to amortize commit overhead, small enough to
/// keep interruption latency bounded.
pub const DEFAULT_IDEAL_BATCH_SIZE: usize = 100 * 1024;

/// Kind of batch operation.
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// Put a key-value pair.
    Put { value: Vec<u8> },
    /// Delete a key.
    Delete,
}

/// A single batch operation.
#[derive(Debug, Clone)]
pub struct BatchOperation {
    /// Target column family.
    pub cf: ColumnFamily,
    /// Key to operate on.
    pub key: Vec<u8>,
    /// Kind of operation.
    pub kind: OperationKind,
}

/// A batch of write operations to be executed atomically.
#[derive(Debug, Default)]
pub struct WriteBatch {
    /// Collected operations.
    pub(crate) operations: Vec<BatchOperation>,
    /// Accumulated key/value bytes across all operations.
    size: usize,
}

impl WriteBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put operation to the batch.
    pub fn put(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        self.size += key.len() + value.len();
        self.operations.push(BatchOperation {
            cf,
            key,
            kind: OperationKind::Put { value },
        });
    }

    /// Add a delete operation to the batch.
    pub fn delete(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>) {
        let key = key.into();
        self.size += key.len();
        self.operations.push(BatchOperation {
            cf,
            key,
            kind: OperationKind::Delete,
        });
    }

    /// Get the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Accumulated key/value bytes across all queued operations. Used by
    /// callers to decide when the batch should be flushed.
    pub fn value_size(&self) -> usize {
        self.size
    }

    /// Clear all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.size = 0;
    }

    /// Take the queued operations out of the batch, leaving it empty.
    pub fn take(&mut self) -> WriteBatch {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put(ColumnFamily::Snapshot, b"key1", b"value1");
        batch.put(ColumnFamily::Metadata, b"key2", b"value2");
        batch.delete(ColumnFamily::Snapshot, b"key3");

        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.value_size(), 0);
    }

    #[test]
    fn test_value_size_tracks_bytes() {
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Snapshot, b"abc", b"defg");
        assert_eq!(batch.value_size(), 7);

        batch.delete(ColumnFamily::Snapshot, b"xy");
        assert_eq!(batch.value_size(), 9);

        let taken = batch.take();
        assert_eq!(taken.value_size(), 9);
        assert_eq!(batch.value_size(), 0);
        assert!(batch.is_empty());
    }
}
