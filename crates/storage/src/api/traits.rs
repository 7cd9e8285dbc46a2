use super::Table;

/// Low-level backend error type.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for key-value iterator operations.
pub type KvResult = Result<(Box<[u8]>, Box<[u8]>), BackendError>;

/// A storage backend that can create read snapshots and exclusive
/// read-modify-write transactions.
///
/// The single-writer transaction discipline is what gives signing decisions
/// their serializability: detection queries and the conditional insert of one
/// decision commit as a unit, and no other writer can interleave.
pub trait StorageBackend: Send + Sync {
    /// Begin a read-only view over a consistent snapshot of the storage.
    ///
    /// The in-memory backend holds a read lock for the lifetime of the view,
    /// so a view must be dropped before beginning a transaction on the same
    /// thread.
    fn begin_read(&self) -> Result<Box<dyn StorageReadView + '_>, BackendError>;

    /// Begin an exclusive read-modify-write transaction.
    ///
    /// Reads through the transaction observe its own uncommitted writes.
    /// Dropping the transaction without calling [`StorageTransaction::commit`]
    /// rolls back every write.
    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, BackendError>;
}

/// A read-only view of the storage.
pub trait StorageReadView {
    /// Get a value by key from a table.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;

    /// Iterate entries of a table in ascending key order, starting at the
    /// first key greater than or equal to `start`.
    fn iter_from(
        &self,
        table: Table,
        start: &[u8],
    ) -> Result<Box<dyn Iterator<Item = KvResult> + '_>, BackendError>;
}

/// An exclusive transaction combining reads and writes atomically.
pub trait StorageTransaction: StorageReadView {
    /// Put a key-value pair into a table.
    fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), BackendError>;

    /// Commit every write, consuming the transaction.
    fn commit(self: Box<Self>) -> Result<(), BackendError>;
}
