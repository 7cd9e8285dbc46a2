//! RocksDB storage backend.

use crate::api::{
    ALL_TABLES, BackendError, KvResult, StorageBackend, StorageReadView, StorageTransaction, Table,
};
use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, MultiThreaded, Options,
    SnapshotWithThreadMode, Transaction, TransactionDB, TransactionDBOptions,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Returns the column family name for a table.
fn cf_name(table: Table) -> &'static str {
    match table {
        Table::Validators => "validators",
        Table::ValidatorKeys => "validator_keys",
        Table::SignedBlocks => "signed_blocks",
        Table::SignedAttestations => "signed_attestations",
        Table::ProposalWatermarks => "proposal_watermarks",
        Table::AttestationWatermarks => "attestation_watermarks",
        Table::Metadata => "metadata",
    }
}

/// RocksDB storage backend built on a `TransactionDB`.
///
/// Decision transactions take an exclusive write lock so that detection
/// queries and the conditional insert serialize as a unit; an uncommitted
/// transaction rolls back when dropped.
pub struct RocksDBBackend {
    db: Arc<TransactionDB<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksDBBackend {
    /// Open a RocksDB database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = ALL_TABLES
            .iter()
            .map(|t| ColumnFamilyDescriptor::new(cf_name(*t), Options::default()))
            .collect();

        let db = TransactionDB::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            cf_descriptors,
        )?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }
}

impl StorageBackend for RocksDBBackend {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView + '_>, BackendError> {
        Ok(Box::new(RocksDBReadView {
            db: &self.db,
            snapshot: self.db.snapshot(),
        }))
    }

    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, BackendError> {
        let guard = self.write_lock.lock().map_err(|e| e.to_string())?;
        Ok(Box::new(RocksDBTransaction {
            db: &self.db,
            txn: self.db.transaction(),
            _guard: guard,
        }))
    }
}

/// Read view pinned to a database snapshot.
struct RocksDBReadView<'a> {
    db: &'a TransactionDB<MultiThreaded>,
    snapshot: SnapshotWithThreadMode<'a, TransactionDB<MultiThreaded>>,
}

impl StorageReadView for RocksDBReadView<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let cf = self
            .db
            .cf_handle(cf_name(table))
            .ok_or_else(|| format!("Column family {} not found", cf_name(table)))?;

        Ok(self.snapshot.get_cf(&cf, key)?)
    }

    fn iter_from(
        &self,
        table: Table,
        start: &[u8],
    ) -> Result<Box<dyn Iterator<Item = KvResult> + '_>, BackendError> {
        let cf = self
            .db
            .cf_handle(cf_name(table))
            .ok_or_else(|| format!("Column family {} not found", cf_name(table)))?;

        let iter = self
            .snapshot
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward))
            .map(|result| result.map_err(|e| Box::new(e) as BackendError));

        Ok(Box::new(iter))
    }
}

/// Exclusive read-modify-write transaction.
struct RocksDBTransaction<'a> {
    db: &'a TransactionDB<MultiThreaded>,
    txn: Transaction<'a, TransactionDB<MultiThreaded>>,
    _guard: MutexGuard<'a, ()>,
}

impl StorageReadView for RocksDBTransaction<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let cf = self
            .db
            .cf_handle(cf_name(table))
            .ok_or_else(|| format!("Column family {} not found", cf_name(table)))?;

        Ok(self.txn.get_cf(&cf, key)?)
    }

    fn iter_from(
        &self,
        table: Table,
        start: &[u8],
    ) -> Result<Box<dyn Iterator<Item = KvResult> + '_>, BackendError> {
        let cf = self
            .db
            .cf_handle(cf_name(table))
            .ok_or_else(|| format!("Column family {} not found", cf_name(table)))?;

        let iter = self
            .txn
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward))
            .map(|result| result.map_err(|e| Box::new(e) as BackendError));

        Ok(Box::new(iter))
    }
}

impl StorageTransaction for RocksDBTransaction<'_> {
    fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), BackendError> {
        let cf = self
            .db
            .cf_handle(cf_name(table))
            .ok_or_else(|| format!("Column family {} not found", cf_name(table)))?;

        self.txn.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let this = *self;
        this.txn.commit()?;
        Ok(())
    }
}
