use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::api::{BackendError, KvResult, StorageBackend, StorageReadView, StorageTransaction, Table};

type TableData = BTreeMap<Vec<u8>, Vec<u8>>;
type StorageData = HashMap<Table, TableData>;

/// In-memory storage backend using ordered maps.
///
/// Tables are `BTreeMap`s so that [`StorageReadView::iter_from`] walks keys
/// in ascending order, matching the on-disk backend.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<StorageData>>,
}

impl InMemoryBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView + '_>, BackendError> {
        let guard = self.data.read().map_err(|e| e.to_string())?;
        Ok(Box::new(InMemoryReadView { guard }))
    }

    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, BackendError> {
        let guard = self.data.write().map_err(|e| e.to_string())?;
        Ok(Box::new(InMemoryTransaction {
            guard,
            undo: Vec::new(),
            committed: false,
        }))
    }
}

fn get_from(data: &StorageData, table: Table, key: &[u8]) -> Option<Vec<u8>> {
    data.get(&table).and_then(|t| t.get(key)).cloned()
}

fn iter_table_from<'a>(
    data: &'a StorageData,
    table: Table,
    start: &[u8],
) -> Box<dyn Iterator<Item = KvResult> + 'a> {
    match data.get(&table) {
        Some(table_data) => Box::new(
            table_data
                .range(start.to_vec()..)
                .map(|(k, v)| Ok((k.clone().into_boxed_slice(), v.clone().into_boxed_slice()))),
        ),
        None => Box::new(std::iter::empty()),
    }
}

/// Read view holding a read lock on the storage data.
struct InMemoryReadView<'a> {
    guard: RwLockReadGuard<'a, StorageData>,
}

impl StorageReadView for InMemoryReadView<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(get_from(&self.guard, table, key))
    }

    fn iter_from(
        &self,
        table: Table,
        start: &[u8],
    ) -> Result<Box<dyn Iterator<Item = KvResult> + '_>, BackendError> {
        Ok(iter_table_from(&self.guard, table, start))
    }
}

/// Exclusive transaction holding the write lock.
///
/// Writes apply to the live maps immediately so that reads within the
/// transaction see them; an undo log restores prior state if the transaction
/// is dropped without commit.
struct InMemoryTransaction<'a> {
    guard: RwLockWriteGuard<'a, StorageData>,
    undo: Vec<(Table, Vec<u8>, Option<Vec<u8>>)>,
    committed: bool,
}

impl StorageReadView for InMemoryTransaction<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(get_from(&self.guard, table, key))
    }

    fn iter_from(
        &self,
        table: Table,
        start: &[u8],
    ) -> Result<Box<dyn Iterator<Item = KvResult> + '_>, BackendError> {
        Ok(iter_table_from(&self.guard, table, start))
    }
}

impl StorageTransaction for InMemoryTransaction<'_> {
    fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), BackendError> {
        let table_data = self.guard.entry(table).or_default();
        let prior = table_data.insert(key.clone(), value);
        self.undo.push((table, key, prior));
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), BackendError> {
        self.committed = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Replay the undo log in reverse to restore the pre-transaction state.
        while let Some((table, key, prior)) = self.undo.pop() {
            let table_data = self.guard.entry(table).or_default();
            match prior {
                Some(value) => {
                    table_data.insert(key, value);
                }
                None => {
                    table_data.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::run_backend_tests;

    #[test]
    fn in_memory_backend_conformance() {
        let backend = InMemoryBackend::new();
        run_backend_tests(&backend);
    }

    #[test]
    fn rollback_restores_overwritten_value() {
        let backend = InMemoryBackend::new();

        {
            let mut txn = backend.begin_transaction().unwrap();
            txn.put(Table::Metadata, b"key".to_vec(), b"old".to_vec())
                .unwrap();
            txn.commit().unwrap();
        }

        // Overwrite then drop without commit.
        {
            let mut txn = backend.begin_transaction().unwrap();
            txn.put(Table::Metadata, b"key".to_vec(), b"new".to_vec())
                .unwrap();
            assert_eq!(
                txn.get(Table::Metadata, b"key").unwrap(),
                Some(b"new".to_vec())
            );
        }

        let view = backend.begin_read().unwrap();
        assert_eq!(
            view.get(Table::Metadata, b"key").unwrap(),
            Some(b"old".to_vec())
        );
    }
}
