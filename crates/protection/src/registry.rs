use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use slashguard_storage::{Store, StoreError};
use slashguard_types::{PublicKey, ValidatorId};

/// In-memory mapping from public key to internal validator id.
///
/// Append-only: an entry is never removed and its id never changes, so a
/// lookup hit needs no revalidation. Writers coordinate through the store's
/// registration transaction; the map only ever absorbs mappings the store
/// has committed.
#[derive(Default)]
pub struct ValidatorRegistry {
    inner: RwLock<HashMap<PublicKey, ValidatorId>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every registered validator from the store.
    pub fn load(store: &Store) -> Result<Self, StoreError> {
        let mut map = HashMap::new();
        let view = store.read()?;
        for validator in store.iter_validators(&*view)? {
            let (id, key) = validator?;
            map.insert(key, id);
        }
        Ok(Self {
            inner: RwLock::new(map),
        })
    }

    pub fn lookup(&self, key: &PublicKey) -> Option<ValidatorId> {
        self.read_lock().get(key).copied()
    }

    /// Absorb a committed (key, id) mapping from registration or import.
    /// Known keys keep their existing id.
    pub fn absorb(&self, mapping: &[(PublicKey, ValidatorId)]) {
        let mut inner = self.write_lock();
        for (key, id) in mapping {
            inner.entry(key.clone()).or_insert(*id);
        }
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    // The map is append-only, so a poisoned lock cannot hide a torn write;
    // recover the guard instead of propagating the panic.
    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<PublicKey, ValidatorId>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<PublicKey, ValidatorId>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
