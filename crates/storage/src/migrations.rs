//! Forward-only, numbered schema migrations.
//!
//! The current schema version is stamped into the metadata table; opening a
//! database written by a newer schema fails rather than guessing.

use tracing::info;

use crate::api::{StorageTransaction, Table};
use crate::error::StoreError;
use crate::store::{Store, decode_u64, encode_u64};

/// Schema version stamped into databases created by this build.
pub const SCHEMA_VERSION: u64 = 1;

const KEY_SCHEMA_VERSION: &[u8] = b"schema_version";

/// Migration steps; index `i` upgrades schema version `i` to `i + 1`.
const MIGRATIONS: &[fn(&mut dyn StorageTransaction) -> Result<(), StoreError>] = &[init_schema];

/// Version 0 -> 1: nothing to rewrite, tables are created by the backends.
fn init_schema(_txn: &mut dyn StorageTransaction) -> Result<(), StoreError> {
    Ok(())
}

pub(crate) fn migrate(store: &Store) -> Result<(), StoreError> {
    let mut txn = store.transaction()?;

    let found = match txn.get(Table::Metadata, KEY_SCHEMA_VERSION)? {
        Some(bytes) => decode_u64(&bytes, "schema version")?,
        None => 0,
    };

    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    for (version, step) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        step(&mut *txn)?;
        info!(from = version, to = version + 1, "Applied storage migration");
    }

    txn.put(
        Table::Metadata,
        KEY_SCHEMA_VERSION.to_vec(),
        encode_u64(SCHEMA_VERSION),
    )?;
    txn.commit()?;
    Ok(())
}
