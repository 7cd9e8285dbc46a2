use std::sync::Arc;

use serde::Deserialize;

use slashguard_storage::backend::{InMemoryBackend, RocksDBBackend};
use slashguard_storage::{StorageBackend, StoreError};

/// Configuration surface consumed by the external signing service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database location. `memory:` selects the in-memory backend; anything
    /// else (optionally `rocksdb://`-prefixed) is a filesystem path for the
    /// RocksDB backend.
    pub db_url: String,

    /// Credentials for network-backed stores; ignored by the embedded
    /// backends.
    #[serde(default)]
    pub db_username: Option<String>,
    #[serde(default)]
    pub db_password: Option<String>,

    /// When false the engine is not instantiated and the signing service
    /// must not request decisions.
    #[serde(default = "default_enabled")]
    pub slashing_protection_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Open the storage backend selected by `db_url`.
    pub(crate) fn open_backend(&self) -> Result<Arc<dyn StorageBackend>, StoreError> {
        match self.db_url.as_str() {
            "memory" | "memory:" => Ok(Arc::new(InMemoryBackend::new())),
            url => {
                let path = url.strip_prefix("rocksdb://").unwrap_or(url);
                Ok(Arc::new(
                    RocksDBBackend::open(path).map_err(StoreError::Backend)?,
                ))
            }
        }
    }
}
