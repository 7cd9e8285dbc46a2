use thiserror::Error;

use crate::api::BackendError;

/// Errors that may occur while interacting with the slashing-history store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to begin a view or transaction, read, write, or
    /// commit.
    #[error("storage backend failure")]
    Backend(#[source] BackendError),

    /// A stored record failed to decode.
    #[error("corrupt {what} record: {reason}")]
    Corrupt { what: &'static str, reason: String },

    /// The genesis validators root is set-once and a different value is
    /// already stored.
    #[error("genesis validators root is already set to a different value")]
    GenesisRootConflict,

    /// The database was written by a newer schema than this build
    /// understands.
    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u64, supported: u64 },
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}
