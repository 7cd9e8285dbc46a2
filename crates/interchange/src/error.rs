use thiserror::Error;

use slashguard_storage::StoreError;

/// Errors raised by interchange import and export.
///
/// Import errors roll the whole operation back; the store is left exactly as
/// it was before the import began.
#[derive(Debug, Error)]
pub enum InterchangeError {
    /// Only `interchange_format_version` `"5"` is supported.
    #[error("unsupported interchange format version {0:?}")]
    UnsupportedVersion(String),

    /// The document is structurally invalid.
    #[error("malformed interchange: {0}")]
    Malformed(String),

    /// The import collides with existing history on a different signing root
    /// or would create a surround pair.
    #[error("interchange conflicts with existing history: {0}")]
    Conflict(String),

    /// Export requires the genesis validators root to be set.
    #[error("no genesis validators root for slashing protection data")]
    MissingGenesisRoot,

    /// The file's genesis validators root differs from the stored one.
    #[error("interchange genesis validators root does not match the stored root")]
    GenesisRootMismatch,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("interchange I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("interchange serialization failure: {0}")]
    Json(#[from] serde_json::Error),
}
