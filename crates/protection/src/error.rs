use thiserror::Error;

use slashguard_interchange::InterchangeError;
use slashguard_storage::StoreError;
use slashguard_types::PublicKey;

/// Errors raised by the protection façade.
///
/// The signing-decision paths never surface these: they collapse every error
/// to a refused signature plus a structured log record.
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// Sign request for a key absent from the registry. Registration policy
    /// belongs to the signing service; the engine never auto-registers.
    #[error("unregistered validator {0}")]
    UnregisteredValidator(PublicKey),

    /// The caller-supplied deadline expired; the in-flight transaction was
    /// aborted.
    #[error("signing decision deadline expired")]
    DeadlineExpired,

    /// Slashing protection is disabled by configuration; the engine must not
    /// be instantiated.
    #[error("slashing protection is disabled by configuration")]
    Disabled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Interchange(#[from] InterchangeError),
}

impl ProtectionError {
    /// Transient storage faults are worth a bounded retry; everything else
    /// is final.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Backend(_)))
    }
}
