mod api;
pub mod backend;
mod error;
mod migrations;
mod store;

pub use api::{BackendError, KvResult, StorageBackend, StorageReadView, StorageTransaction, Table};
pub use error::StoreError;
pub use migrations::SCHEMA_VERSION;
pub use store::{
    AttestationWatermark, InsertOutcome, SignedAttestationRecord, SignedBlockRecord, Store,
};
