//! Streaming codec for the EIP-3076 v5 slashing-protection interchange
//! format.
//!
//! Both directions operate record-by-record: export walks the store under a
//! single snapshot and writes one validator entry at a time; import drives a
//! streaming JSON parser and applies each entry inside one transaction, so a
//! file covering tens of thousands of validators is never materialized in
//! memory and a failed import leaves the store untouched.

mod error;
mod export;
mod format;
mod import;

pub use error::InterchangeError;
pub use export::export;
pub use format::{
    AttestationRecord, BlockRecord, INTERCHANGE_FORMAT_VERSION, Metadata, ValidatorHistory,
};
pub use import::import;
