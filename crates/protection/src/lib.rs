//! Slashing protection for an Ethereum-2 remote signing service.
//!
//! The engine decides, per signing request, whether granting the signature
//! could expose the validator to a slashing penalty: a second block for an
//! already-signed slot, a second attestation for an already-voted target
//! epoch, or an attestation that surrounds (or is surrounded by) a previous
//! vote. Every permitted signature is persisted in the same transaction as
//! the decision, so no later decision can contradict an earlier one, even
//! across restarts.
//!
//! Decisions fail closed: any doubt (unknown validator, storage failure,
//! expired deadline) refuses the signature.

mod config;
mod engine;
mod error;
mod metrics;
mod registry;

pub use config::Config;
pub use engine::SlashingProtection;
pub use error::ProtectionError;
pub use registry::ValidatorRegistry;

pub use slashguard_interchange::InterchangeError;
