use std::io::{Read, Write};
use std::time::Instant;

use tracing::{info, warn};

use slashguard_storage::{InsertOutcome, SignedAttestationRecord, SignedBlockRecord, Store, StoreError};
use slashguard_types::{Epoch, PublicKey, SigningRoot, Slot, ValidatorId};

use crate::config::Config;
use crate::error::ProtectionError;
use crate::metrics::{KIND_ATTESTATION, KIND_BLOCK, record_decision};
use crate::registry::ValidatorRegistry;

/// Transient storage faults are retried this many times before the decision
/// fails closed.
const MAX_TXN_ATTEMPTS: u32 = 3;

/// The slashing protection engine.
///
/// Each `may_sign_*` call runs its detection queries and, when permitted,
/// the insertion of the new record inside one exclusive store transaction,
/// so two concurrent requests for the same (validator, slot) or
/// (validator, target epoch) serialize: exactly one inserts, the other sees
/// its record.
///
/// Sign decisions return a plain boolean and never raise: unknown
/// validators, malformed epochs, storage failures, and expired deadlines all
/// refuse the signature and leave a WARN record with the offending inputs.
pub struct SlashingProtection {
    store: Store,
    registry: ValidatorRegistry,
}

impl SlashingProtection {
    /// Open the engine per configuration.
    ///
    /// Fails with [`ProtectionError::Disabled`] when
    /// `slashing_protection_enabled` is false: the signing service must not
    /// request decisions from a disabled engine.
    pub fn open(config: &Config) -> Result<Self, ProtectionError> {
        if !config.slashing_protection_enabled {
            return Err(ProtectionError::Disabled);
        }
        let store = Store::open(config.open_backend()?)?;
        Self::new(store)
    }

    /// Wire the engine over an existing store, loading the registry from it.
    pub fn new(store: Store) -> Result<Self, ProtectionError> {
        let registry = ValidatorRegistry::load(&store)?;
        info!(validators = registry.len(), "Slashing protection engine ready");
        Ok(Self { store, registry })
    }

    /// The underlying store. Exposed for interchange tooling and tests.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register validator keys, persisting any unknown ones. Idempotent:
    /// known keys keep their existing id.
    pub fn register_validators(&self, public_keys: &[PublicKey]) -> Result<(), ProtectionError> {
        let mut txn = self.store.transaction()?;
        let mapping = self.store.register_validators(&mut *txn, public_keys)?;
        txn.commit().map_err(StoreError::Backend)?;
        self.registry.absorb(&mapping);
        Ok(())
    }

    /// Decide whether signing a block proposal at `slot` is safe, recording
    /// it if so.
    pub fn may_sign_block(
        &self,
        public_key: &PublicKey,
        signing_root: &SigningRoot,
        slot: Slot,
    ) -> bool {
        self.may_sign_block_with_deadline(public_key, signing_root, slot, None)
    }

    /// As [`Self::may_sign_block`], refusing once `deadline` has passed.
    pub fn may_sign_block_with_deadline(
        &self,
        public_key: &PublicKey,
        signing_root: &SigningRoot,
        slot: Slot,
        deadline: Option<Instant>,
    ) -> bool {
        let permitted = self
            .with_retries(|| self.try_sign_block(public_key, signing_root, slot, deadline))
            .unwrap_or_else(|err| {
                warn!(%public_key, slot, %err, "Refusing block proposal signature");
                false
            });
        record_decision(KIND_BLOCK, permitted);
        permitted
    }

    /// Decide whether signing an attestation voting `source -> target` is
    /// safe, recording it if so.
    pub fn may_sign_attestation(
        &self,
        public_key: &PublicKey,
        signing_root: &SigningRoot,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> bool {
        self.may_sign_attestation_with_deadline(public_key, signing_root, source_epoch, target_epoch, None)
    }

    /// As [`Self::may_sign_attestation`], refusing once `deadline` has
    /// passed.
    pub fn may_sign_attestation_with_deadline(
        &self,
        public_key: &PublicKey,
        signing_root: &SigningRoot,
        source_epoch: Epoch,
        target_epoch: Epoch,
        deadline: Option<Instant>,
    ) -> bool {
        let permitted = self
            .with_retries(|| {
                self.try_sign_attestation(public_key, signing_root, source_epoch, target_epoch, deadline)
            })
            .unwrap_or_else(|err| {
                warn!(
                    %public_key,
                    source_epoch,
                    target_epoch,
                    %err,
                    "Refusing attestation signature"
                );
                false
            });
        record_decision(KIND_ATTESTATION, permitted);
        permitted
    }

    /// Merge an EIP-3076 interchange document into the store and refresh the
    /// registry with any validators it introduced.
    pub fn import_interchange<R: Read>(&self, reader: R) -> Result<(), ProtectionError> {
        let registered = slashguard_interchange::import(&self.store, reader)?;
        self.registry.absorb(&registered);
        Ok(())
    }

    /// Export the store's full history as an EIP-3076 interchange document.
    pub fn export_interchange<W: Write>(&self, writer: W) -> Result<(), ProtectionError> {
        slashguard_interchange::export(&self.store, writer)?;
        Ok(())
    }

    fn with_retries(
        &self,
        mut attempt_once: impl FnMut() -> Result<bool, ProtectionError>,
    ) -> Result<bool, ProtectionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_once() {
                Err(err) if err.is_transient() && attempt < MAX_TXN_ATTEMPTS => {
                    warn!(attempt, %err, "Retrying signing decision after storage failure");
                }
                result => return result,
            }
        }
    }

    fn try_sign_block(
        &self,
        public_key: &PublicKey,
        signing_root: &SigningRoot,
        slot: Slot,
        deadline: Option<Instant>,
    ) -> Result<bool, ProtectionError> {
        let validator_id = self.resolve(public_key)?;
        check_deadline(deadline)?;

        let mut txn = self.store.transaction()?;

        if let Some(watermark) = self.store.proposal_watermark(&*txn, validator_id)?
            && slot < watermark
        {
            warn!(%public_key, slot, watermark, "Refusing block proposal below import watermark");
            return Ok(false);
        }

        if let Some(existing) = self.store.find_existing_block(&*txn, validator_id, slot)? {
            // Same slot and signing root is an idempotent rebroadcast of a
            // previously signed proposal.
            if existing.signing_root.as_ref() == Some(signing_root) {
                return Ok(true);
            }
            warn!(%public_key, slot, ?existing, "Detected double signed block");
            return Ok(false);
        }

        check_deadline(deadline)?;
        let record = SignedBlockRecord {
            validator_id,
            slot,
            signing_root: Some(signing_root.clone()),
        };
        match self.store.insert_block(&mut *txn, &record)? {
            InsertOutcome::Inserted | InsertOutcome::DuplicateIdentical => {}
            InsertOutcome::DuplicateConflicting => {
                // Lost race with a concurrent writer.
                warn!(%public_key, slot, "Conflicting block appeared during decision");
                return Ok(false);
            }
        }
        txn.commit().map_err(StoreError::Backend)?;
        Ok(true)
    }

    fn try_sign_attestation(
        &self,
        public_key: &PublicKey,
        signing_root: &SigningRoot,
        source_epoch: Epoch,
        target_epoch: Epoch,
        deadline: Option<Instant>,
    ) -> Result<bool, ProtectionError> {
        let validator_id = self.resolve(public_key)?;

        if source_epoch > target_epoch {
            warn!(
                %public_key,
                source_epoch,
                target_epoch,
                "Refusing attestation with source epoch greater than target epoch"
            );
            return Ok(false);
        }
        check_deadline(deadline)?;

        let mut txn = self.store.transaction()?;

        if let Some(watermark) = self.store.attestation_watermark(&*txn, validator_id)?
            && (source_epoch < watermark.source_epoch || target_epoch < watermark.target_epoch)
        {
            warn!(
                %public_key,
                source_epoch,
                target_epoch,
                watermark_source = watermark.source_epoch,
                watermark_target = watermark.target_epoch,
                "Refusing attestation below import watermark"
            );
            return Ok(false);
        }

        // The same-target check must come first: a benign rebroadcast would
        // otherwise be flagged by the surround queries below.
        if let Some(existing) =
            self.store
                .find_existing_attestation(&*txn, validator_id, target_epoch)?
        {
            if existing.signing_root.as_ref() == Some(signing_root) {
                return Ok(true);
            }
            warn!(%public_key, target_epoch, ?existing, "Detected double signed attestation");
            return Ok(false);
        }

        if let Some(surrounding) = self.store.find_surrounding_attestation(
            &*txn,
            validator_id,
            source_epoch,
            target_epoch,
        )? {
            warn!(
                %public_key,
                source_epoch,
                target_epoch,
                ?surrounding,
                "Detected surrounding attestation"
            );
            return Ok(false);
        }
        if let Some(surrounded) = self.store.find_surrounded_attestation(
            &*txn,
            validator_id,
            source_epoch,
            target_epoch,
        )? {
            warn!(
                %public_key,
                source_epoch,
                target_epoch,
                ?surrounded,
                "Detected surrounded attestation"
            );
            return Ok(false);
        }

        check_deadline(deadline)?;
        let record = SignedAttestationRecord {
            validator_id,
            source_epoch,
            target_epoch,
            signing_root: Some(signing_root.clone()),
        };
        match self.store.insert_attestation(&mut *txn, &record)? {
            InsertOutcome::Inserted | InsertOutcome::DuplicateIdentical => {}
            InsertOutcome::DuplicateConflicting => {
                warn!(%public_key, target_epoch, "Conflicting attestation appeared during decision");
                return Ok(false);
            }
        }
        txn.commit().map_err(StoreError::Backend)?;
        Ok(true)
    }

    fn resolve(&self, public_key: &PublicKey) -> Result<ValidatorId, ProtectionError> {
        self.registry
            .lookup(public_key)
            .ok_or_else(|| ProtectionError::UnregisteredValidator(public_key.clone()))
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), ProtectionError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ProtectionError::DeadlineExpired),
        _ => Ok(()),
    }
}
