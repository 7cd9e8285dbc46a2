use std::sync::Arc;

use ethereum_types::H256;
use tracing::debug;

use slashguard_types::{Epoch, PublicKey, SigningRoot, Slot, ValidatorId};

use crate::api::{StorageBackend, StorageReadView, StorageTransaction, Table};
use crate::backend::InMemoryBackend;
use crate::error::StoreError;
use crate::migrations;

// ============ Metadata Keys ============

/// Key for the chain's genesis validators root. 32 raw bytes, set-once.
const KEY_GENESIS_VALIDATORS_ROOT: &[u8] = b"genesis_validators_root";
/// Key for the next validator id to assign. Ids are dense and start at 1.
const KEY_NEXT_VALIDATOR_ID: &[u8] = b"next_validator_id";

// ============ Key & Value Encoding Helpers ============

pub(crate) fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub(crate) fn decode_u64(bytes: &[u8], what: &'static str) -> Result<u64, StoreError> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt {
        what,
        reason: format!("expected 8 bytes, got {}", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(array))
}

/// Encode a (validator_id, slot-or-epoch) composite key.
/// Layout: validator_id (8 bytes big-endian) || point (8 bytes big-endian).
/// Big-endian ensures lexicographic ordering matches numeric ordering.
fn encode_record_key(validator_id: ValidatorId, point: u64) -> Vec<u8> {
    let mut key = validator_id.to_be_bytes().to_vec();
    key.extend_from_slice(&point.to_be_bytes());
    key
}

/// Decode a (validator_id, slot-or-epoch) composite key.
fn decode_record_key(bytes: &[u8], what: &'static str) -> Result<(ValidatorId, u64), StoreError> {
    if bytes.len() != 16 {
        return Err(StoreError::Corrupt {
            what,
            reason: format!("expected 16-byte key, got {}", bytes.len()),
        });
    }
    Ok((decode_u64(&bytes[..8], what)?, decode_u64(&bytes[8..], what)?))
}

/// Empty root bytes mark a record imported without a signing root; such a
/// record can never match a concrete root.
fn decode_root_bytes(bytes: &[u8]) -> Option<SigningRoot> {
    if bytes.is_empty() {
        None
    } else {
        Some(SigningRoot::from(bytes))
    }
}

fn encode_root_bytes(root: Option<&SigningRoot>) -> Vec<u8> {
    root.map(|r| r.as_bytes().to_vec()).unwrap_or_default()
}

/// Encode an attestation value: source epoch (8 bytes big-endian) || root.
fn encode_attestation_value(source_epoch: Epoch, signing_root: Option<&SigningRoot>) -> Vec<u8> {
    let mut value = source_epoch.to_be_bytes().to_vec();
    value.extend_from_slice(&encode_root_bytes(signing_root));
    value
}

fn decode_attestation_value(bytes: &[u8]) -> Result<(Epoch, Option<SigningRoot>), StoreError> {
    if bytes.len() < 8 {
        return Err(StoreError::Corrupt {
            what: "signed attestation",
            reason: format!("value shorter than 8 bytes: {}", bytes.len()),
        });
    }
    let source_epoch = decode_u64(&bytes[..8], "signed attestation")?;
    Ok((source_epoch, decode_root_bytes(&bytes[8..])))
}

// ============ Records ============

/// A block proposal sanctioned by the engine or loaded from an interchange
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlockRecord {
    pub validator_id: ValidatorId,
    pub slot: Slot,
    /// Absent on records imported without a root.
    pub signing_root: Option<SigningRoot>,
}

/// An attestation sanctioned by the engine or loaded from an interchange
/// file. Invariant: `source_epoch <= target_epoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAttestationRecord {
    pub validator_id: ValidatorId,
    pub source_epoch: Epoch,
    pub target_epoch: Epoch,
    pub signing_root: Option<SigningRoot>,
}

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same natural key and the same signing root exists.
    DuplicateIdentical,
    /// A record with the same natural key and a different signing root
    /// exists.
    DuplicateConflicting,
}

/// Minimum acceptable attestation epochs for a validator, raised by
/// interchange import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestationWatermark {
    pub source_epoch: Epoch,
    pub target_epoch: Epoch,
}

// ============ Store ============

/// Slashing-history store backed by a pluggable storage backend.
///
/// The Store persists everything a signing decision consults:
///
/// - **Validators**: public key <-> dense internal id, append-only
/// - **Signed blocks**: one record per (validator, slot)
/// - **Signed attestations**: one record per (validator, target epoch)
/// - **Watermarks**: per-validator floors raised by interchange import
/// - **Metadata**: genesis validators root, id counter, schema version
///
/// Every operation takes an explicit view or transaction handle so callers
/// control the transaction boundary; the decision engine runs detection
/// queries and the conditional insert of one decision in a single
/// transaction.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StorageBackend>,
}

impl Store {
    /// Open a store over the given backend, applying schema migrations.
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        let store = Self { backend };
        migrations::migrate(&store)?;
        Ok(store)
    }

    /// Open a fresh in-memory store. History is lost on drop.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(Arc::new(InMemoryBackend::new()))
    }

    /// Begin a read-only view over a consistent snapshot.
    pub fn read(&self) -> Result<Box<dyn StorageReadView + '_>, StoreError> {
        self.backend.begin_read().map_err(StoreError::Backend)
    }

    /// Begin an exclusive read-modify-write transaction. Dropping it without
    /// commit rolls back.
    pub fn transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, StoreError> {
        self.backend
            .begin_transaction()
            .map_err(StoreError::Backend)
    }

    // ============ Validators ============

    /// Insert any keys not already present and return the id mapping for the
    /// full input set. Ids are dense, ascending, and never reused.
    pub fn register_validators(
        &self,
        txn: &mut dyn StorageTransaction,
        keys: &[PublicKey],
    ) -> Result<Vec<(PublicKey, ValidatorId)>, StoreError> {
        let mut next_id = match txn.get(Table::Metadata, KEY_NEXT_VALIDATOR_ID)? {
            Some(bytes) => decode_u64(&bytes, "next validator id")?,
            None => 1,
        };
        let first_unassigned = next_id;

        let mut mapping = Vec::with_capacity(keys.len());
        for key in keys {
            let id = match txn.get(Table::Validators, key.as_bytes())? {
                Some(bytes) => decode_u64(&bytes, "validator id")?,
                None => {
                    let id = next_id;
                    next_id += 1;
                    txn.put(Table::Validators, key.as_bytes().to_vec(), encode_u64(id))?;
                    txn.put(Table::ValidatorKeys, encode_u64(id), key.as_bytes().to_vec())?;
                    debug!(public_key = %key, id, "Registered validator");
                    id
                }
            };
            mapping.push((key.clone(), id));
        }

        if next_id != first_unassigned {
            txn.put(
                Table::Metadata,
                KEY_NEXT_VALIDATOR_ID.to_vec(),
                encode_u64(next_id),
            )?;
        }
        Ok(mapping)
    }

    /// Return the id mapping for those input keys that are registered.
    pub fn lookup_validators(
        &self,
        view: &dyn StorageReadView,
        keys: &[PublicKey],
    ) -> Result<Vec<(PublicKey, ValidatorId)>, StoreError> {
        let mut mapping = Vec::new();
        for key in keys {
            if let Some(bytes) = view.get(Table::Validators, key.as_bytes())? {
                mapping.push((key.clone(), decode_u64(&bytes, "validator id")?));
            }
        }
        Ok(mapping)
    }

    /// Iterate all registered validators in ascending-id order.
    pub fn iter_validators<'v>(
        &self,
        view: &'v dyn StorageReadView,
    ) -> Result<Box<dyn Iterator<Item = Result<(ValidatorId, PublicKey), StoreError>> + 'v>, StoreError>
    {
        let iter = view.iter_from(Table::ValidatorKeys, &[])?;
        Ok(Box::new(iter.map(|result| {
            let (key, value) = result.map_err(StoreError::Backend)?;
            let id = decode_u64(&key, "validator id")?;
            Ok((id, PublicKey::new(value.into_vec())))
        })))
    }

    // ============ Signed Blocks ============

    pub fn find_existing_block(
        &self,
        view: &dyn StorageReadView,
        validator_id: ValidatorId,
        slot: Slot,
    ) -> Result<Option<SignedBlockRecord>, StoreError> {
        Ok(view
            .get(Table::SignedBlocks, &encode_record_key(validator_id, slot))?
            .map(|value| SignedBlockRecord {
                validator_id,
                slot,
                signing_root: decode_root_bytes(&value),
            }))
    }

    /// Conditionally insert a block record. The (validator, slot) pair is
    /// unique; an existing record is never overwritten.
    pub fn insert_block(
        &self,
        txn: &mut dyn StorageTransaction,
        record: &SignedBlockRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let key = encode_record_key(record.validator_id, record.slot);
        if let Some(existing) = txn.get(Table::SignedBlocks, &key)? {
            let existing_root = decode_root_bytes(&existing);
            return Ok(if existing_root == record.signing_root {
                InsertOutcome::DuplicateIdentical
            } else {
                InsertOutcome::DuplicateConflicting
            });
        }
        txn.put(
            Table::SignedBlocks,
            key,
            encode_root_bytes(record.signing_root.as_ref()),
        )?;
        Ok(InsertOutcome::Inserted)
    }

    /// Iterate a validator's signed blocks in ascending-slot order.
    pub fn iter_blocks<'v>(
        &self,
        view: &'v dyn StorageReadView,
        validator_id: ValidatorId,
    ) -> Result<Box<dyn Iterator<Item = Result<SignedBlockRecord, StoreError>> + 'v>, StoreError>
    {
        let prefix = validator_id.to_be_bytes();
        let iter = view.iter_from(Table::SignedBlocks, &prefix)?;
        Ok(Box::new(
            iter.take_while(move |result| match result {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true, // propagate errors
            })
            .map(|result| {
                let (key, value) = result.map_err(StoreError::Backend)?;
                let (validator_id, slot) = decode_record_key(&key, "signed block")?;
                Ok(SignedBlockRecord {
                    validator_id,
                    slot,
                    signing_root: decode_root_bytes(&value),
                })
            }),
        ))
    }

    /// Total number of signed-block records across all validators.
    pub fn count_blocks(&self, view: &dyn StorageReadView) -> Result<u64, StoreError> {
        count_table(view, Table::SignedBlocks)
    }

    // ============ Signed Attestations ============

    pub fn find_existing_attestation(
        &self,
        view: &dyn StorageReadView,
        validator_id: ValidatorId,
        target_epoch: Epoch,
    ) -> Result<Option<SignedAttestationRecord>, StoreError> {
        match view.get(
            Table::SignedAttestations,
            &encode_record_key(validator_id, target_epoch),
        )? {
            Some(value) => {
                let (source_epoch, signing_root) = decode_attestation_value(&value)?;
                Ok(Some(SignedAttestationRecord {
                    validator_id,
                    source_epoch,
                    target_epoch,
                    signing_root,
                }))
            }
            None => Ok(None),
        }
    }

    /// Returns any stored attestation that surrounds `(source, target)`:
    /// `stored.source < source && target < stored.target`.
    ///
    /// A single range scan over targets above `target`; the big-endian key
    /// layout makes this an indexed range predicate.
    pub fn find_surrounding_attestation(
        &self,
        view: &dyn StorageReadView,
        validator_id: ValidatorId,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<Option<SignedAttestationRecord>, StoreError> {
        let Some(first_target) = target_epoch.checked_add(1) else {
            return Ok(None);
        };
        let prefix = validator_id.to_be_bytes();
        let iter = view.iter_from(
            Table::SignedAttestations,
            &encode_record_key(validator_id, first_target),
        )?;
        for result in iter {
            let (key, value) = result.map_err(StoreError::Backend)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (_, stored_target) = decode_record_key(&key, "signed attestation")?;
            let (stored_source, signing_root) = decode_attestation_value(&value)?;
            if stored_source < source_epoch {
                return Ok(Some(SignedAttestationRecord {
                    validator_id,
                    source_epoch: stored_source,
                    target_epoch: stored_target,
                    signing_root,
                }));
            }
        }
        Ok(None)
    }

    /// Returns any stored attestation that `(source, target)` would surround:
    /// `source < stored.source && stored.target < target`.
    pub fn find_surrounded_attestation(
        &self,
        view: &dyn StorageReadView,
        validator_id: ValidatorId,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<Option<SignedAttestationRecord>, StoreError> {
        let prefix = validator_id.to_be_bytes();
        let iter = view.iter_from(
            Table::SignedAttestations,
            &encode_record_key(validator_id, 0),
        )?;
        for result in iter {
            let (key, value) = result.map_err(StoreError::Backend)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (_, stored_target) = decode_record_key(&key, "signed attestation")?;
            if stored_target >= target_epoch {
                break;
            }
            let (stored_source, signing_root) = decode_attestation_value(&value)?;
            if stored_source > source_epoch {
                return Ok(Some(SignedAttestationRecord {
                    validator_id,
                    source_epoch: stored_source,
                    target_epoch: stored_target,
                    signing_root,
                }));
            }
        }
        Ok(None)
    }

    /// Conditionally insert an attestation record. The (validator, target)
    /// pair is unique; an existing record is never overwritten.
    pub fn insert_attestation(
        &self,
        txn: &mut dyn StorageTransaction,
        record: &SignedAttestationRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let key = encode_record_key(record.validator_id, record.target_epoch);
        if let Some(existing) = txn.get(Table::SignedAttestations, &key)? {
            let (_, existing_root) = decode_attestation_value(&existing)?;
            return Ok(if existing_root == record.signing_root {
                InsertOutcome::DuplicateIdentical
            } else {
                InsertOutcome::DuplicateConflicting
            });
        }
        txn.put(
            Table::SignedAttestations,
            key,
            encode_attestation_value(record.source_epoch, record.signing_root.as_ref()),
        )?;
        Ok(InsertOutcome::Inserted)
    }

    /// Iterate a validator's attestations in ascending-target order.
    pub fn iter_attestations<'v>(
        &self,
        view: &'v dyn StorageReadView,
        validator_id: ValidatorId,
    ) -> Result<Box<dyn Iterator<Item = Result<SignedAttestationRecord, StoreError>> + 'v>, StoreError>
    {
        let prefix = validator_id.to_be_bytes();
        let iter = view.iter_from(Table::SignedAttestations, &prefix)?;
        Ok(Box::new(
            iter.take_while(move |result| match result {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true, // propagate errors
            })
            .map(|result| {
                let (key, value) = result.map_err(StoreError::Backend)?;
                let (validator_id, target_epoch) = decode_record_key(&key, "signed attestation")?;
                let (source_epoch, signing_root) = decode_attestation_value(&value)?;
                Ok(SignedAttestationRecord {
                    validator_id,
                    source_epoch,
                    target_epoch,
                    signing_root,
                })
            }),
        ))
    }

    /// Total number of signed-attestation records across all validators.
    pub fn count_attestations(&self, view: &dyn StorageReadView) -> Result<u64, StoreError> {
        count_table(view, Table::SignedAttestations)
    }

    // ============ Watermarks ============

    /// Minimum acceptable proposal slot for a validator, if an import set
    /// one.
    pub fn proposal_watermark(
        &self,
        view: &dyn StorageReadView,
        validator_id: ValidatorId,
    ) -> Result<Option<Slot>, StoreError> {
        view.get(Table::ProposalWatermarks, &encode_u64(validator_id))?
            .map(|bytes| decode_u64(&bytes, "proposal watermark"))
            .transpose()
    }

    /// Raise the proposal watermark to `slot`. Watermarks are never lowered.
    pub fn raise_proposal_watermark(
        &self,
        txn: &mut dyn StorageTransaction,
        validator_id: ValidatorId,
        slot: Slot,
    ) -> Result<(), StoreError> {
        let current = self.proposal_watermark(&*txn, validator_id)?;
        if current.is_none_or(|existing| slot > existing) {
            txn.put(
                Table::ProposalWatermarks,
                encode_u64(validator_id),
                encode_u64(slot),
            )?;
        }
        Ok(())
    }

    /// Minimum acceptable attestation epochs for a validator, if an import
    /// set them.
    pub fn attestation_watermark(
        &self,
        view: &dyn StorageReadView,
        validator_id: ValidatorId,
    ) -> Result<Option<AttestationWatermark>, StoreError> {
        match view.get(Table::AttestationWatermarks, &encode_u64(validator_id))? {
            Some(bytes) if bytes.len() == 16 => Ok(Some(AttestationWatermark {
                source_epoch: decode_u64(&bytes[..8], "attestation watermark")?,
                target_epoch: decode_u64(&bytes[8..], "attestation watermark")?,
            })),
            Some(bytes) => Err(StoreError::Corrupt {
                what: "attestation watermark",
                reason: format!("expected 16 bytes, got {}", bytes.len()),
            }),
            None => Ok(None),
        }
    }

    /// Raise the attestation watermark component-wise. Never lowered.
    pub fn raise_attestation_watermark(
        &self,
        txn: &mut dyn StorageTransaction,
        validator_id: ValidatorId,
        source_epoch: Epoch,
        target_epoch: Epoch,
    ) -> Result<(), StoreError> {
        let current = self.attestation_watermark(&*txn, validator_id)?;
        let raised = match current {
            Some(watermark) => AttestationWatermark {
                source_epoch: watermark.source_epoch.max(source_epoch),
                target_epoch: watermark.target_epoch.max(target_epoch),
            },
            None => AttestationWatermark {
                source_epoch,
                target_epoch,
            },
        };
        if current != Some(raised) {
            let mut value = raised.source_epoch.to_be_bytes().to_vec();
            value.extend_from_slice(&raised.target_epoch.to_be_bytes());
            txn.put(Table::AttestationWatermarks, encode_u64(validator_id), value)?;
        }
        Ok(())
    }

    // ============ Metadata ============

    pub fn genesis_validators_root(
        &self,
        view: &dyn StorageReadView,
    ) -> Result<Option<H256>, StoreError> {
        match view.get(Table::Metadata, KEY_GENESIS_VALIDATORS_ROOT)? {
            Some(bytes) if bytes.len() == 32 => Ok(Some(H256::from_slice(&bytes))),
            Some(bytes) => Err(StoreError::Corrupt {
                what: "genesis validators root",
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            }),
            None => Ok(None),
        }
    }

    /// Set-once: storing the same value again is a no-op, a different value
    /// fails with [`StoreError::GenesisRootConflict`].
    pub fn set_genesis_validators_root(
        &self,
        txn: &mut dyn StorageTransaction,
        root: H256,
    ) -> Result<(), StoreError> {
        match self.genesis_validators_root(&*txn)? {
            Some(existing) if existing == root => Ok(()),
            Some(_) => Err(StoreError::GenesisRootConflict),
            None => {
                txn.put(
                    Table::Metadata,
                    KEY_GENESIS_VALIDATORS_ROOT.to_vec(),
                    root.as_bytes().to_vec(),
                )?;
                Ok(())
            }
        }
    }
}

fn count_table(view: &dyn StorageReadView, table: Table) -> Result<u64, StoreError> {
    let mut count = 0;
    for result in view.iter_from(table, &[])? {
        result.map_err(StoreError::Backend)?;
        count += 1;
    }
    Ok(count)
}
