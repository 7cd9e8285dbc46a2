use std::io::Read;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use tracing::info;

use slashguard_storage::{
    InsertOutcome, SignedAttestationRecord, SignedBlockRecord, StorageTransaction, Store,
    StoreError,
};
use slashguard_types::{Epoch, PublicKey, Slot, ValidatorId};

use crate::error::InterchangeError;
use crate::format::{INTERCHANGE_FORMAT_VERSION, Metadata, ValidatorHistory};

/// Read an EIP-3076 v5 document and merge it into the store.
///
/// The stream is parsed incrementally: one validator entry is materialized at
/// a time and applied inside a single transaction. On any failure the
/// transaction is dropped and the store is left exactly as it was.
///
/// Returns the (public key, id) mapping of every validator named by the file
/// so the caller can refresh its in-memory registry.
pub fn import<R: Read>(
    store: &Store,
    reader: R,
) -> Result<Vec<(PublicKey, ValidatorId)>, InterchangeError> {
    let mut txn = store.transaction()?;

    let registered;
    {
        let mut session = ImportSession {
            store,
            txn: &mut *txn,
            registered: Vec::new(),
            metadata_applied: false,
            failure: None,
        };

        let mut de = serde_json::Deserializer::from_reader(reader);
        let parsed = DocumentSeed {
            session: &mut session,
        }
        .deserialize(&mut de)
        .and_then(|()| de.end());

        if let Err(err) = parsed {
            // A stashed failure is the real cause; the serde error is just
            // the abort it rode out on.
            return Err(session
                .failure
                .take()
                .unwrap_or_else(|| InterchangeError::Malformed(err.to_string())));
        }

        registered = session.registered;
    }

    txn.commit().map_err(StoreError::Backend)?;
    info!(
        validators = registered.len(),
        "Imported slashing protection history"
    );
    Ok(registered)
}

/// Mutable import state threaded through the streaming parser.
struct ImportSession<'a> {
    store: &'a Store,
    txn: &'a mut dyn StorageTransaction,
    registered: Vec<(PublicKey, ValidatorId)>,
    metadata_applied: bool,
    failure: Option<InterchangeError>,
}

impl ImportSession<'_> {
    /// Stash the domain failure and produce the serde error that aborts
    /// parsing.
    fn abort<E: de::Error>(&mut self, failure: InterchangeError) -> E {
        self.failure = Some(failure);
        E::custom("import aborted")
    }

    fn apply_metadata(&mut self, metadata: &Metadata) -> Result<(), InterchangeError> {
        if metadata.interchange_format_version != INTERCHANGE_FORMAT_VERSION {
            return Err(InterchangeError::UnsupportedVersion(
                metadata.interchange_format_version.clone(),
            ));
        }

        match self.store.genesis_validators_root(&*self.txn)? {
            Some(existing) if existing != metadata.genesis_validators_root => {
                return Err(InterchangeError::GenesisRootMismatch);
            }
            Some(_) => {}
            None => self
                .store
                .set_genesis_validators_root(&mut *self.txn, metadata.genesis_validators_root)?,
        }

        self.metadata_applied = true;
        Ok(())
    }

    fn apply_entry(&mut self, entry: ValidatorHistory) -> Result<(), InterchangeError> {
        let pubkey = entry.pubkey;
        let mut mapping = self
            .store
            .register_validators(&mut *self.txn, std::slice::from_ref(&pubkey))?;
        let (_, validator_id) = mapping.pop().ok_or_else(|| {
            InterchangeError::Malformed("validator registration returned no mapping".into())
        })?;
        self.registered.push((pubkey.clone(), validator_id));

        let mut max_slot: Option<Slot> = None;
        for block in entry.signed_blocks {
            let record = SignedBlockRecord {
                validator_id,
                slot: block.slot,
                signing_root: block.signing_root,
            };
            match self.store.insert_block(&mut *self.txn, &record)? {
                InsertOutcome::Inserted | InsertOutcome::DuplicateIdentical => {}
                InsertOutcome::DuplicateConflicting => {
                    return Err(InterchangeError::Conflict(format!(
                        "block at slot {} for {pubkey} has a different signing root",
                        block.slot
                    )));
                }
            }
            max_slot = Some(max_slot.map_or(block.slot, |max| max.max(block.slot)));
        }

        let mut max_source: Option<Epoch> = None;
        let mut max_target: Option<Epoch> = None;
        for attestation in entry.signed_attestations {
            if attestation.source_epoch > attestation.target_epoch {
                return Err(InterchangeError::Malformed(format!(
                    "attestation source epoch {} exceeds target epoch {} for {pubkey}",
                    attestation.source_epoch, attestation.target_epoch
                )));
            }

            max_source =
                Some(max_source.map_or(attestation.source_epoch, |m| m.max(attestation.source_epoch)));
            max_target =
                Some(max_target.map_or(attestation.target_epoch, |m| m.max(attestation.target_epoch)));

            if let Some(existing) = self.store.find_existing_attestation(
                &*self.txn,
                validator_id,
                attestation.target_epoch,
            )? {
                if existing.signing_root == attestation.signing_root {
                    continue;
                }
                return Err(InterchangeError::Conflict(format!(
                    "attestation at target epoch {} for {pubkey} has a different signing root",
                    attestation.target_epoch
                )));
            }

            if let Some(surrounding) = self.store.find_surrounding_attestation(
                &*self.txn,
                validator_id,
                attestation.source_epoch,
                attestation.target_epoch,
            )? {
                return Err(InterchangeError::Conflict(format!(
                    "attestation ({}, {}) for {pubkey} is surrounded by existing ({}, {})",
                    attestation.source_epoch,
                    attestation.target_epoch,
                    surrounding.source_epoch,
                    surrounding.target_epoch
                )));
            }
            if let Some(surrounded) = self.store.find_surrounded_attestation(
                &*self.txn,
                validator_id,
                attestation.source_epoch,
                attestation.target_epoch,
            )? {
                return Err(InterchangeError::Conflict(format!(
                    "attestation ({}, {}) for {pubkey} surrounds existing ({}, {})",
                    attestation.source_epoch,
                    attestation.target_epoch,
                    surrounded.source_epoch,
                    surrounded.target_epoch
                )));
            }

            let record = SignedAttestationRecord {
                validator_id,
                source_epoch: attestation.source_epoch,
                target_epoch: attestation.target_epoch,
                signing_root: attestation.signing_root,
            };
            self.store.insert_attestation(&mut *self.txn, &record)?;
        }

        // Raise the low-watermarks to the maxima the file declared, so sign
        // requests below them stay refused even if this database is later
        // restored from a stale copy of the records themselves.
        if let Some(slot) = max_slot {
            self.store
                .raise_proposal_watermark(&mut *self.txn, validator_id, slot)?;
        }
        if let (Some(source_epoch), Some(target_epoch)) = (max_source, max_target) {
            self.store.raise_attestation_watermark(
                &mut *self.txn,
                validator_id,
                source_epoch,
                target_epoch,
            )?;
        }

        Ok(())
    }
}

/// Top-level document parser. Requires `metadata` to precede `data`: a
/// one-pass streaming reader cannot validate the genesis root after the data
/// has already been applied.
struct DocumentSeed<'s, 'a> {
    session: &'s mut ImportSession<'a>,
}

impl<'de> DeserializeSeed<'de> for DocumentSeed<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DocumentSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "an EIP-3076 interchange document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let mut seen_data = false;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "metadata" => {
                    let metadata: Metadata = map.next_value()?;
                    if let Err(err) = self.session.apply_metadata(&metadata) {
                        return Err(self.session.abort(err));
                    }
                }
                "data" => {
                    if !self.session.metadata_applied {
                        return Err(self.session.abort(InterchangeError::Malformed(
                            "the metadata object must precede the data array".into(),
                        )));
                    }
                    map.next_value_seed(DataSeed {
                        session: &mut *self.session,
                    })?;
                    seen_data = true;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        if !self.session.metadata_applied {
            return Err(self
                .session
                .abort(InterchangeError::Malformed("missing metadata".into())));
        }
        if !seen_data {
            return Err(self
                .session
                .abort(InterchangeError::Malformed("missing data".into())));
        }
        Ok(())
    }
}

/// Streams the `data` array, applying one validator entry at a time.
struct DataSeed<'s, 'a> {
    session: &'s mut ImportSession<'a>,
}

impl<'de> DeserializeSeed<'de> for DataSeed<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for DataSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "an array of validator histories")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(entry) = seq.next_element::<ValidatorHistory>()? {
            if let Err(err) = self.session.apply_entry(entry) {
                return Err(self.session.abort(err));
            }
        }
        Ok(())
    }
}
