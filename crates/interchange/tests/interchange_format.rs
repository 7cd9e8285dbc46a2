//! End-to-end interchange scenarios against an in-memory store.

use ethereum_types::H256;
use serde_json::Value;

use slashguard_interchange::{InterchangeError, export, import};
use slashguard_storage::{SignedAttestationRecord, SignedBlockRecord, Store};
use slashguard_types::{PublicKey, SigningRoot};

const GENESIS_VALIDATORS_ROOT: &str =
    "0x04700007fabc8282644aed6d1c7c9e21d38a03a0c4ba193f3afe428824b3a673";

fn genesis_root() -> H256 {
    H256::from_slice(&hex::decode(&GENESIS_VALIDATORS_ROOT[2..]).unwrap())
}

fn pk(byte: u8) -> PublicKey {
    PublicKey::new(vec![byte])
}

fn root(byte: u8) -> SigningRoot {
    SigningRoot::new(vec![byte])
}

/// Two validators, six blocks each at slots 0..5 with root 0x01, eight
/// attestations each with source == target == 0..7 and root 0x01.
fn seeded_store() -> Store {
    let store = Store::in_memory().unwrap();
    let mut txn = store.transaction().unwrap();
    store
        .set_genesis_validators_root(&mut *txn, genesis_root())
        .unwrap();
    store
        .register_validators(&mut *txn, &[pk(1), pk(2)])
        .unwrap();
    for validator_id in [1u64, 2] {
        for slot in 0..6 {
            store
                .insert_block(
                    &mut *txn,
                    &SignedBlockRecord {
                        validator_id,
                        slot,
                        signing_root: Some(root(0x01)),
                    },
                )
                .unwrap();
        }
        for epoch in 0..8 {
            store
                .insert_attestation(
                    &mut *txn,
                    &SignedAttestationRecord {
                        validator_id,
                        source_epoch: epoch,
                        target_epoch: epoch,
                        signing_root: Some(root(0x01)),
                    },
                )
                .unwrap();
        }
    }
    txn.commit().unwrap();
    store
}

fn export_bytes(store: &Store) -> Vec<u8> {
    let mut out = Vec::new();
    export(store, &mut out).unwrap();
    out
}

fn counts(store: &Store) -> (u64, u64) {
    let view = store.read().unwrap();
    (
        store.count_blocks(&*view).unwrap(),
        store.count_attestations(&*view).unwrap(),
    )
}

#[test]
fn export_without_genesis_root_fails_with_empty_output() {
    let store = Store::in_memory().unwrap();
    let mut out = Vec::new();

    let err = export(&store, &mut out).unwrap_err();
    assert!(matches!(err, InterchangeError::MissingGenesisRoot));
    assert_eq!(
        err.to_string(),
        "no genesis validators root for slashing protection data"
    );
    assert!(out.is_empty());
}

#[test]
fn export_matches_expected_document() {
    let store = seeded_store();
    let doc: Value = serde_json::from_slice(&export_bytes(&store)).unwrap();

    assert_eq!(doc["metadata"]["interchange_format_version"], "5");
    assert_eq!(
        doc["metadata"]["genesis_validators_root"],
        GENESIS_VALIDATORS_ROOT
    );

    let data = doc["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    for (index, entry) in data.iter().enumerate() {
        assert_eq!(entry["pubkey"], format!("0x{:02x}", index + 1));

        let blocks = entry["signed_blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 6);
        for (slot, block) in blocks.iter().enumerate() {
            assert_eq!(block["slot"], slot.to_string());
            assert_eq!(block["signing_root"], "0x01");
        }

        let attestations = entry["signed_attestations"].as_array().unwrap();
        assert_eq!(attestations.len(), 8);
        for (epoch, attestation) in attestations.iter().enumerate() {
            assert_eq!(attestation["source_epoch"], epoch.to_string());
            assert_eq!(attestation["target_epoch"], epoch.to_string());
            assert_eq!(attestation["signing_root"], "0x01");
        }
    }
}

#[test]
fn round_trip_reproduces_records_byte_identically() {
    let source = seeded_store();
    let exported = export_bytes(&source);

    let fresh = Store::in_memory().unwrap();
    let registered = import(&fresh, exported.as_slice()).unwrap();
    assert_eq!(registered, vec![(pk(1), 1), (pk(2), 2)]);
    assert_eq!(counts(&fresh), counts(&source));

    let re_exported = export_bytes(&fresh);
    assert_eq!(re_exported, exported);
}

#[test]
fn import_rejects_genesis_root_mismatch_without_changes() {
    let store = seeded_store();
    let before = counts(&store);

    let other_root = format!("0x{}", hex::encode([0x11u8; 32]));
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{other_root}"}},"data":[{{"pubkey":"0x03","signed_blocks":[{{"slot":"1","signing_root":"0x02"}}],"signed_attestations":[]}}]}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::GenesisRootMismatch));
    assert_eq!(counts(&store), before);

    // The unknown validator was not registered either.
    let view = store.read().unwrap();
    assert!(store.lookup_validators(&*view, &[pk(3)]).unwrap().is_empty());
}

#[test]
fn import_adopts_genesis_root_when_unset() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[]}}"#
    );

    import(&store, document.as_bytes()).unwrap();

    let view = store.read().unwrap();
    assert_eq!(
        store.genesis_validators_root(&*view).unwrap(),
        Some(genesis_root())
    );
}

#[test]
fn import_rejects_unsupported_version() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"4","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[]}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::UnsupportedVersion(v) if v == "4"));

    // No state change, not even the genesis root.
    let view = store.read().unwrap();
    assert_eq!(store.genesis_validators_root(&*view).unwrap(), None);
}

#[test]
fn import_requires_metadata_before_data() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"data":[],"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}}}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Malformed(_)));
}

#[test]
fn import_rejects_source_above_target() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[],"signed_attestations":[{{"source_epoch":"10","target_epoch":"5","signing_root":"0x01"}}]}}]}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Malformed(_)));
    assert_eq!(counts(&store), (0, 0));
}

#[test]
fn import_rejects_conflicting_block_root_and_rolls_back() {
    let store = seeded_store();
    let before = counts(&store);

    // Slot 3 exists with root 0x01; the file claims 0x02 plus a novel slot
    // 20 that must not survive the rollback.
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[{{"slot":"20","signing_root":"0x01"}},{{"slot":"3","signing_root":"0x02"}}],"signed_attestations":[]}}]}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Conflict(_)));
    assert_eq!(counts(&store), before);

    let view = store.read().unwrap();
    assert!(store.find_existing_block(&*view, 1, 20).unwrap().is_none());
}

#[test]
fn import_skips_identical_duplicates() {
    let store = seeded_store();
    let before = counts(&store);

    let exported = export_bytes(&store);
    // Re-importing a store's own export is a no-op.
    import(&store, exported.as_slice()).unwrap();
    assert_eq!(counts(&store), before);
}

#[test]
fn import_rejects_surround_against_existing_history() {
    let store = seeded_store();

    // Validator 1 holds (7, 7); (3, 9) would surround it.
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[],"signed_attestations":[{{"source_epoch":"3","target_epoch":"9","signing_root":"0x02"}}]}}]}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Conflict(_)));
}

#[test]
fn import_rejects_surround_within_the_file() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[],"signed_attestations":[{{"source_epoch":"4","target_epoch":"8","signing_root":"0x01"}},{{"source_epoch":"3","target_epoch":"9","signing_root":"0x02"}}]}}]}}"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Conflict(_)));
    assert_eq!(counts(&store), (0, 0));
}

#[test]
fn wildcard_roots_round_trip_and_conflict_with_concrete_roots() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[{{"slot":"5"}}],"signed_attestations":[]}}]}}"#
    );
    import(&store, document.as_bytes()).unwrap();

    // The wildcard is re-exported without a signing_root field.
    let doc: Value = serde_json::from_slice(&export_bytes(&store)).unwrap();
    let block = &doc["data"][0]["signed_blocks"][0];
    assert_eq!(block["slot"], "5");
    assert!(block.get("signing_root").is_none());

    // A concrete root at the same slot cannot match the wildcard.
    let conflicting = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[{{"slot":"5","signing_root":"0xaa"}}],"signed_attestations":[]}}]}}"#
    );
    let err = import(&store, conflicting.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Conflict(_)));
}

#[test]
fn import_raises_watermarks_to_declared_maxima() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[{{"pubkey":"0x01","signed_blocks":[{{"slot":"7","signing_root":"0x01"}},{{"slot":"2","signing_root":"0x01"}}],"signed_attestations":[{{"source_epoch":"5","target_epoch":"9","signing_root":"0x01"}},{{"source_epoch":"1","target_epoch":"2","signing_root":"0x01"}}]}}]}}"#
    );
    import(&store, document.as_bytes()).unwrap();

    let view = store.read().unwrap();
    assert_eq!(store.proposal_watermark(&*view, 1).unwrap(), Some(7));
    let watermark = store.attestation_watermark(&*view, 1).unwrap().unwrap();
    assert_eq!(
        (watermark.source_epoch, watermark.target_epoch),
        (5, 9)
    );
}

#[test]
fn import_rejects_trailing_garbage() {
    let store = Store::in_memory().unwrap();
    let document = format!(
        r#"{{"metadata":{{"interchange_format_version":"5","genesis_validators_root":"{GENESIS_VALIDATORS_ROOT}"}},"data":[]}} extra"#
    );

    let err = import(&store, document.as_bytes()).unwrap_err();
    assert!(matches!(err, InterchangeError::Malformed(_)));
}
