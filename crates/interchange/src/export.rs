use std::io::Write;

use tracing::info;

use slashguard_storage::Store;

use crate::error::InterchangeError;
use crate::format::{AttestationRecord, BlockRecord, INTERCHANGE_FORMAT_VERSION, Metadata};

/// Stream the store's full history as an EIP-3076 v5 document.
///
/// The whole export reads from one snapshot so the file is internally
/// consistent even while decisions keep committing. Validators are emitted in
/// ascending-id order, blocks by slot, attestations by (target, source), so
/// re-exporting an unchanged store is byte-identical.
pub fn export<W: Write>(store: &Store, mut writer: W) -> Result<(), InterchangeError> {
    let view = store.read()?;

    // Nothing may be written before this check: a missing genesis root must
    // leave the output stream empty.
    let genesis_validators_root = store
        .genesis_validators_root(&*view)?
        .ok_or(InterchangeError::MissingGenesisRoot)?;

    let metadata = Metadata {
        interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
        genesis_validators_root,
    };

    writer.write_all(b"{\"metadata\":")?;
    serde_json::to_writer(&mut writer, &metadata)?;
    writer.write_all(b",\"data\":[")?;

    let mut validator_count = 0u64;
    for validator in store.iter_validators(&*view)? {
        let (validator_id, pubkey) = validator?;

        if validator_count > 0 {
            writer.write_all(b",")?;
        }
        validator_count += 1;

        writer.write_all(b"{\"pubkey\":")?;
        serde_json::to_writer(&mut writer, &pubkey)?;

        writer.write_all(b",\"signed_blocks\":[")?;
        let mut first = true;
        for record in store.iter_blocks(&*view, validator_id)? {
            let record = record?;
            if !first {
                writer.write_all(b",")?;
            }
            first = false;
            serde_json::to_writer(
                &mut writer,
                &BlockRecord {
                    slot: record.slot,
                    signing_root: record.signing_root,
                },
            )?;
        }

        writer.write_all(b"],\"signed_attestations\":[")?;
        let mut first = true;
        for record in store.iter_attestations(&*view, validator_id)? {
            let record = record?;
            if !first {
                writer.write_all(b",")?;
            }
            first = false;
            serde_json::to_writer(
                &mut writer,
                &AttestationRecord {
                    source_epoch: record.source_epoch,
                    target_epoch: record.target_epoch,
                    signing_root: record.signing_root,
                },
            )?;
        }
        writer.write_all(b"]}")?;
    }

    writer.write_all(b"]}")?;
    writer.flush()?;

    info!(validators = validator_count, "Exported slashing protection history");
    Ok(())
}
