//! EIP-3076 v5 document shapes.
//!
//! All numeric fields are decimal strings of unsigned 64-bit integers; byte
//! fields are 0x-prefixed hex, case-insensitive on read and lowercase on
//! write.

use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use slashguard_types::{Epoch, PublicKey, SigningRoot, Slot};

/// The only supported `interchange_format_version`.
pub const INTERCHANGE_FORMAT_VERSION: &str = "5";

/// Document header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub interchange_format_version: String,
    pub genesis_validators_root: H256,
}

/// One signed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    /// Absent roots are wildcards: they never match a concrete root and are
    /// re-exported without the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<SigningRoot>,
}

/// One signed attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    #[serde(with = "quoted_u64")]
    pub source_epoch: Epoch,
    #[serde(with = "quoted_u64")]
    pub target_epoch: Epoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<SigningRoot>,
}

/// One validator's history. Import materializes at most one of these at a
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorHistory {
    pub pubkey: PublicKey,
    pub signed_blocks: Vec<BlockRecord>,
    pub signed_attestations: Vec<AttestationRecord>,
}

/// Unsigned 64-bit integers encoded as decimal strings.
mod quoted_u64 {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| de::Error::custom(format!("invalid u64 string {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_decimal_strings() {
        let record: BlockRecord =
            serde_json::from_str(r#"{"slot":"12","signing_root":"0xAA"}"#).unwrap();
        assert_eq!(record.slot, 12);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"slot":"12","signing_root":"0xaa"}"#
        );
    }

    #[test]
    fn bare_numbers_are_rejected() {
        assert!(serde_json::from_str::<BlockRecord>(r#"{"slot":12}"#).is_err());
    }

    #[test]
    fn absent_signing_root_is_wildcard() {
        let record: AttestationRecord =
            serde_json::from_str(r#"{"source_epoch":"1","target_epoch":"2"}"#).unwrap();
        assert_eq!(record.signing_root, None);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"source_epoch":"1","target_epoch":"2"}"#
        );
    }
}
