/// Tables in the storage layer.
///
/// All composite keys are big-endian concatenations so that lexicographic
/// key order equals numeric order; the surround-vote detection queries and
/// the interchange export orderings are plain range scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Validator lookup: pubkey bytes -> validator id (u64 BE)
    Validators,
    /// Reverse index: validator id (u64 BE) -> pubkey bytes
    ///
    /// Export walks this table to visit validators in ascending-id order.
    ValidatorKeys,
    /// Signed block proposals: (validator id BE || slot BE) -> signing root bytes
    ///
    /// An empty value marks a record imported without a signing root; it can
    /// never match a concrete root.
    SignedBlocks,
    /// Signed attestations:
    /// (validator id BE || target epoch BE) -> (source epoch BE || signing root bytes)
    SignedAttestations,
    /// Proposal low-watermarks raised by interchange import:
    /// validator id BE -> slot BE
    ProposalWatermarks,
    /// Attestation low-watermarks raised by interchange import:
    /// validator id BE -> (source epoch BE || target epoch BE)
    AttestationWatermarks,
    /// Metadata: string keys -> scalar values
    Metadata,
}

/// All table variants.
pub const ALL_TABLES: [Table; 7] = [
    Table::Validators,
    Table::ValidatorKeys,
    Table::SignedBlocks,
    Table::SignedAttestations,
    Table::ProposalWatermarks,
    Table::AttestationWatermarks,
    Table::Metadata,
];
