pub mod primitives;

pub use primitives::{Epoch, HexParseError, PublicKey, SigningRoot, Slot, ValidatorId};
