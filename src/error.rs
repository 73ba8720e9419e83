//! Error type shared across the provider core.
//!
//! Every domain failure the provider can report is a variant here; the
//! `Display` string of a variant is exactly what ends up in the `error`
//! field of the wire envelope.

use crate::region::RegionId;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Target {0} not found")]
    TargetNotFound(Uuid),

    #[error("Region {0} not found in target")]
    RegionNotFound(RegionId),

    #[error("Segment ({offset}, {len}) is outside the region bounds ({size} bytes)")]
    RegionBounds { offset: u64, len: u64, size: u64 },

    #[error("Payload holds {got} bytes but the segments describe {expected}")]
    PayloadMismatch { expected: u64, got: u64 },

    #[error("Could not find transfer manager named \"{0}\"")]
    TransferManagerNotFound(String),

    #[error("A transfer manager named \"{0}\" already exists")]
    TransferManagerExists(String),

    #[error("Unknown target type \"{0}\"")]
    UnknownTargetType(String),

    #[error("Unknown transfer manager type \"{0}\"")]
    UnknownTransferManagerType(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Target is being migrated")]
    TargetMigrating,

    #[error("Target has been migrated to another provider")]
    TargetMigrated,

    #[error("Target has been destroyed")]
    TargetDestroyed,

    #[error("Bulk buffer too short: need {needed} bytes at offset {offset}, buffer holds {size}")]
    BulkBounds { offset: u64, needed: u64, size: u64 },

    #[error("No bulk buffer registered under handle {0}")]
    BulkNotFound(u64),

    #[error("Could not resolve address \"{0}\"")]
    AddressNotFound(String),

    #[error("No provider with id {provider_id} at {address}")]
    ProviderNotFound { address: String, provider_id: u16 },

    #[error("A provider with id {0} is already registered on this engine")]
    ProviderIdInUse(u16),

    #[error("Migration failed with status {0}")]
    MigrationRejected(i32),

    #[error("migration support is not enabled for this provider")]
    MigrationNotEnabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_not_found_mentions_uuid() {
        let id = Uuid::new_v4();
        let msg = Error::TargetNotFound(id).to_string();
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_region_not_found_mentions_region() {
        let id = RegionId::from_index(7);
        let msg = Error::RegionNotFound(id.clone()).to_string();
        assert!(msg.contains(&id.to_hex()));
    }
}
