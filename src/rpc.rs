//! Wire-level request and response types.
//!
//! Every RPC answers with the same [`Envelope`] shape regardless of verb, so
//! callers have a single place to look for success, error text, and the
//! optional value.

use crate::engine::BulkHandle;
use crate::error::Error;
use crate::region::RegionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uniform result envelope returned by every RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(value: T) -> Self {
        Envelope {
            success: true,
            error: String::new(),
            value: Some(value),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Envelope {
            success: false,
            error: error.into(),
            value: None,
        }
    }
}

impl<T> From<Result<T, Error>> for Envelope<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Envelope::ok(value),
            Err(e) => Envelope::failure(e.to_string()),
        }
    }
}

/// Options controlling a target migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Directory on the destination under which the target's files land.
    pub new_root: String,
    /// Chunk size for the file-set stream; 0 means whole-file transfers.
    pub transfer_size: u32,
    /// Extra JSON configuration merged over the target's own config on the
    /// destination (passed through verbatim as file-set metadata).
    pub extra_config: String,
    /// Delete the source-side artifacts once the migration succeeds.
    pub remove_source: bool,
}

/// One RPC request. `segments` lists are ordered `(offset, length)` pairs
/// against the region; `address` is the endpoint supplying or consuming the
/// bulk data, empty meaning the RPC sender itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Request {
    AddTarget {
        #[serde(rename = "type")]
        target_type: String,
        config: String,
    },
    RemoveTarget {
        target_id: Uuid,
    },
    DestroyTarget {
        target_id: Uuid,
    },
    AddTransferManager {
        name: String,
        #[serde(rename = "type")]
        tm_type: String,
        config: String,
    },
    MigrateTarget {
        target_id: Uuid,
        dest_address: String,
        dest_provider_id: u16,
        options: MigrationOptions,
    },
    CheckTarget {
        target_id: Uuid,
    },
    Create {
        target_id: Uuid,
        size: u64,
    },
    Write {
        target_id: Uuid,
        region_id: RegionId,
        segments: Vec<(u64, u64)>,
        bulk: BulkHandle,
        address: String,
        bulk_offset: u64,
        persist: bool,
    },
    WriteEager {
        target_id: Uuid,
        region_id: RegionId,
        segments: Vec<(u64, u64)>,
        data: Vec<u8>,
        persist: bool,
    },
    Persist {
        target_id: Uuid,
        region_id: RegionId,
        segments: Vec<(u64, u64)>,
    },
    CreateWrite {
        target_id: Uuid,
        bulk: BulkHandle,
        address: String,
        bulk_offset: u64,
        size: u64,
        persist: bool,
    },
    CreateWriteEager {
        target_id: Uuid,
        data: Vec<u8>,
        persist: bool,
    },
    Read {
        target_id: Uuid,
        region_id: RegionId,
        segments: Vec<(u64, u64)>,
        bulk: BulkHandle,
        address: String,
        bulk_offset: u64,
    },
    ReadEager {
        target_id: Uuid,
        region_id: RegionId,
        segments: Vec<(u64, u64)>,
    },
    Erase {
        target_id: Uuid,
        region_id: RegionId,
    },
}

impl Request {
    /// Verb name as it appears on the wire, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Request::AddTarget { .. } => "add_target",
            Request::RemoveTarget { .. } => "remove_target",
            Request::DestroyTarget { .. } => "destroy_target",
            Request::AddTransferManager { .. } => "add_transfer_manager",
            Request::MigrateTarget { .. } => "migrate_target",
            Request::CheckTarget { .. } => "check_target",
            Request::Create { .. } => "create",
            Request::Write { .. } => "write",
            Request::WriteEager { .. } => "write_eager",
            Request::Persist { .. } => "persist",
            Request::CreateWrite { .. } => "create_write",
            Request::CreateWriteEager { .. } => "create_write_eager",
            Request::Read { .. } => "read",
            Request::ReadEager { .. } => "read_eager",
            Request::Erase { .. } => "erase",
        }
    }
}

/// Typed payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseValue {
    Acknowledged(bool),
    TargetId(Uuid),
    Region(RegionId),
    Bytes(Vec<u8>),
}

impl Default for ResponseValue {
    fn default() -> Self {
        ResponseValue::Acknowledged(false)
    }
}

impl Envelope<ResponseValue> {
    /// The target UUID carried by the response, if any.
    pub fn target_id(&self) -> Option<Uuid> {
        match self.value {
            Some(ResponseValue::TargetId(id)) => Some(id),
            _ => None,
        }
    }

    /// The region id carried by the response, if any.
    pub fn region_id(&self) -> Option<RegionId> {
        match &self.value {
            Some(ResponseValue::Region(id)) => Some(id.clone()),
            _ => None,
        }
    }

    /// The byte payload carried by the response, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Some(ResponseValue::Bytes(data)) => Some(data),
            _ => None,
        }
    }
}
