//! Transfer managers: policies for moving bytes between a caller's bulk
//! buffer and a region.
//!
//! A transfer manager owns no persistent state; it is a named, configured
//! policy object shared by every target bound to its name. Implementations
//! may chunk or coalesce however they like, but the externally observable
//! effect must equal a single logical region `write`/`read`.

pub mod config;
pub mod default;
pub mod pipeline;

use crate::backend::{ReadableRegion, WritableRegion};
use crate::engine::{BulkHandle, Endpoint};
use crate::error::Result;

pub trait TransferManager: Send + Sync {
    /// Type tag, as used in configuration documents.
    fn kind(&self) -> &'static str;

    /// Current configuration, round-trippable through `add_transfer_manager`.
    fn config(&self) -> serde_json::Value;

    /// Move `Σ len` bytes from the remote bulk buffer (starting at
    /// `bulk_offset`) into the region's segments.
    fn pull(
        &self,
        region: &mut dyn WritableRegion,
        segments: &[(u64, u64)],
        bulk: &BulkHandle,
        source: &Endpoint,
        bulk_offset: u64,
        persist: bool,
    ) -> Result<()>;

    /// Move `Σ len` bytes from the region's segments out to the remote bulk
    /// buffer at `[bulk_offset, bulk_offset + Σ len)`.
    fn push(
        &self,
        region: &mut dyn ReadableRegion,
        segments: &[(u64, u64)],
        bulk: &BulkHandle,
        source: &Endpoint,
        bulk_offset: u64,
    ) -> Result<()>;
}
