//! Target backend abstraction.
//!
//! A *target* is a container of fixed-size byte regions. This module defines
//! the contract every backend implements, the short-lived region handles the
//! dispatch layer operates on, and the scoped migration handle that locks a
//! target while its files are streamed to a peer. Concrete backends live in
//! [`memory`] and [`file_store`]; selection and instantiation go through
//! [`config`].

pub mod config;
pub mod file_store;
pub mod memory;


use crate::error::{Error, Result};
use crate::region::RegionId;
use std::path::PathBuf;

/// Write-side handle to one region. Obtained per-RPC and dropped with it.
pub trait WritableRegion {
    fn region_id(&self) -> RegionId;

    fn size(&self) -> u64;

    /// Write the concatenation of `data` into `segments`, in order. The
    /// whole call fails without touching the region if any segment falls
    /// outside the region bounds. Overlapping segments resolve last-wins.
    fn write(&mut self, segments: &[(u64, u64)], data: &[u8], persist: bool) -> Result<()>;

    /// Force durability of the given segments. An empty list succeeds
    /// without doing anything.
    fn persist(&mut self, segments: &[(u64, u64)]) -> Result<()>;
}

/// Read-side handle to one region.
pub trait ReadableRegion: std::fmt::Debug {
    fn region_id(&self) -> RegionId;

    fn size(&self) -> u64;

    /// Read the segments, in order, into `data`.
    fn read(&mut self, segments: &[(u64, u64)], data: &mut [u8]) -> Result<()>;
}

/// Scoped lock over a migrating target.
///
/// While the handle exists the target refuses every mutating operation.
/// Dropping the handle without [`MigrationHandle::cancel`] finalizes the
/// migration on the source side: with `remove_source` the target's
/// artifacts are deleted and the target is permanently disabled.
pub trait MigrationHandle {
    /// Filesystem root the file list is relative to.
    fn root(&self) -> PathBuf;

    /// Paths relative to [`MigrationHandle::root`]; an entry ending in `/`
    /// names a directory to be streamed recursively.
    fn files(&self) -> Vec<String>;

    /// Abandon the migration; the target becomes mutable again and nothing
    /// is deleted.
    fn cancel(&mut self);
}

/// Contract between the provider core and a storage backend.
pub trait TargetBackend: Send + Sync {
    /// Type tag, as used in configuration documents.
    fn kind(&self) -> &'static str;

    /// Current configuration, round-trippable through `add_target`.
    fn config(&self) -> serde_json::Value;

    /// Allocate a region of exactly `size` bytes.
    fn create(&self, size: u64) -> Result<Box<dyn WritableRegion + '_>>;

    /// Open an existing region for writing. `persist` hints that the
    /// following writes should be made durable.
    fn open_write(&self, region_id: &RegionId, persist: bool)
        -> Result<Box<dyn WritableRegion + '_>>;

    /// Open an existing region for reading.
    fn open_read(&self, region_id: &RegionId) -> Result<Box<dyn ReadableRegion + '_>>;

    /// Remove a region. Unknown ids fail; they are never created.
    fn erase(&self, region_id: &RegionId) -> Result<()>;

    /// Remove all regions and delete any persistent artifacts.
    fn destroy(&self) -> Result<()>;

    /// Lock the target and expose its file set for migration.
    fn start_migration(&self, remove_source: bool) -> Result<Box<dyn MigrationHandle + '_>>;
}

/// Total payload length described by a segment list.
pub fn total_length(segments: &[(u64, u64)]) -> u64 {
    segments.iter().map(|(_, len)| len).sum()
}

/// Validate every segment against the region size before any byte moves,
/// so a failed call has no partial effect.
pub fn check_bounds(segments: &[(u64, u64)], size: u64) -> Result<()> {
    for &(offset, len) in segments {
        if offset + len > size {
            return Err(Error::RegionBounds { offset, len, size });
        }
    }
    Ok(())
}
