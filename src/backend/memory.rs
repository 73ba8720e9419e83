//! In-memory target backend.
//!
//! Regions are heap buffers behind the target mutex. Nothing is durable, so
//! `persist` only validates bounds. Migration still works: the migration
//! handle snapshots every live region into a scratch directory, which
//! becomes the streamed file set, and `recover` reloads those files into a
//! fresh target on the receiving provider.

use crate::backend::{
    check_bounds, total_length, MigrationHandle, ReadableRegion, TargetBackend, WritableRegion,
};
use crate::error::{Error, Result};
use crate::region::RegionId;
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;

pub struct MemoryTarget {
    config: serde_json::Value,
    store: Mutex<MemoryStore>,
}

#[derive(Default)]
#[derive(Debug)]
struct MemoryStore {
    regions: HashMap<u64, Vec<u8>>,
    next_index: u64,
    migrating: bool,
    migrated: bool,
    destroyed: bool,
}

impl MemoryStore {
    fn check_mutable(&self) -> Result<()> {
        self.check_readable()?;
        if self.migrating {
            return Err(Error::TargetMigrating);
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<()> {
        if self.destroyed {
            return Err(Error::TargetDestroyed);
        }
        if self.migrated {
            return Err(Error::TargetMigrated);
        }
        Ok(())
    }
}

impl MemoryTarget {
    pub fn new(config: &serde_json::Value) -> MemoryTarget {
        MemoryTarget {
            config: config.clone(),
            store: Mutex::new(MemoryStore::default()),
        }
    }

    /// Any JSON object is acceptable; there is nothing to configure.
    pub(crate) fn validate(config: &serde_json::Value) -> Result<()> {
        if !config.is_object() {
            return Err(Error::InvalidConfig(
                "memory target configuration must be an object".to_string(),
            ));
        }
        Ok(())
    }

    /// Rebuild a target from the snapshot files installed by a migration.
    pub(crate) fn recover(config: &serde_json::Value, files: &[PathBuf]) -> Result<MemoryTarget> {
        let mut store = MemoryStore::default();
        for path in files {
            let index = snapshot_index(path).ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "unexpected file {} in recovered memory target",
                    path.display()
                ))
            })?;
            let data = std::fs::read(path)?;
            store.next_index = store.next_index.max(index + 1);
            store.regions.insert(index, data);
        }
        info!("Recovered memory target with {} regions", store.regions.len());
        Ok(MemoryTarget {
            config: config.clone(),
            store: Mutex::new(store),
        })
    }
}

fn snapshot_name(index: u64) -> String {
    format!("region-{}.bin", index)
}

fn snapshot_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("region-")?.strip_suffix(".bin")?.parse().ok()
}

#[derive(Debug)]
struct MemoryRegion<'a> {
    store: MutexGuard<'a, MemoryStore>,
    index: u64,
}

impl MemoryRegion<'_> {
    fn buffer(&self) -> Result<&Vec<u8>> {
        self.store
            .regions
            .get(&self.index)
            .ok_or_else(|| Error::RegionNotFound(RegionId::from_index(self.index)))
    }
}

impl WritableRegion for MemoryRegion<'_> {
    fn region_id(&self) -> RegionId {
        RegionId::from_index(self.index)
    }

    fn size(&self) -> u64 {
        self.buffer().map(|b| b.len() as u64).unwrap_or(0)
    }

    fn write(&mut self, segments: &[(u64, u64)], data: &[u8], _persist: bool) -> Result<()> {
        let index = self.index;
        let region = self
            .store
            .regions
            .get_mut(&index)
            .ok_or_else(|| Error::RegionNotFound(RegionId::from_index(index)))?;
        check_bounds(segments, region.len() as u64)?;
        let total = total_length(segments);
        if data.len() as u64 != total {
            return Err(Error::PayloadMismatch {
                expected: total,
                got: data.len() as u64,
            });
        }
        let mut cursor = 0usize;
        for &(offset, len) in segments {
            let offset = offset as usize;
            let len = len as usize;
            region[offset..offset + len].copy_from_slice(&data[cursor..cursor + len]);
            cursor += len;
        }
        Ok(())
    }

    fn persist(&mut self, segments: &[(u64, u64)]) -> Result<()> {
        // Nothing durable here; bounds are still enforced.
        let size = self.buffer()?.len() as u64;
        check_bounds(segments, size)
    }
}

impl ReadableRegion for MemoryRegion<'_> {
    fn region_id(&self) -> RegionId {
        RegionId::from_index(self.index)
    }

    fn size(&self) -> u64 {
        self.buffer().map(|b| b.len() as u64).unwrap_or(0)
    }

    fn read(&mut self, segments: &[(u64, u64)], data: &mut [u8]) -> Result<()> {
        let region = self.buffer()?;
        check_bounds(segments, region.len() as u64)?;
        let total = total_length(segments);
        if data.len() as u64 != total {
            return Err(Error::PayloadMismatch {
                expected: total,
                got: data.len() as u64,
            });
        }
        let mut cursor = 0usize;
        for &(offset, len) in segments {
            let offset = offset as usize;
            let len = len as usize;
            data[cursor..cursor + len].copy_from_slice(&region[offset..offset + len]);
            cursor += len;
        }
        Ok(())
    }
}

struct MemoryMigrationHandle<'a> {
    target: &'a MemoryTarget,
    dir: TempDir,
    files: Vec<String>,
    remove_source: bool,
    canceled: bool,
}

impl MigrationHandle for MemoryMigrationHandle<'_> {
    fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn files(&self) -> Vec<String> {
        self.files.clone()
    }

    fn cancel(&mut self) {
        self.canceled = true;
        self.target.store.lock().unwrap().migrating = false;
        info!("Canceled migration of memory target");
    }
}

impl Drop for MemoryMigrationHandle<'_> {
    fn drop(&mut self) {
        if self.canceled {
            return;
        }
        let mut store = self.target.store.lock().unwrap();
        store.migrating = false;
        if self.remove_source {
            store.regions.clear();
            store.migrated = true;
        }
    }
}

impl TargetBackend for MemoryTarget {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn config(&self) -> serde_json::Value {
        self.config.clone()
    }

    fn create(&self, size: u64) -> Result<Box<dyn WritableRegion + '_>> {
        let mut store = self.store.lock().unwrap();
        store.check_mutable()?;
        let index = store.next_index;
        store.next_index += 1;
        store.regions.insert(index, vec![0u8; size as usize]);
        Ok(Box::new(MemoryRegion { store, index }))
    }

    fn open_write(
        &self,
        region_id: &RegionId,
        _persist: bool,
    ) -> Result<Box<dyn WritableRegion + '_>> {
        let index = region_id
            .to_index()
            .ok_or_else(|| Error::RegionNotFound(region_id.clone()))?;
        let store = self.store.lock().unwrap();
        store.check_mutable()?;
        if !store.regions.contains_key(&index) {
            return Err(Error::RegionNotFound(region_id.clone()));
        }
        Ok(Box::new(MemoryRegion { store, index }))
    }

    fn open_read(&self, region_id: &RegionId) -> Result<Box<dyn ReadableRegion + '_>> {
        let index = region_id
            .to_index()
            .ok_or_else(|| Error::RegionNotFound(region_id.clone()))?;
        let store = self.store.lock().unwrap();
        store.check_readable()?;
        if !store.regions.contains_key(&index) {
            return Err(Error::RegionNotFound(region_id.clone()));
        }
        Ok(Box::new(MemoryRegion { store, index }))
    }

    fn erase(&self, region_id: &RegionId) -> Result<()> {
        let index = region_id
            .to_index()
            .ok_or_else(|| Error::RegionNotFound(region_id.clone()))?;
        let mut store = self.store.lock().unwrap();
        store.check_mutable()?;
        store
            .regions
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| Error::RegionNotFound(region_id.clone()))
    }

    fn destroy(&self) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        store.regions.clear();
        store.destroyed = true;
        info!("Destroyed memory target");
        Ok(())
    }

    fn start_migration(&self, remove_source: bool) -> Result<Box<dyn MigrationHandle + '_>> {
        let mut store = self.store.lock().unwrap();
        store.check_mutable()?;
        let dir = tempfile::Builder::new()
            .prefix("star-vault-memory-")
            .tempdir()?;
        let mut files = Vec::with_capacity(store.regions.len());
        for (index, data) in &store.regions {
            let name = snapshot_name(*index);
            std::fs::write(dir.path().join(&name), data)?;
            files.push(name);
        }
        store.migrating = true;
        info!(
            "Started migration of memory target: {} regions snapshotted under {}",
            files.len(),
            dir.path().display()
        );
        Ok(Box::new(MemoryMigrationHandle {
            target: self,
            dir,
            files,
            remove_source,
            canceled: false,
        }))
    }
}
