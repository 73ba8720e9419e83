//! File-per-region target backend.
//!
//! Regions live under a root directory given by the `path` configuration
//! key; a region of size N is a file `r-<index>.dat` preallocated to N
//! bytes. `persist` maps to `sync_data`, `destroy` removes the directory
//! tree, and the migration file list is simply the set of region files
//! relative to the root.
//!
//! Configuration keys: `path` (required), `create_if_missing` (default
//! true), `override_if_exists` (default false), `sync_on_persist`
//! (default true).

use crate::backend::{
    check_bounds, total_length, MigrationHandle, ReadableRegion, TargetBackend, WritableRegion,
};
use crate::error::{Error, Result};
use crate::region::RegionId;
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct FileTarget {
    config: serde_json::Value,
    root: PathBuf,
    sync_on_persist: bool,
    state: Mutex<FileState>,
}

#[derive(Default)]
struct FileState {
    next_index: u64,
    migrating: bool,
    migrated: bool,
    destroyed: bool,
}

impl FileState {
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

fn region_file_name(index: u64) -> String {
    format!("r-{}.dat", index)
}

fn region_file_index(name: &str) -> Option<u64> {
    name.strip_prefix("r-")?.strip_suffix(".dat")?.parse().ok()
}

/// Highest region index present under `root`, plus one.
fn scan_next_index(root: &Path) -> Result<u64> {
    let mut next = 0u64;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if let Some(index) = entry.file_name().to_str().and_then(region_file_index) {
            next = next.max(index + 1);
        }
    }
    Ok(next)
}

fn config_flag(config: &serde_json::Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

impl FileTarget {
    pub(crate) fn validate(config: &serde_json::Value) -> Result<()> {
        if !config.is_object() {
            return Err(Error::InvalidConfig(
                "file target configuration must be an object".to_string(),
            ));
        }
        let path = match config.get("path") {
            Some(serde_json::Value::String(path)) if !path.is_empty() => path,
            Some(serde_json::Value::String(_)) => {
                return Err(Error::InvalidConfig(
                    "file target \"path\" must not be empty".to_string(),
                ))
            }
            Some(_) => {
                return Err(Error::InvalidConfig(
                    "file target \"path\" must be a string".to_string(),
                ))
            }
            None => {
                return Err(Error::InvalidConfig(
                    "file target configuration requires a \"path\"".to_string(),
                ))
            }
        };
        for key in ["create_if_missing", "override_if_exists", "sync_on_persist"] {
            if let Some(value) = config.get(key) {
                if !value.is_boolean() {
                    return Err(Error::InvalidConfig(format!(
                        "file target \"{}\" must be a boolean",
                        key
                    )));
                }
            }
        }
        let exists = Path::new(path).exists();
        if !exists && !config_flag(config, "create_if_missing", true) {
            return Err(Error::InvalidConfig(format!(
                "directory {} does not exist and \"create_if_missing\" is false",
                path
            )));
        }
        Ok(())
    }

    pub(crate) fn create_target(config: &serde_json::Value) -> Result<FileTarget> {
        let path = config
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::InvalidConfig("file target configuration requires a \"path\"".to_string())
            })?;
        let root = PathBuf::from(path);
        if root.exists() && config_flag(config, "override_if_exists", false) {
            std::fs::remove_dir_all(&root)?;
        }
        if !root.exists() {
            if !config_flag(config, "create_if_missing", true) {
                return Err(Error::InvalidConfig(format!(
                    "directory {} does not exist and \"create_if_missing\" is false",
                    path
                )));
            }
            std::fs::create_dir_all(&root)?;
        }
        let next_index = scan_next_index(&root)?;
        info!(
            "Opened file target at {} (next region index {})",
            root.display(),
            next_index
        );
        Ok(FileTarget {
            config: config.clone(),
            sync_on_persist: config_flag(config, "sync_on_persist", true),
            root,
            state: Mutex::new(FileState {
                next_index,
                ..FileState::default()
            }),
        })
    }

    /// Rebuild a target from the region files installed by a migration.
    ///
    /// The target is re-rooted at the directory holding the installed
    /// files; the stale source `path` in the carried config is rewritten so
    /// the provider's configuration round-trip stays truthful.
    pub(crate) fn recover(
        config: &serde_json::Value,
        files: &[PathBuf],
    ) -> Result<FileTarget> {
        let root = match files.first().and_then(|f| f.parent()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from(
                config
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::InvalidConfig(
                            "file target configuration requires a \"path\"".to_string(),
                        )
                    })?,
            ),
        };
        if !root.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "recovered file target root {} is not a directory",
                root.display()
            )));
        }
        let mut config = config.clone();
        config["path"] = serde_json::Value::String(root.display().to_string());
        let next_index = scan_next_index(&root)?;
        info!(
            "Recovered file target at {} ({} files)",
            root.display(),
            files.len()
        );
        Ok(FileTarget {
            sync_on_persist: config_flag(&config, "sync_on_persist", true),
            config,
            root,
            state: Mutex::new(FileState {
                next_index,
                ..FileState::default()
            }),
        })
    }

    fn region_path(&self, region_id: &RegionId) -> Result<(u64, PathBuf)> {
        let index = region_id
            .to_index()
            .ok_or_else(|| Error::RegionNotFound(region_id.clone()))?;
        Ok((index, self.root.join(region_file_name(index))))
    }
}

#[derive(Debug)]
struct FileRegion {
    index: u64,
    file: File,
    size: u64,
    sync_on_persist: bool,
}

impl WritableRegion for FileRegion {
    fn region_id(&self) -> RegionId {
        RegionId::from_index(self.index)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&mut self, segments: &[(u64, u64)], data: &[u8], persist: bool) -> Result<()> {
        check_bounds(segments, self.size)?;
        let total = total_length(segments);
        if data.len() as u64 != total {
            return Err(Error::PayloadMismatch {
                expected: total,
                got: data.len() as u64,
            });
        }
        let mut cursor = 0usize;
        for &(offset, len) in segments {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&data[cursor..cursor + len as usize])?;
            cursor += len as usize;
        }
        if persist && self.sync_on_persist {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn persist(&mut self, segments: &[(u64, u64)]) -> Result<()> {
        check_bounds(segments, self.size)?;
        if segments.is_empty() {
            return Ok(());
        }
        if self.sync_on_persist {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl ReadableRegion for FileRegion {
    fn region_id(&self) -> RegionId {
        RegionId::from_index(self.index)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, segments: &[(u64, u64)], data: &mut [u8]) -> Result<()> {
        check_bounds(segments, self.size)?;
        let total = total_length(segments);
        if data.len() as u64 != total {
            return Err(Error::PayloadMismatch {
                expected: total,
                got: data.len() as u64,
            });
        }
        let mut cursor = 0usize;
        for &(offset, len) in segments {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file
                .read_exact(&mut data[cursor..cursor + len as usize])?;
            cursor += len as usize;
        }
        Ok(())
    }
}

struct FileMigrationHandle<'a> {
    target: &'a FileTarget,
    files: Vec<String>,
    remove_source: bool,
    canceled: bool,
}

impl MigrationHandle for FileMigrationHandle<'_> {
    fn root(&self) -> PathBuf {
        self.target.root.clone()
    }

    fn files(&self) -> Vec<String> {
        self.files.clone()
    }

    fn cancel(&mut self) {
        self.canceled = true;
        self.target.state.lock().unwrap().migrating = false;
        info!(
            "Canceled migration of file target at {}",
            self.target.root.display()
        );
    }
}

impl Drop for FileMigrationHandle<'_> {
    fn drop(&mut self) {
        if self.canceled {
            return;
        }
        let mut state = self.target.state.lock().unwrap();
        state.migrating = false;
        if self.remove_source {
            if let Err(e) = std::fs::remove_dir_all(&self.target.root) {
                warn!(
                    "Could not remove migrated file target at {}: {}",
                    self.target.root.display(),
                    e
                );
            }
            state.migrated = true;
        }
    }
}

impl TargetBackend for FileTarget {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn config(&self) -> serde_json::Value {
        self.config.clone()
    }

    fn create(&self, size: u64) -> Result<Box<dyn WritableRegion + '_>> {
        let index = {
            let mut state = self.state.lock().unwrap();
            state.check_mutable()?;
            let index = state.next_index;
            state.next_index += 1;
            index
        };
        let path = self.root.join(region_file_name(index));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(size)?;
        Ok(Box::new(FileRegion {
            index,
            file,
            size,
            sync_on_persist: self.sync_on_persist,
        }))
    }

    fn open_write(
        &self,
        region_id: &RegionId,
        _persist: bool,
    ) -> Result<Box<dyn WritableRegion + '_>> {
        self.state.lock().unwrap().check_mutable()?;
        let (index, path) = self.region_path(region_id)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|_| Error::RegionNotFound(region_id.clone()))?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileRegion {
            index,
            file,
            size,
            sync_on_persist: self.sync_on_persist,
        }))
    }

    fn open_read(&self, region_id: &RegionId) -> Result<Box<dyn ReadableRegion + '_>> {
        self.state.lock().unwrap().check_readable()?;
        let (index, path) = self.region_path(region_id)?;
        let file = File::open(&path).map_err(|_| Error::RegionNotFound(region_id.clone()))?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileRegion {
            index,
            file,
            size,
            sync_on_persist: self.sync_on_persist,
        }))
    }

    fn erase(&self, region_id: &RegionId) -> Result<()> {
        self.state.lock().unwrap().check_mutable()?;
        let (_, path) = self.region_path(region_id)?;
        std::fs::remove_file(&path).map_err(|_| Error::RegionNotFound(region_id.clone()))
    }

    fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return Err(Error::TargetDestroyed);
        }
        std::fs::remove_dir_all(&self.root)?;
        state.destroyed = true;
        info!("Destroyed file target at {}", self.root.display());
        Ok(())
    }

    fn start_migration(&self, remove_source: bool) -> Result<Box<dyn MigrationHandle + '_>> {
        let mut state = self.state.lock().unwrap();
        state.check_mutable()?;
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if region_file_index(name).is_some() {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        state.migrating = true;
        info!(
            "Started migration of file target at {} ({} region files)",
            self.root.display(),
            files.len()
        );
        Ok(Box::new(FileMigrationHandle {
            target: self,
            files,
            remove_source,
            canceled: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_in(dir: &Path) -> FileTarget {
        let config = serde_json::json!({ "path": dir.join("target").display().to_string() });
        FileTarget::create_target(&config).unwrap()
    }

    #[test]
    fn test_create_write_read_erase() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path());

        let region_id = {
            let mut region = target.create(10).unwrap();
            region.write(&[(0, 5), (5, 5)], b"HELLOWORLD", true).unwrap();
            region.region_id()
        };

        let mut region = target.open_read(&region_id).unwrap();
        let mut out = vec![0u8; 10];
        region.read(&[(5, 5), (0, 5)], &mut out).unwrap();
        assert_eq!(&out, b"WORLDHELLO");
        drop(region);

        target.erase(&region_id).unwrap();
        assert!(target.open_read(&region_id).is_err());
    }

    #[test]
    fn test_validate_requires_path() {
        assert!(FileTarget::validate(&serde_json::json!({})).is_err());
        assert!(FileTarget::validate(&serde_json::json!({ "path": 3 })).is_err());
        assert!(FileTarget::validate(&serde_json::json!({ "path": "" })).is_err());
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").display().to_string();
        assert!(FileTarget::validate(
            &serde_json::json!({ "path": missing, "create_if_missing": false })
        )
        .is_err());
    }

    #[test]
    fn test_destroy_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path());
        let root = target.root.clone();
        target.create(4).unwrap();
        target.destroy().unwrap();
        assert!(!root.exists());
        assert!(matches!(target.create(4), Err(Error::TargetDestroyed)));
    }

    #[test]
    fn test_region_indices_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = serde_json::json!({ "path": dir.path().join("t").display().to_string() });
        let first_id = {
            let target = FileTarget::create_target(&config).unwrap();
            let region = target.create(4).unwrap();
            region.region_id()
        };
        let target = FileTarget::create_target(&config).unwrap();
        let second_id = target.create(4).unwrap().region_id();
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn test_recover_re_roots_config() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path());
        let region_id = {
            let mut region = target.create(3).unwrap();
            region.write(&[(0, 3)], b"abc", true).unwrap();
            region.region_id()
        };

        let moved = dir.path().join("installed");
        std::fs::create_dir_all(&moved).unwrap();
        let file = moved.join(region_file_name(region_id.to_index().unwrap()));
        std::fs::copy(
            target.root.join(region_file_name(region_id.to_index().unwrap())),
            &file,
        )
        .unwrap();

        let recovered = FileTarget::recover(&target.config(), &[file]).unwrap();
        assert_eq!(
            recovered.config()["path"].as_str().unwrap(),
            moved.display().to_string()
        );
        let mut region = recovered.open_read(&region_id).unwrap();
        let mut out = vec![0u8; 3];
        region.read(&[(0, 3)], &mut out).unwrap();
        assert_eq!(&out, b"abc");
    }
}
