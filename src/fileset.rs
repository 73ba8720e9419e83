//! File-set streaming between providers.
//!
//! A [`FileSet`] names the artifacts of one target: a class tag routing it
//! to the receiver's install hooks, a root directory, file and directory
//! entries relative to that root, and string metadata. The in-process
//! client/server pair below realizes the streaming contract: the receiver's
//! before-install hook runs first, files are copied chunk by chunk and
//! verified against a SHA-256 digest of the source, then the after-install
//! hook runs. Any rejection leaves the destination with nothing installed.

use crate::engine::{Endpoint, Engine};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Everything went through, including the after-install hook.
pub const STATUS_OK: i32 = 0;
/// An installed file did not match the source digest.
pub const STATUS_CHECKSUM_MISMATCH: i32 = -2;
/// No install hooks are registered under the file-set's class.
pub const STATUS_UNKNOWN_CLASS: i32 = -3;

const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// A named set of files rooted at a source directory.
#[derive(Debug, Clone)]
pub struct FileSet {
    class: String,
    root: PathBuf,
    entries: Vec<String>,
    metadata: HashMap<String, String>,
    transfer_size: u32,
}

impl FileSet {
    pub fn new(class: &str, root: &Path) -> FileSet {
        FileSet {
            class: class.to_string(),
            root: root.to_path_buf(),
            entries: Vec::new(),
            metadata: HashMap::new(),
            transfer_size: 0,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn register_file(&mut self, relative: &str) {
        self.entries.push(relative.trim_end_matches('/').to_string());
    }

    /// Register a directory; its content is streamed recursively.
    pub fn register_directory(&mut self, relative: &str) {
        let mut entry = relative.trim_end_matches('/').to_string();
        entry.push('/');
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Chunk size for streaming; 0 means whole-file transfers.
    pub fn set_transfer_size(&mut self, size: u32) {
        self.transfer_size = size;
    }

    pub fn transfer_size(&self) -> u32 {
        self.transfer_size
    }

    /// Expand directory entries into the full relative file list.
    pub fn walk(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in &self.entries {
            if let Some(dir) = entry.strip_suffix('/') {
                let prefix = format!("{}/", dir);
                walk_directory(&self.root, &prefix, &mut files)?;
            } else {
                files.push(entry.clone());
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// The same file set, seen from the directory it was installed into.
    pub fn with_root(&self, root: &Path) -> FileSet {
        let mut moved = self.clone();
        moved.root = root.to_path_buf();
        moved
    }
}

fn walk_directory(root: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(root.join(prefix))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            walk_directory(root, &format!("{}{}/", prefix, name), out)?;
        } else {
            out.push(format!("{}{}", prefix, name));
        }
    }
    Ok(())
}

/// Receiver-side install hooks for one migration class.
pub trait MigrationHooks: Send + Sync {
    /// Runs before any file is written; must be side-effect free. A
    /// non-zero return rejects the migration.
    fn before_install(&self, fileset: &FileSet) -> i32;

    /// Runs once every file is on disk at the destination root. A non-zero
    /// return rejects the migration and the installed files are removed.
    fn after_install(&self, fileset: &FileSet) -> i32;
}

/// Receiver half of the streaming service; one per engine.
#[derive(Clone)]
pub struct FileSetServer {
    inner: Arc<FileSetServerInner>,
}

pub struct FileSetServerInner {
    classes: Mutex<HashMap<String, Arc<dyn MigrationHooks>>>,
}

impl FileSetServer {
    pub fn new(engine: &Engine) -> FileSetServer {
        let server = FileSetServer {
            inner: Arc::new(FileSetServerInner {
                classes: Mutex::new(HashMap::new()),
            }),
        };
        engine.set_fileset_server(Arc::downgrade(&server.inner));
        server
    }

    pub fn register_class(&self, class: &str, hooks: Arc<dyn MigrationHooks>) -> Result<()> {
        let mut classes = self.inner.classes.lock().unwrap();
        if classes.contains_key(class) {
            return Err(Error::InvalidConfig(format!(
                "migration class \"{}\" is already registered",
                class
            )));
        }
        classes.insert(class.to_string(), hooks);
        info!("Registered migration class {}", class);
        Ok(())
    }

    pub fn deregister_class(&self, class: &str) {
        self.inner.classes.lock().unwrap().remove(class);
    }
}

impl FileSetServerInner {
    fn hooks(&self, class: &str) -> Option<Arc<dyn MigrationHooks>> {
        self.classes.lock().unwrap().get(class).cloned()
    }
}

/// Sender half of the streaming service.
#[derive(Clone)]
pub struct FileSetClient {
    engine: Engine,
}

impl FileSetClient {
    pub fn new(engine: &Engine) -> FileSetClient {
        FileSetClient {
            engine: engine.clone(),
        }
    }

    /// Stream a file set to `dest` and install it under `new_root`.
    ///
    /// Returns the receiver's status: 0 on success, the hook's code on
    /// rejection, or one of the negative service codes. The source files
    /// are never touched.
    pub fn migrate(&self, dest: &Endpoint, fileset: &FileSet, new_root: &str) -> Result<i32> {
        self.engine.lookup(dest.address())?;
        let server = match self.engine.fileset_server() {
            Some(server) => server,
            None => {
                warn!("Destination {} has no file-set service", dest.address());
                return Ok(STATUS_UNKNOWN_CLASS);
            }
        };
        let hooks = match server.hooks(fileset.class()) {
            Some(hooks) => hooks,
            None => {
                warn!("No migration class \"{}\" at {}", fileset.class(), dest.address());
                return Ok(STATUS_UNKNOWN_CLASS);
            }
        };

        let before = hooks.before_install(fileset);
        if before != STATUS_OK {
            info!(
                "Migration of class {} rejected before install (status {})",
                fileset.class(),
                before
            );
            return Ok(before);
        }

        let chunk_size = if fileset.transfer_size() > 0 {
            fileset.transfer_size() as usize
        } else {
            DEFAULT_CHUNK_SIZE
        };
        let dest_root = PathBuf::from(new_root);
        let files = fileset.walk()?;
        let mut installed: Vec<PathBuf> = Vec::new();
        for relative in &files {
            let source = fileset.root().join(relative);
            let target = dest_root.join(relative);
            if let Some(parent) = target.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    remove_installed(&installed, &dest_root);
                    return Err(e.into());
                }
            }
            match copy_verified(&source, &target, chunk_size) {
                Ok(true) => installed.push(target),
                Ok(false) => {
                    warn!("Checksum mismatch installing {}", relative);
                    remove_installed(&installed, &dest_root);
                    return Ok(STATUS_CHECKSUM_MISMATCH);
                }
                Err(e) => {
                    remove_installed(&installed, &dest_root);
                    return Err(e);
                }
            }
            debug!("Installed {} under {}", relative, dest_root.display());
        }

        let after = hooks.after_install(&fileset.with_root(&dest_root));
        if after != STATUS_OK {
            info!(
                "Migration of class {} rejected after install (status {}); rolling back",
                fileset.class(),
                after
            );
            remove_installed(&installed, &dest_root);
            return Ok(after);
        }
        info!(
            "Migrated {} files of class {} to {}",
            files.len(),
            fileset.class(),
            dest_root.display()
        );
        Ok(STATUS_OK)
    }
}

/// Copy `source` to `target` in chunks, then confirm the installed bytes
/// hash to the same SHA-256 digest as the source.
fn copy_verified(source: &Path, target: &Path, chunk_size: usize) -> Result<bool> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(target)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
    }
    writer.sync_data()?;
    let expected = hasher.finalize();

    let mut reader = File::open(target)?;
    let mut hasher = Sha256::new();
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize() == expected)
}

/// Best-effort rollback of a partial install: drop the files, then prune
/// any directories left empty, the destination root included.
fn remove_installed(installed: &[PathBuf], dest_root: &Path) {
    for file in installed {
        if let Err(e) = std::fs::remove_file(file) {
            warn!("Could not roll back {}: {}", file.display(), e);
        }
    }
    for file in installed {
        let mut dir = file.parent();
        while let Some(d) = dir {
            if std::fs::remove_dir(d).is_err() {
                break;
            }
            if d == dest_root {
                break;
            }
            dir = d.parent();
        }
    }
    let _ = std::fs::remove_dir(dest_root);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHooks {
        before_status: i32,
        after_status: i32,
        before_calls: Mutex<u32>,
        after_calls: Mutex<u32>,
    }

    impl CountingHooks {
        fn new(before_status: i32, after_status: i32) -> CountingHooks {
            CountingHooks {
                before_status,
                after_status,
                before_calls: Mutex::new(0),
                after_calls: Mutex::new(0),
            }
        }
    }

    impl MigrationHooks for CountingHooks {
        fn before_install(&self, _fileset: &FileSet) -> i32 {
            *self.before_calls.lock().unwrap() += 1;
            self.before_status
        }

        fn after_install(&self, fileset: &FileSet) -> i32 {
            *self.after_calls.lock().unwrap() += 1;
            // every walked file must be present under the installed root
            for file in fileset.walk().unwrap() {
                assert!(fileset.root().join(file).is_file());
            }
            self.after_status
        }
    }

    fn sample_fileset(dir: &Path) -> FileSet {
        std::fs::write(dir.join("a.dat"), b"alpha").unwrap();
        std::fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        std::fs::write(dir.join("nested/b.dat"), b"beta").unwrap();
        std::fs::write(dir.join("nested/deeper/c.dat"), b"gamma").unwrap();
        let mut fileset = FileSet::new("test/1", dir);
        fileset.register_file("a.dat");
        fileset.register_directory("nested");
        fileset
    }

    #[test]
    fn test_walk_expands_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fileset = sample_fileset(dir.path());
        assert_eq!(
            fileset.walk().unwrap(),
            vec!["a.dat", "nested/b.dat", "nested/deeper/c.dat"]
        );
    }

    #[test]
    fn test_migrate_installs_and_runs_hooks() {
        let engine = Engine::new("local://fileset");
        let server = FileSetServer::new(&engine);
        let hooks = Arc::new(CountingHooks::new(STATUS_OK, STATUS_OK));
        server.register_class("test/1", hooks.clone()).unwrap();

        let src = tempfile::tempdir().unwrap();
        let fileset = sample_fileset(src.path());
        let dst = tempfile::tempdir().unwrap();
        let new_root = dst.path().join("installed");

        let client = FileSetClient::new(&engine);
        let status = client
            .migrate(
                &engine.self_endpoint(),
                &fileset,
                &new_root.display().to_string(),
            )
            .unwrap();
        assert_eq!(status, STATUS_OK);
        assert_eq!(*hooks.before_calls.lock().unwrap(), 1);
        assert_eq!(*hooks.after_calls.lock().unwrap(), 1);
        assert_eq!(
            std::fs::read(new_root.join("nested/deeper/c.dat")).unwrap(),
            b"gamma"
        );
        // source untouched
        assert!(src.path().join("a.dat").is_file());
    }

    #[test]
    fn test_before_rejection_installs_nothing() {
        let engine = Engine::new("local://fileset");
        let server = FileSetServer::new(&engine);
        server
            .register_class("test/1", Arc::new(CountingHooks::new(7, STATUS_OK)))
            .unwrap();

        let src = tempfile::tempdir().unwrap();
        let fileset = sample_fileset(src.path());
        let dst = tempfile::tempdir().unwrap();
        let new_root = dst.path().join("installed");

        let client = FileSetClient::new(&engine);
        let status = client
            .migrate(
                &engine.self_endpoint(),
                &fileset,
                &new_root.display().to_string(),
            )
            .unwrap();
        assert_eq!(status, 7);
        assert!(!new_root.exists());
    }

    #[test]
    fn test_after_rejection_rolls_back_install() {
        let engine = Engine::new("local://fileset");
        let server = FileSetServer::new(&engine);
        server
            .register_class("test/1", Arc::new(CountingHooks::new(STATUS_OK, 9)))
            .unwrap();

        let src = tempfile::tempdir().unwrap();
        let fileset = sample_fileset(src.path());
        let dst = tempfile::tempdir().unwrap();
        let new_root = dst.path().join("installed");

        let client = FileSetClient::new(&engine);
        let status = client
            .migrate(
                &engine.self_endpoint(),
                &fileset,
                &new_root.display().to_string(),
            )
            .unwrap();
        assert_eq!(status, 9);
        assert!(!new_root.join("a.dat").exists());
        assert!(!new_root.join("nested").exists());
    }

    #[test]
    fn test_unknown_class_status() {
        let engine = Engine::new("local://fileset");
        let _server = FileSetServer::new(&engine);
        let src = tempfile::tempdir().unwrap();
        let fileset = sample_fileset(src.path());

        let client = FileSetClient::new(&engine);
        let status = client
            .migrate(&engine.self_endpoint(), &fileset, "/tmp/nowhere")
            .unwrap();
        assert_eq!(status, STATUS_UNKNOWN_CLASS);
    }
}
