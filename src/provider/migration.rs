//! Migration engine and receiver-side install hooks.
//!
//! Moving a target is a one-shot protocol: resolve the peer, lock the
//! target behind a migration handle, describe its on-disk artifacts as a
//! file set tagged with the peer's migration class, stream it, and only
//! then finalize the source side. Every failure before the stream
//! completes cancels the handle, leaving the source exactly as it was;
//! a rejection by the peer's hooks leaves the peer with nothing
//! installed. The distinct rejection codes below let the source log *why*
//! the peer refused.

use crate::backend;
use crate::error::{Error, Result};
use crate::fileset::{FileSet, MigrationHooks, STATUS_OK};
use crate::provider::{ProviderInner, TargetEntry, DEFAULT_TRANSFER_MANAGER};
use crate::rpc::MigrationOptions;
use log::{error, info, warn};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// One of the four mandatory metadata keys is absent.
pub const REJECT_MISSING_METADATA: i32 = 1;
/// A metadata value does not parse (UUID or JSON).
pub const REJECT_MALFORMED_METADATA: i32 = 2;
/// The merged config names a transfer manager the receiver does not have.
pub const REJECT_UNKNOWN_TRANSFER_MANAGER: i32 = 3;
/// The receiver already owns a target under the migrated UUID.
pub const REJECT_TARGET_EXISTS: i32 = 4;
/// The merged config fails the backend type's validation.
pub const REJECT_INVALID_CONFIG: i32 = 5;
/// The backend could not be reconstituted from the installed files.
pub const REJECT_RECOVER_FAILED: i32 = 6;

pub(crate) fn migration_class(provider_id: u16) -> String {
    format!("star_vault/{}", provider_id)
}

pub(crate) fn migrate(
    inner: &ProviderInner,
    target_id: &Uuid,
    dest_address: &str,
    dest_provider_id: u16,
    options: &MigrationOptions,
) -> Result<()> {
    let client = inner
        .migration_client
        .as_ref()
        .ok_or(Error::MigrationNotEnabled)?;
    let dest = inner.engine.lookup(dest_address)?;
    let entry = inner.find_target(target_id)?;
    let mut handle = entry.backend.start_migration(options.remove_source)?;
    info!(
        "[provider:{}] migrating target {} to {} (provider {})",
        inner.provider_id, target_id, dest_address, dest_provider_id
    );

    let mut fileset = FileSet::new(&migration_class(dest_provider_id), &handle.root());
    for file in handle.files() {
        if file.ends_with('/') {
            fileset.register_directory(&file);
        } else {
            fileset.register_file(&file);
        }
    }
    fileset.set_metadata("uuid", &target_id.to_string());
    fileset.set_metadata("type", entry.backend.kind());
    fileset.set_metadata("config", &entry.backend.config().to_string());
    fileset.set_metadata("migration_config", &options.extra_config);
    if options.transfer_size > 0 {
        fileset.set_transfer_size(options.transfer_size);
    }

    match client.migrate(&dest, &fileset, &options.new_root) {
        Ok(STATUS_OK) => {
            // dropping the handle finalizes the source side: with
            // remove_source the artifacts are deleted and the target
            // disabled
            drop(handle);
            inner.targets.lock().unwrap().remove(target_id);
            info!(
                "[provider:{}] target {} migrated to provider {}",
                inner.provider_id, target_id, dest_provider_id
            );
            Ok(())
        }
        Ok(status) => {
            warn!(
                "[provider:{}] peer rejected migration of target {} with status {}",
                inner.provider_id, target_id, status
            );
            handle.cancel();
            Err(Error::MigrationRejected(status))
        }
        Err(e) => {
            error!(
                "[provider:{}] migration of target {} failed: {}",
                inner.provider_id, target_id, e
            );
            handle.cancel();
            Err(e)
        }
    }
}

/// Metadata every migration file-set must carry.
struct MigrationMetadata {
    target_id: Uuid,
    target_type: String,
    /// Target config with the migration config merged over it.
    merged: Value,
}

fn read_metadata(fileset: &FileSet) -> std::result::Result<MigrationMetadata, i32> {
    let uuid = fileset.metadata("uuid").ok_or(REJECT_MISSING_METADATA)?;
    let target_type = fileset.metadata("type").ok_or(REJECT_MISSING_METADATA)?;
    let config = fileset.metadata("config").ok_or(REJECT_MISSING_METADATA)?;
    let migration_config = fileset
        .metadata("migration_config")
        .ok_or(REJECT_MISSING_METADATA)?;

    let target_id = Uuid::parse_str(uuid).map_err(|_| REJECT_MALFORMED_METADATA)?;
    let mut merged: Value =
        serde_json::from_str(config).map_err(|_| REJECT_MALFORMED_METADATA)?;
    let overrides: Value =
        serde_json::from_str(migration_config).map_err(|_| REJECT_MALFORMED_METADATA)?;
    match (merged.as_object_mut(), overrides.as_object()) {
        (Some(base), Some(overrides)) => {
            for (key, value) in overrides {
                base.insert(key.clone(), value.clone());
            }
        }
        _ => return Err(REJECT_MALFORMED_METADATA),
    }
    Ok(MigrationMetadata {
        target_id,
        target_type: target_type.to_string(),
        merged,
    })
}

/// Install hooks a provider registers under its migration class.
pub(crate) struct ProviderMigrationHooks {
    pub(crate) provider: Weak<ProviderInner>,
}

impl MigrationHooks for ProviderMigrationHooks {
    /// Side-effect free admission check, run before any file is written.
    fn before_install(&self, fileset: &FileSet) -> i32 {
        let provider = match self.provider.upgrade() {
            Some(provider) => provider,
            None => return REJECT_RECOVER_FAILED,
        };
        let metadata = match read_metadata(fileset) {
            Ok(metadata) => metadata,
            Err(code) => return code,
        };
        if let Some(name) = metadata.merged.get("transfer_manager").and_then(|v| v.as_str()) {
            let managers = provider.transfer_managers.lock().unwrap();
            if !managers.contains_key(name) {
                warn!("Rejecting migration: no transfer manager \"{}\"", name);
                return REJECT_UNKNOWN_TRANSFER_MANAGER;
            }
        }
        if provider
            .targets
            .lock()
            .unwrap()
            .contains_key(&metadata.target_id)
        {
            warn!(
                "Rejecting migration: target {} already present",
                metadata.target_id
            );
            return REJECT_TARGET_EXISTS;
        }
        if let Err(e) = backend::config::validate_config(&metadata.target_type, &metadata.merged) {
            warn!("Rejecting migration: {}", e);
            return REJECT_INVALID_CONFIG;
        }
        STATUS_OK
    }

    /// Reconstitute the target from the installed files and register it.
    fn after_install(&self, fileset: &FileSet) -> i32 {
        let provider = match self.provider.upgrade() {
            Some(provider) => provider,
            None => return REJECT_RECOVER_FAILED,
        };
        let metadata = match read_metadata(fileset) {
            Ok(metadata) => metadata,
            Err(code) => return code,
        };

        let tm_name = metadata
            .merged
            .get("transfer_manager")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_TRANSFER_MANAGER)
            .to_string();
        let tm = provider
            .transfer_managers
            .lock()
            .unwrap()
            .get(&tm_name)
            .cloned();
        let tm = match tm {
            Some(tm) => tm,
            None => return REJECT_UNKNOWN_TRANSFER_MANAGER,
        };

        let files: Vec<PathBuf> = match fileset.walk() {
            Ok(files) => files
                .iter()
                .map(|relative| fileset.root().join(relative))
                .collect(),
            Err(e) => {
                error!("Could not walk installed file set: {}", e);
                return REJECT_RECOVER_FAILED;
            }
        };
        let backend =
            match backend::config::recover_backend(&metadata.target_type, &metadata.merged, &files)
            {
                Ok(backend) => backend,
                Err(e) => {
                    error!(
                        "Could not recover {} target {}: {}",
                        metadata.target_type, metadata.target_id, e
                    );
                    return REJECT_RECOVER_FAILED;
                }
            };

        let mut targets = provider.targets.lock().unwrap();
        if targets.contains_key(&metadata.target_id) {
            return REJECT_TARGET_EXISTS;
        }
        targets.insert(
            metadata.target_id,
            Arc::new(TargetEntry {
                backend,
                transfer_manager: tm,
                transfer_manager_name: tm_name,
            }),
        );
        info!(
            "[provider:{}] installed migrated target {}",
            provider.provider_id, metadata.target_id
        );
        STATUS_OK
    }
}
