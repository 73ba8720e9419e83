//! The provider dispatch core.
//!
//! A provider owns a set of targets and a set of named transfer managers,
//! demultiplexes incoming requests to the right target, sequences region
//! operations against the target's backend, and orchestrates bulk transfers
//! through the target's transfer manager. Registry locks are held only for
//! the duration of map operations; looked-up entries are reference-counted
//! so in-flight requests keep their backend alive even if the entry is
//! removed underneath them.

mod dispatch;
pub mod migration;

use crate::backend::{self, TargetBackend};
use crate::engine::{Engine, RpcHandler};
use crate::error::{Error, Result};
use crate::fileset::{FileSetClient, FileSetServer};
use crate::rpc::{Envelope, MigrationOptions, Request, ResponseValue};
use crate::transfer::{self, TransferManager};
use log::{error, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Name of the transfer manager every provider carries.
pub const DEFAULT_TRANSFER_MANAGER: &str = "__default__";

/// One registry entry: the owned backend, the shared transfer manager it is
/// bound to, and that transfer manager's name. Entries are immutable once
/// inserted.
pub(crate) struct TargetEntry {
    pub(crate) backend: Box<dyn TargetBackend>,
    pub(crate) transfer_manager: Arc<dyn TransferManager>,
    pub(crate) transfer_manager_name: String,
}

pub(crate) struct ProviderInner {
    pub(crate) provider_id: u16,
    pub(crate) engine: Engine,
    pub(crate) targets: Mutex<HashMap<Uuid, Arc<TargetEntry>>>,
    pub(crate) transfer_managers: Mutex<HashMap<String, Arc<dyn TransferManager>>>,
    pub(crate) migration_client: Option<FileSetClient>,
    migration_server: Option<FileSetServer>,
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        if let Some(server) = &self.migration_server {
            server.deregister_class(&migration::migration_class(self.provider_id));
        }
        self.engine.deregister_provider(self.provider_id);
    }
}

/// Cheap cloneable handle to a running provider.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl Provider {
    /// Bring up a provider without migration support; `migrate_target`
    /// will be refused and no install hooks are registered.
    pub fn new(engine: &Engine, provider_id: u16, config: &str) -> Result<Provider> {
        Provider::new_with_migration(engine, provider_id, config, None, None)
    }

    /// Bring up a provider from a configuration document.
    ///
    /// The document is validated as a whole before anything is
    /// instantiated; any failure rejects the whole bring-up. A provider
    /// with only a client can send targets away, one with only a server
    /// can receive them.
    pub fn new_with_migration(
        engine: &Engine,
        provider_id: u16,
        config: &str,
        migration_client: Option<FileSetClient>,
        migration_server: Option<FileSetServer>,
    ) -> Result<Provider> {
        let document = crate::config::parse_document(config)?;
        crate::config::validate_document(&document)?;

        let manager_declarations = crate::config::transfer_manager_declarations(&document)?;
        let target_declarations = crate::config::target_declarations(&document)?;
        for (_, tm_type, tm_config) in &manager_declarations {
            transfer::config::validate_config(tm_type, tm_config)?;
        }
        for (target_type, target_config) in &target_declarations {
            backend::config::validate_config(target_type, target_config)?;
        }

        let inner = Arc::new(ProviderInner {
            provider_id,
            engine: engine.clone(),
            targets: Mutex::new(HashMap::new()),
            transfer_managers: Mutex::new(HashMap::new()),
            migration_client,
            migration_server,
        });
        let handler_arc: Arc<dyn RpcHandler> = inner.clone();
        let handler: Weak<dyn RpcHandler> = Arc::downgrade(&handler_arc);
        engine.register_provider(provider_id, handler)?;
        let provider = Provider { inner };

        for (name, tm_type, tm_config) in &manager_declarations {
            provider.inner.add_transfer_manager_json(name, tm_type, tm_config)?;
        }
        let has_default = provider
            .inner
            .transfer_managers
            .lock()
            .unwrap()
            .contains_key(DEFAULT_TRANSFER_MANAGER);
        if !has_default {
            provider.inner.add_transfer_manager_json(
                DEFAULT_TRANSFER_MANAGER,
                DEFAULT_TRANSFER_MANAGER,
                &serde_json::json!({}),
            )?;
        }
        for (target_type, target_config) in &target_declarations {
            provider.inner.add_target_json(target_type, target_config)?;
        }

        if let Some(server) = &provider.inner.migration_server {
            server.register_class(
                &migration::migration_class(provider_id),
                Arc::new(migration::ProviderMigrationHooks {
                    provider: Arc::downgrade(&provider.inner),
                }),
            )?;
        }

        info!(
            "[provider:{}] up with {} target(s), {} transfer manager(s)",
            provider_id,
            provider.inner.targets.lock().unwrap().len(),
            provider.inner.transfer_managers.lock().unwrap().len()
        );
        Ok(provider)
    }

    pub fn provider_id(&self) -> u16 {
        self.inner.provider_id
    }

    /// Validate, instantiate and register a target; returns its fresh UUID.
    pub fn add_target(&self, target_type: &str, config: &str) -> Result<Uuid> {
        self.inner.add_target(target_type, config)
    }

    /// Drop a registry entry without touching on-disk artifacts.
    pub fn remove_target(&self, target_id: &Uuid) -> Result<()> {
        self.inner.remove_target(target_id)
    }

    /// Destroy the backend's artifacts and drop the registry entry.
    pub fn destroy_target(&self, target_id: &Uuid) -> Result<()> {
        self.inner.destroy_target(target_id)
    }

    /// Succeeds exactly when the target is present in the registry.
    pub fn check_target(&self, target_id: &Uuid) -> Result<()> {
        self.inner.find_target(target_id).map(|_| ())
    }

    pub fn add_transfer_manager(&self, name: &str, tm_type: &str, config: &str) -> Result<()> {
        self.inner.add_transfer_manager(name, tm_type, config)
    }

    /// Move a target, files included, to a peer provider. See the module
    /// documentation of [`migration`] for the protocol.
    pub fn migrate_target(
        &self,
        target_id: &Uuid,
        dest_address: &str,
        dest_provider_id: u16,
        options: &MigrationOptions,
    ) -> Result<()> {
        migration::migrate(&self.inner, target_id, dest_address, dest_provider_id, options)
    }

    /// Faithful round-trip of the live configuration, with a per-target
    /// `__id__` carrying the assigned UUID.
    pub fn get_config(&self) -> serde_json::Value {
        self.inner.get_config()
    }

    /// Run one request through the dispatch path, as if it had arrived
    /// from this provider's own engine.
    pub fn dispatch(&self, request: Request) -> Envelope<ResponseValue> {
        self.inner
            .handle(self.inner.engine.self_endpoint(), request)
    }
}

impl ProviderInner {
    pub(crate) fn find_target(&self, target_id: &Uuid) -> Result<Arc<TargetEntry>> {
        let targets = self.targets.lock().unwrap();
        targets
            .get(target_id)
            .cloned()
            .ok_or(Error::TargetNotFound(*target_id))
    }

    pub(crate) fn add_target(&self, target_type: &str, config: &str) -> Result<Uuid> {
        let config: serde_json::Value = serde_json::from_str(config).map_err(|e| {
            error!("Could not parse target configuration: {}", e);
            Error::ConfigParse(e)
        })?;
        backend::config::validate_config(target_type, &config)?;
        self.add_target_json(target_type, &config)
    }

    fn add_target_json(&self, target_type: &str, config: &serde_json::Value) -> Result<Uuid> {
        let target_id = Uuid::new_v4();
        let backend = backend::config::create_backend(target_type, config)?;
        {
            // lock order is invariant across the core: targets, then
            // transfer managers
            let mut targets = self.targets.lock().unwrap();
            let managers = self.transfer_managers.lock().unwrap();
            let tm_name = config
                .get("transfer_manager")
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_TRANSFER_MANAGER);
            let tm = managers
                .get(tm_name)
                .cloned()
                .ok_or_else(|| Error::TransferManagerNotFound(tm_name.to_string()))?;
            targets.insert(
                target_id,
                Arc::new(TargetEntry {
                    backend,
                    transfer_manager: tm,
                    transfer_manager_name: tm_name.to_string(),
                }),
            );
        }
        info!("Added {} target {}", target_type, target_id);
        Ok(target_id)
    }

    pub(crate) fn remove_target(&self, target_id: &Uuid) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        targets
            .remove(target_id)
            .map(|_| ())
            .ok_or(Error::TargetNotFound(*target_id))?;
        info!("Removed target {}", target_id);
        Ok(())
    }

    pub(crate) fn destroy_target(&self, target_id: &Uuid) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        let entry = targets
            .get(target_id)
            .cloned()
            .ok_or(Error::TargetNotFound(*target_id))?;
        let destroyed = entry.backend.destroy();
        targets.remove(target_id);
        destroyed?;
        info!("Destroyed target {}", target_id);
        Ok(())
    }

    pub(crate) fn add_transfer_manager(
        &self,
        name: &str,
        tm_type: &str,
        config: &str,
    ) -> Result<()> {
        let config: serde_json::Value = serde_json::from_str(config).map_err(|e| {
            error!("Could not parse transfer manager configuration: {}", e);
            Error::ConfigParse(e)
        })?;
        transfer::config::validate_config(tm_type, &config)?;
        self.add_transfer_manager_json(name, tm_type, &config)
    }

    fn add_transfer_manager_json(
        &self,
        name: &str,
        tm_type: &str,
        config: &serde_json::Value,
    ) -> Result<()> {
        let mut managers = self.transfer_managers.lock().unwrap();
        if managers.contains_key(name) {
            return Err(Error::TransferManagerExists(name.to_string()));
        }
        let tm = transfer::config::create_transfer_manager(&self.engine, tm_type, config)?;
        managers.insert(name.to_string(), tm);
        info!("Added {} transfer manager \"{}\"", tm_type, name);
        Ok(())
    }

    pub(crate) fn get_config(&self) -> serde_json::Value {
        let targets = self.targets.lock().unwrap();
        let managers = self.transfer_managers.lock().unwrap();
        let mut target_list = Vec::with_capacity(targets.len());
        for (target_id, entry) in targets.iter() {
            let mut config = entry.backend.config();
            config["transfer_manager"] =
                serde_json::Value::String(entry.transfer_manager_name.clone());
            target_list.push(serde_json::json!({
                "__id__": target_id.to_string(),
                "type": entry.backend.kind(),
                "config": config,
            }));
        }
        let mut manager_map = serde_json::Map::new();
        for (name, tm) in managers.iter() {
            manager_map.insert(
                name.clone(),
                serde_json::json!({ "type": tm.kind(), "config": tm.config() }),
            );
        }
        serde_json::json!({
            "targets": target_list,
            "transfer_managers": manager_map,
        })
    }
}
