//! Application state for the HTTP surface.
//!
//! Holds the running provider and its engine so handlers can reach both,
//! following the dependency injection pattern: everything is wired at
//! startup and handed to actix as shared data.

use crate::engine::Engine;
use crate::fileset::{FileSetClient, FileSetServer};
use crate::provider::Provider;
use log::info;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub provider: Provider,
}

impl AppState {
    pub fn new(engine: Engine, provider: Provider) -> AppState {
        AppState { engine, provider }
    }

    /// Bring up a full provider (migration support included) from a
    /// configuration document.
    pub fn from_config(address: &str, config: &str) -> crate::error::Result<AppState> {
        let engine = Engine::new(address);
        let server = FileSetServer::new(&engine);
        let client = FileSetClient::new(&engine);
        let provider =
            Provider::new_with_migration(&engine, 1, config, Some(client), Some(server))?;
        info!("Application state initialized for {}", address);
        Ok(AppState { engine, provider })
    }

    /// State for tests: an empty provider on a private engine.
    pub fn new_for_testing() -> AppState {
        Self::from_config("local://testing", "{}").expect("empty configuration must be valid")
    }
}
