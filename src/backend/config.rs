//! Target backend selection and factory dispatch.

use crate::backend::{file_store::FileTarget, memory::MemoryTarget, TargetBackend};
use crate::error::{Error, Result};
use log::info;
use std::path::PathBuf;

/// Available target backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Memory,
    File,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Memory => "memory",
            TargetKind::File => "file",
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(TargetKind::Memory),
            "file" => Ok(TargetKind::File),
            _ => Err(Error::UnknownTargetType(s.to_string())),
        }
    }
}

/// Check a backend-specific configuration without instantiating anything.
pub fn validate_config(target_type: &str, config: &serde_json::Value) -> Result<()> {
    match target_type.parse::<TargetKind>()? {
        TargetKind::Memory => MemoryTarget::validate(config),
        TargetKind::File => FileTarget::validate(config),
    }
}

/// Instantiate a backend from a validated configuration.
pub fn create_backend(
    target_type: &str,
    config: &serde_json::Value,
) -> Result<Box<dyn TargetBackend>> {
    let kind = target_type.parse::<TargetKind>()?;
    info!("Creating {} target backend", kind.as_str());
    match kind {
        TargetKind::Memory => Ok(Box::new(MemoryTarget::new(config))),
        TargetKind::File => Ok(Box::new(FileTarget::create_target(config)?)),
    }
}

/// Reconstitute a backend from the files installed by a migration.
pub fn recover_backend(
    target_type: &str,
    config: &serde_json::Value,
    files: &[PathBuf],
) -> Result<Box<dyn TargetBackend>> {
    let kind = target_type.parse::<TargetKind>()?;
    info!(
        "Recovering {} target backend from {} files",
        kind.as_str(),
        files.len()
    );
    match kind {
        TargetKind::Memory => Ok(Box::new(MemoryTarget::recover(config, files)?)),
        TargetKind::File => Ok(Box::new(FileTarget::recover(config, files)?)),
    }
}
