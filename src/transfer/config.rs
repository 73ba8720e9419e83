//! Transfer manager selection and factory dispatch.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::transfer::{
    default::DefaultTransferManager, pipeline::PipelineTransferManager, TransferManager,
};
use log::info;
use std::sync::Arc;

/// Available transfer manager types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferManagerKind {
    Default,
    Pipeline,
}

impl TransferManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferManagerKind::Default => "__default__",
            TransferManagerKind::Pipeline => "pipeline",
        }
    }
}

impl std::str::FromStr for TransferManagerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "__default__" => Ok(TransferManagerKind::Default),
            "pipeline" => Ok(TransferManagerKind::Pipeline),
            _ => Err(Error::UnknownTransferManagerType(s.to_string())),
        }
    }
}

/// Check a transfer-manager configuration without instantiating anything.
pub fn validate_config(tm_type: &str, config: &serde_json::Value) -> Result<()> {
    match tm_type.parse::<TransferManagerKind>()? {
        TransferManagerKind::Default => DefaultTransferManager::validate(config),
        TransferManagerKind::Pipeline => PipelineTransferManager::validate(config),
    }
}

/// Instantiate a transfer manager from a validated configuration.
pub fn create_transfer_manager(
    engine: &Engine,
    tm_type: &str,
    config: &serde_json::Value,
) -> Result<Arc<dyn TransferManager>> {
    let kind = tm_type.parse::<TransferManagerKind>()?;
    info!("Creating {} transfer manager", kind.as_str());
    match kind {
        TransferManagerKind::Default => Ok(Arc::new(DefaultTransferManager::new(engine))),
        TransferManagerKind::Pipeline => {
            Ok(Arc::new(PipelineTransferManager::new(engine, config)?))
        }
    }
}
