//! Provider configuration document handling.
//!
//! The outer document shape is
//!
//! ```json
//! {
//!   "targets": [ { "type": "...", "config": { "transfer_manager": "...", ... } } ],
//!   "transfer_managers": { "<name>": { "type": "...", "config": { ... } } }
//! }
//! ```
//!
//! Both top-level keys are optional; an empty document is valid. Unknown
//! fields are rejected here, while the content of each `config` object is
//! left to the backend or transfer-manager factory to interpret.

use crate::error::{Error, Result};

/// Parse a configuration string; an empty string means an empty document.
pub fn parse_document(text: &str) -> Result<serde_json::Value> {
    if text.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    Ok(serde_json::from_str(text)?)
}

/// Check the outer document shape.
pub fn validate_document(document: &serde_json::Value) -> Result<()> {
    let object = document.as_object().ok_or_else(|| {
        Error::InvalidConfig("provider configuration must be a JSON object".to_string())
    })?;
    for key in object.keys() {
        if key != "targets" && key != "transfer_managers" {
            return Err(Error::InvalidConfig(format!(
                "unknown provider configuration key \"{}\"",
                key
            )));
        }
    }
    target_declarations(document)?;
    transfer_manager_declarations(document)?;
    Ok(())
}

/// The `(type, config)` pairs declared under `targets`, in declaration
/// order.
pub(crate) fn target_declarations(
    document: &serde_json::Value,
) -> Result<Vec<(String, serde_json::Value)>> {
    let mut declarations = Vec::new();
    let targets = match document.get("targets") {
        Some(targets) => targets.as_array().ok_or_else(|| {
            Error::InvalidConfig("\"targets\" must be an array".to_string())
        })?,
        None => return Ok(declarations),
    };
    for (index, declaration) in targets.iter().enumerate() {
        let declaration = declaration.as_object().ok_or_else(|| {
            Error::InvalidConfig(format!("targets[{}] must be an object", index))
        })?;
        for key in declaration.keys() {
            if key != "type" && key != "config" {
                return Err(Error::InvalidConfig(format!(
                    "unknown key \"{}\" in targets[{}]",
                    key, index
                )));
            }
        }
        let target_type = declaration
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::InvalidConfig(format!("targets[{}] requires a string \"type\"", index))
            })?;
        let config = match declaration.get("config") {
            Some(config) => {
                if !config.is_object() {
                    return Err(Error::InvalidConfig(format!(
                        "targets[{}].config must be an object",
                        index
                    )));
                }
                config.clone()
            }
            None => serde_json::json!({}),
        };
        if let Some(tm) = config.get("transfer_manager") {
            if !tm.is_string() {
                return Err(Error::InvalidConfig(format!(
                    "targets[{}].config.transfer_manager must be a string",
                    index
                )));
            }
        }
        declarations.push((target_type.to_string(), config));
    }
    Ok(declarations)
}

/// The `(name, type, config)` triples declared under `transfer_managers`.
pub(crate) fn transfer_manager_declarations(
    document: &serde_json::Value,
) -> Result<Vec<(String, String, serde_json::Value)>> {
    let mut declarations = Vec::new();
    let managers = match document.get("transfer_managers") {
        Some(managers) => managers.as_object().ok_or_else(|| {
            Error::InvalidConfig("\"transfer_managers\" must be an object".to_string())
        })?,
        None => return Ok(declarations),
    };
    for (name, declaration) in managers {
        let declaration = declaration.as_object().ok_or_else(|| {
            Error::InvalidConfig(format!("transfer_managers.{} must be an object", name))
        })?;
        for key in declaration.keys() {
            if key != "type" && key != "config" {
                return Err(Error::InvalidConfig(format!(
                    "unknown key \"{}\" in transfer_managers.{}",
                    key, name
                )));
            }
        }
        let tm_type = declaration
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "transfer_managers.{} requires a string \"type\"",
                    name
                ))
            })?;
        let config = match declaration.get("config") {
            Some(config) => {
                if !config.is_object() {
                    return Err(Error::InvalidConfig(format!(
                        "transfer_managers.{}.config must be an object",
                        name
                    )));
                }
                config.clone()
            }
            None => serde_json::json!({}),
        };
        declarations.push((name.clone(), tm_type.to_string(), config));
    }
    Ok(declarations)
}
